//! TCP adapter: the accept task and the per-connection stream.
//!
//! The only place the runtime's readiness contract meets user code: every
//! potentially blocking socket op is preceded by a
//! `wait_event(..., EXACTLY_ONCE)` so the fiber suspends instead of the
//! worker.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::os::unix::io::RawFd;

use xynq_base::{InStream, OutStream, StreamError};
use xynq_runtime::{EventFlags, EventSource, TaskContext, TaskTuple};

/// Keep-alive knobs, straight from config.
#[derive(Clone, Debug)]
pub struct TcpKeepAlive {
    pub enable: bool,
    pub idle_sec: i32,
    pub interval_sec: i32,
    pub num_probes: i32,
}

impl Default for TcpKeepAlive {
    fn default() -> Self {
        Self {
            enable: false,
            idle_sec: 2,
            interval_sec: 10,
            num_probes: 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TcpParams {
    pub listen_backlog: i32,
    pub reuse_addr: bool,
    pub keep_alive: TcpKeepAlive,
}

impl Default for TcpParams {
    fn default() -> Self {
        Self {
            listen_backlog: 1024,
            reuse_addr: false,
            keep_alive: TcpKeepAlive::default(),
        }
    }
}

/// Invoked for every accepted connection, on that connection's fiber.
pub type ConnHandler = fn(&TaskContext, &str, &TcpStream<'_>);

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn is_in_progress(code: i32) -> bool {
    code == libc::EAGAIN || code == libc::EWOULDBLOCK || code == libc::EINPROGRESS
}

/// Create, configure, bind and listen. Returns the fd and the actually
/// bound port (useful when asking for port 0).
pub fn bind_listener(addr: &str, port: u16, params: &TcpParams) -> std::io::Result<(RawFd, u16)> {
    let ip: IpAddr = addr
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad bind address"))?;

    let family = match ip {
        IpAddr::V4(_) => libc::AF_INET,
        IpAddr::V6(_) => libc::AF_INET6,
    };

    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let close_on_error = |fd: RawFd, err: std::io::Error| -> std::io::Error {
        unsafe { libc::close(fd) };
        err
    };

    // Non-blocking: accept/recv/send all go through the reactor.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) != 0 {
            return Err(close_on_error(fd, std::io::Error::last_os_error()));
        }
    }

    set_keep_alive(fd, &params.keep_alive);
    if params.reuse_addr {
        let enable: libc::c_int = 1;
        let err = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &enable as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if err < 0 {
            tracing::warn!(target: "xynq::tcp", "failed to set SO_REUSEPORT: {}", std::io::Error::last_os_error());
        }
    }

    let rc = match ip {
        IpAddr::V4(v4) => unsafe {
            let mut sa: libc::sockaddr_in = std::mem::zeroed();
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = port.to_be();
            sa.sin_addr.s_addr = u32::from_ne_bytes(v4.octets());
            libc::bind(
                fd,
                &sa as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        },
        IpAddr::V6(v6) => unsafe {
            let mut sa: libc::sockaddr_in6 = std::mem::zeroed();
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = port.to_be();
            sa.sin6_addr.s6_addr = v6.octets();
            libc::bind(
                fd,
                &sa as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        },
    };
    if rc != 0 {
        return Err(close_on_error(fd, std::io::Error::last_os_error()));
    }

    if unsafe { libc::listen(fd, params.listen_backlog) } < 0 {
        return Err(close_on_error(fd, std::io::Error::last_os_error()));
    }

    // Learn the actual port (asking for 0 picks an ephemeral one).
    let bound_port = unsafe {
        let mut sa: libc::sockaddr_storage = std::mem::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        if libc::getsockname(fd, &mut sa as *mut _ as *mut libc::sockaddr, &mut len) == 0 {
            let sa4 = &sa as *const _ as *const libc::sockaddr_in;
            u16::from_be((*sa4).sin_port)
        } else {
            port
        }
    };

    Ok((fd, bound_port))
}

fn set_keep_alive(fd: RawFd, keep_alive: &TcpKeepAlive) {
    unsafe fn sockopt(fd: RawFd, level: libc::c_int, opt: libc::c_int, value: libc::c_int) -> bool {
        libc::setsockopt(
            fd,
            level,
            opt,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) == 0
    }

    unsafe {
        if !sockopt(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, keep_alive.enable as libc::c_int) {
            tracing::error!(target: "xynq::tcp", "failed to set keep-alive: {}", std::io::Error::last_os_error());
            return;
        }
        if !keep_alive.enable {
            return;
        }
        if !sockopt(fd, libc::SOL_TCP, libc::TCP_KEEPIDLE, keep_alive.idle_sec)
            || !sockopt(fd, libc::SOL_TCP, libc::TCP_KEEPINTVL, keep_alive.interval_sec)
            || !sockopt(fd, libc::SOL_TCP, libc::TCP_KEEPCNT, keep_alive.num_probes)
        {
            tracing::error!(target: "xynq::tcp", "failed to set keep-alive timings: {}", std::io::Error::last_os_error());
        }
    }
}

/// `tcp://ip:port` of the peer, for logs and stream names.
fn peer_name(fd: RawFd) -> String {
    let mut name = String::from("tcp://");
    unsafe {
        let mut sa: libc::sockaddr_storage = std::mem::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        if libc::getpeername(fd, &mut sa as *mut _ as *mut libc::sockaddr, &mut len) != 0 {
            name.push_str("n/a");
            return name;
        }

        let (ip, port) = if sa.ss_family == libc::AF_INET as libc::sa_family_t {
            let sa4 = &sa as *const _ as *const libc::sockaddr_in;
            (
                Some(IpAddr::from(std::net::Ipv4Addr::from(u32::from_be(
                    (*sa4).sin_addr.s_addr,
                )))),
                u16::from_be((*sa4).sin_port),
            )
        } else {
            let sa6 = &sa as *const _ as *const libc::sockaddr_in6;
            (
                Some(IpAddr::from(std::net::Ipv6Addr::from(
                    (*sa6).sin6_addr.s6_addr,
                ))),
                u16::from_be((*sa6).sin6_port),
            )
        };

        if let Some(ip) = ip {
            let _ = write!(name, "{}:{}", ip, port);
        } else {
            name.push_str("n/a");
        }
    }
    name
}

/// Long-lived accept loop. Spawns one connection task per accepted socket.
pub fn accept_task(tc: &TaskContext, listen_fd: RawFd, handler: ConnHandler) {
    let source = EventSource::new(listen_fd);
    tracing::info!(target: "xynq::tcp", "accepting connections on fd {}", listen_fd);

    loop {
        tc.wait_event(&source, EventFlags::READ | EventFlags::EXACTLY_ONCE);

        let accepted = unsafe { libc::accept(listen_fd, std::ptr::null_mut(), std::ptr::null_mut()) };
        if accepted < 0 {
            let code = errno();
            if is_in_progress(code) || code == libc::EINTR {
                continue;
            }
            tracing::error!(
                target: "xynq::tcp",
                "failed to accept incoming connection: {}",
                std::io::Error::from_raw_os_error(code)
            );
            continue;
        }

        // The accepted socket does not inherit O_NONBLOCK; the stream's
        // wait-before-io contract depends on it.
        unsafe {
            let flags = libc::fcntl(accepted, libc::F_GETFL, 0);
            if flags >= 0 {
                libc::fcntl(accepted, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }

        tracing::info!(target: "xynq::tcp", "accepted new connection: {}", peer_name(accepted));
        tc.perform_async(TaskTuple::new("tcp-connection", move |tc| {
            connection_task(tc, accepted, handler)
        }));
    }
}

/// Per-connection task body: build the stream, run the handler, close.
fn connection_task(tc: &TaskContext, sock: RawFd, handler: ConnHandler) {
    let name = peer_name(sock);
    tracing::info!(target: "xynq::tcp", "starting new stream: {}", name);

    {
        let stream = TcpStream::new(tc, sock, &name);
        handler(tc, &name, &stream);
        // Stream drop deregisters from the reactor before the close below.
    }

    unsafe { libc::close(sock) };
    tracing::debug!(target: "xynq::tcp", "closed socket for {}", name);
}

/// Blocking-style stream over a non-blocking socket: suspends the calling
/// fiber on readiness before every `recv` and around partial `send`s.
pub struct TcpStream<'t> {
    tc: &'t TaskContext,
    sock: RawFd,
    source: EventSource,
    name: String,
}

impl<'t> TcpStream<'t> {
    pub fn new(tc: &'t TaskContext, sock: RawFd, name: &str) -> Self {
        Self {
            tc,
            sock,
            source: EventSource::new(sock),
            name: name.to_string(),
        }
    }
}

impl InStream for TcpStream<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        loop {
            self.tc
                .wait_event(&self.source, EventFlags::READ | EventFlags::EXACTLY_ONCE);
            let received = unsafe {
                libc::recv(self.sock, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };

            if received > 0 {
                return Ok(received as usize);
            }
            if received == 0 {
                tracing::info!(target: "xynq::tcp", "disconnected: {}", self.name);
                return Err(StreamError::Closed);
            }
            let code = errno();
            if is_in_progress(code) {
                continue;
            }
            tracing::warn!(
                target: "xynq::tcp",
                "socket error on recv ({}), disconnecting: {}",
                self.name,
                std::io::Error::from_raw_os_error(code)
            );
            return Err(StreamError::Io);
        }
    }
}

impl OutStream for TcpStream<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_write(&self, buf: &[u8]) -> Result<(), StreamError> {
        let mut sent_total = 0;
        while sent_total < buf.len() {
            let rest = &buf[sent_total..];
            let sent = unsafe {
                libc::send(
                    self.sock,
                    rest.as_ptr() as *const libc::c_void,
                    rest.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if sent < 0 {
                let code = errno();
                if is_in_progress(code) {
                    self.tc
                        .wait_event(&self.source, EventFlags::WRITE | EventFlags::EXACTLY_ONCE);
                    continue;
                }
                tracing::info!(
                    target: "xynq::tcp",
                    "socket error on send ({}), disconnecting: {}",
                    self.name,
                    std::io::Error::from_raw_os_error(code)
                );
                return Err(StreamError::Io);
            }
            sent_total += sent as usize;
        }
        Ok(())
    }
}

impl Drop for TcpStream<'_> {
    fn drop(&mut self) {
        self.tc.events().remove_event(&self.source);
    }
}
