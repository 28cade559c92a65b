//! End-to-end REPL tests over a real socket.
//!
//! A full server (pool + listener + host functions + store) runs on an
//! ephemeral port; a plain blocking client writes S-expressions and reads
//! JSON lines back.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use xynq_config::Config;
use xynq_runtime::StopHandle;
use xynqdb::deps::ServerCounters;
use xynqdb::server;

struct TestServer {
    port: u16,
    counters: Arc<ServerCounters>,
    stop: StopHandle,
    pool: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    fn start() -> TestServer {
        let config = Config::load_from_str(
            r#"
            (task (num-threads 2) (pin-threads No))
            (tcp (bind "127.0.0.1:0"))
        "#,
        )
        .unwrap();

        let (mut manager, state) = server::build(&config).expect("failed to build server");
        let port = state.listeners[0].1;
        let counters = Arc::clone(&state.counters);
        let stop = manager.stop_handle();

        let pool = std::thread::spawn(move || manager.run());

        TestServer {
            port,
            counters,
            stop,
            pool: Some(pool),
        }
    }

    fn connect(&self) -> TcpStream {
        // The accept task may not have registered yet right after start.
        for _ in 0..50 {
            match TcpStream::connect(("127.0.0.1", self.port)) {
                Ok(stream) => return stream,
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        panic!("could not connect to test server on port {}", self.port);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(pool) = self.pool.take() {
            let _ = pool.join();
        }
    }
}

fn roundtrip(reader: &mut BufReader<TcpStream>, request: &str) -> String {
    reader
        .get_mut()
        .write_all(request.as_bytes())
        .expect("write failed");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read failed");
    assert!(line.ends_with('\n'), "response not newline-terminated: {:?}", line);
    line.trim_end().to_string()
}

#[test]
fn repl_serves_programs_over_the_wire() {
    let server = TestServer::start();
    let stream = server.connect();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut reader = BufReader::new(stream);

    // Arithmetic with i64 wrap-around.
    let response = roundtrip(
        &mut reader,
        "(+ 100 -1000 900 -9223372036854775808 9223372036854775807 25)",
    );
    assert_eq!(response, "24");

    // Nesting.
    assert_eq!(roundtrip(&mut reader, "(+ (- 3 4) 5)"), "4");

    // Float contamination.
    assert_eq!(roundtrip(&mut reader, "(+ 1 0.5)"), "1.5");

    // Type error: a bare JSON string diagnostic; connection stays open.
    let response = roundtrip(&mut reader, "(+ 1 \"two\")");
    let diag: serde_json::Value = serde_json::from_str(&response).expect("diagnostic is JSON");
    let text = diag.as_str().expect("diagnostic is a string");
    assert!(
        text.starts_with("Operation expects numeric type"),
        "unexpected diagnostic: {}",
        text
    );

    // Unknown function: compile diagnostic, connection still open. The
    // lexer stops at the bad name, so the tail of the expression produces
    // a second diagnostic.
    let response = roundtrip(&mut reader, "(frobnicate 1)");
    let diag: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert!(diag.as_str().unwrap().contains("Unknown function 'frobnicate'"));
    let mut stale = String::new();
    reader.read_line(&mut stale).expect("read failed");
    assert!(stale.contains("Expected opening bracket"), "{}", stale);

    // list propagates its arguments in order.
    assert_eq!(roundtrip(&mut reader, "(list 1 2 3)"), "[1, 2, 3]");

    // Schema + store round trip.
    assert_eq!(
        roundtrip(&mut reader, "(defstruct \"Point\" :x \"int64\" :y \"float64\")"),
        "[]"
    );
    let created = roundtrip(&mut reader, "(create \"Point\" :x 10 :y 2.5)");
    let object: serde_json::Value = serde_json::from_str(&created).unwrap();
    assert_eq!(object["x"], 10);
    assert_eq!(object["y"], 2.5);

    let selected = roundtrip(&mut reader, "(select \"Point\")");
    let object: serde_json::Value = serde_json::from_str(&selected).unwrap();
    assert_eq!(object["x"], 10);

    // A second object makes select bracket its results.
    let _ = roundtrip(&mut reader, "(create \"Point\" :x 11 :y 0.5)");
    let selected = roundtrip(&mut reader, "(select \"Point\")");
    let list: serde_json::Value = serde_json::from_str(&selected).unwrap();
    assert_eq!(list.as_array().map(|a| a.len()), Some(2));

    // Duplicate defstruct is a user error.
    let response = roundtrip(&mut reader, "(defstruct \"Point\" :x \"int64\")");
    let diag: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert!(diag.as_str().unwrap().contains("already exists"));
}

#[test]
fn streamed_repl_counts_nops_and_closes_cleanly() {
    let server = TestServer::start();
    let stream = server.connect();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut reader = BufReader::new(stream);

    // Three pipelined expressions in one write, then EOF.
    reader
        .get_mut()
        .write_all(b"(nop) (nop) (nop)")
        .expect("write failed");
    reader
        .get_mut()
        .shutdown(std::net::Shutdown::Write)
        .expect("shutdown failed");

    let mut responses = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).expect("read failed");
        if n == 0 {
            break; // server closed after draining input
        }
        responses.push(line.trim_end().to_string());
    }

    // nop returns nothing: three empty-array results, then close.
    assert_eq!(responses, vec!["[]", "[]", "[]"]);
    assert_eq!(server.counters.nop_count.load(Ordering::Relaxed), 3);
}

#[test]
fn pipelining_interleaves_with_large_responses() {
    let server = TestServer::start();
    let stream = server.connect();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut reader = BufReader::new(stream);

    // A string long enough to cross the 4 KiB response buffer.
    let long = "x".repeat(10_000);
    let request = format!("(list \"{}\")", long);
    let response = roundtrip(&mut reader, &request);
    let value: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(value.as_str().map(|s| s.len()), Some(10_000));
}
