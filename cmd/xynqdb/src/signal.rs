//! Process signal handling: SIGINT/SIGTERM stop the pool.

use std::sync::OnceLock;

use xynq_runtime::StopHandle;

static STOP_HANDLE: OnceLock<StopHandle> = OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    // Async-signal-safe: atomic stores plus one write(2).
    if let Some(handle) = STOP_HANDLE.get() {
        handle.stop();
    }
}

/// Install SIGINT/SIGTERM handlers routing to the pool's stop handle.
pub fn install(handle: StopHandle) {
    if STOP_HANDLE.set(handle).is_err() {
        return; // already installed
    }

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as usize;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
    }
}
