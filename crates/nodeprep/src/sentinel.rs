//! Idle state after configuration.
//!
//! The process stays alive so its container reports ready, but does no work:
//! no timers, no I/O.

use std::thread;

use tracing::info;

/// Block the calling thread forever
pub fn idle() -> ! {
    info!("Host successfully configured");
    loop {
        // park() may return spuriously
        thread::park();
    }
}
