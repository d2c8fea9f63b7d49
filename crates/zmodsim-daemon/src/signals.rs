//! Signal handling for graceful shutdown (spec.md §4.10).
//!
//! SIGTERM and SIGINT clear the same run flag the supervisor otherwise
//! clears itself, so a signal-driven shutdown and the normal "listener
//! exited" path are indistinguishable from the supervisor's point of view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Handle for signal-driven shutdown.
///
/// Holds the shared run flag and forwards SIGTERM/SIGINT into it from a
/// small dedicated polling thread, since signal handlers themselves must
/// stay async-signal-safe and can only touch plain atomics.
pub struct SignalHandler {
    run_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register SIGTERM/SIGINT handlers that clear `run_flag`.
    ///
    /// # Errors
    ///
    /// This never actually fails on Unix but keeps a `Result` return so a
    /// future non-Unix fallback can surface a real error.
    pub fn install(run_flag: Arc<AtomicBool>) -> std::io::Result<Self> {
        let handler = Self {
            run_flag: Arc::clone(&run_flag),
        };

        #[cfg(unix)]
        register_unix_handlers(run_flag);

        Ok(handler)
    }

    /// Whether a signal (or anything else) has cleared the run flag.
    #[inline]
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        !self.run_flag.load(Ordering::Acquire)
    }
}

#[cfg(unix)]
fn register_unix_handlers(run_flag: Arc<AtomicBool>) {
    use std::os::raw::c_int;
    use std::time::Duration;

    static SIGNALED: AtomicBool = AtomicBool::new(false);

    std::thread::spawn(move || loop {
        if SIGNALED.swap(false, Ordering::Relaxed) {
            info!("shutdown signal received");
            run_flag.store(false, Ordering::Release);
        }
        if !run_flag.load(Ordering::Acquire) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    });

    unsafe {
        libc::signal(libc::SIGTERM, sigterm_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, sigterm_handler as libc::sighandler_t);
    }

    extern "C" fn sigterm_handler(_: c_int) {
        SIGNALED.store(true, Ordering::Relaxed);
    }

    debug!("unix signal handlers registered");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_requested_reflects_cleared_run_flag() {
        let run_flag = Arc::new(AtomicBool::new(true));
        let handler = SignalHandler::install(Arc::clone(&run_flag)).unwrap();
        assert!(!handler.shutdown_requested());

        run_flag.store(false, Ordering::Release);
        assert!(handler.shutdown_requested());
    }
}
