//! Background auto-increment workers (spec.md §4.4).
//!
//! One independent worker thread per configured bank. Workers never observe
//! each other directly; they serialize only through the store's lock.

use crate::store::{Bank, RegisterStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};
use zmodsim_common::config::AutoIncrementConfig;

/// A running (or joinable, once stopped) auto-increment worker.
pub struct Worker {
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn a worker that ticks `config.interval_ms` apart, incrementing
    /// `bank` at `config.addresses` by `config.increment` with wrap
    /// threshold `config.max`, until `running` clears.
    ///
    /// Returns `None` if `config.enabled` is false — nothing to spawn.
    #[must_use]
    pub fn spawn(
        bank: Bank,
        config: AutoIncrementConfig,
        store: Arc<RegisterStore>,
        running: Arc<AtomicBool>,
    ) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let bank_name = match bank {
            Bank::Holding => "holding",
            Bank::Input => "input",
        };
        let interval = Duration::from_millis(config.interval_ms);
        info!(bank = bank_name, ?interval, increment = config.increment, max = config.max, "starting auto-increment worker");

        let handle = thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                thread::sleep(interval);
                if !running.load(Ordering::Acquire) {
                    break;
                }
                store.increment(bank, &config.addresses, config.increment, config.max);
                debug!(bank = bank_name, "auto-increment tick applied");
            }
            info!(bank = bank_name, "auto-increment worker stopped");
        });

        Some(Self { handle })
    }

    /// Block until the worker thread exits.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread itself panicked.
    pub fn join(self) {
        self.handle.join().expect("auto-increment worker panicked");
    }
}
