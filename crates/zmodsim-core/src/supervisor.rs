//! Process lifecycle: wires the store, workers, and listener together and
//! coordinates shutdown (spec.md §4.6).

use crate::autoincrement::Worker;
use crate::protocol::Engine;
use crate::server::Listener;
use crate::store::{Bank, RegisterStore};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use zmodsim_common::config::SimulatorConfig;

/// Owns every long-lived piece of a running simulator instance: the
/// register store, the auto-increment workers, and the TCP listener.
///
/// Construction starts everything; [`Supervisor::shutdown`] tears
/// everything back down in the reverse order, joining every thread it
/// spawned before returning.
pub struct Supervisor {
    store: Arc<RegisterStore>,
    running: Arc<AtomicBool>,
    listener: Listener,
    workers: Vec<Worker>,
}

impl Supervisor {
    /// Build the store, start configured auto-increment workers, then bind
    /// and start the listener.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from binding the listener's socket.
    pub fn start(config: &SimulatorConfig) -> std::io::Result<Self> {
        let store = Arc::new(RegisterStore::new(
            config.bank_sizes.coils,
            config.bank_sizes.discrete,
            config.bank_sizes.holding,
            config.bank_sizes.input,
        ));
        let running = Arc::new(AtomicBool::new(true));

        let mut workers = Vec::new();
        if let Some(w) = Worker::spawn(
            Bank::Holding,
            config.holding_auto.clone(),
            Arc::clone(&store),
            Arc::clone(&running),
        ) {
            workers.push(w);
        }
        if let Some(w) = Worker::spawn(
            Bank::Input,
            config.input_auto.clone(),
            Arc::clone(&store),
            Arc::clone(&running),
        ) {
            workers.push(w);
        }

        let engine = Arc::new(Engine::new(config.unit_id, Arc::clone(&store)));
        let listener = match Listener::bind(config.port, engine, Arc::clone(&running)) {
            Ok(listener) => listener,
            Err(e) => {
                running.store(false, Ordering::Release);
                for w in workers {
                    w.join();
                }
                return Err(e);
            }
        };

        info!(
            unit_id = config.unit_id,
            addr = %listener.local_addr(),
            "simulator started"
        );

        Ok(Self {
            store,
            running,
            listener,
            workers,
        })
    }

    /// The address the listener actually bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Shared run flag. A signal handler or test harness clears this to
    /// request shutdown; [`Supervisor::shutdown`] also clears it.
    #[must_use]
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Direct access to the backing store, e.g. for a test harness seeding
    /// values before a client connects.
    #[must_use]
    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    /// Clear the run flag and block until the listener, every client
    /// handler it spawned, and every auto-increment worker have exited.
    pub fn shutdown(self) {
        self.running.store(false, Ordering::Release);
        self.listener.join();
        for worker in self.workers {
            worker.join();
        }
        info!("simulator shut down");
    }
}
