//! TCP listener and per-connection client handler (spec.md §4.5).

use crate::frame::required_frame_len;
use crate::protocol::Engine;
use socket2::{Domain, Socket, Type};
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receive/send buffer size. 512 bytes comfortably covers the largest legal
/// Modbus TCP frame (7-byte MBAP + 253-byte PDU = 260 bytes).
const RECV_BUF_SIZE: usize = 512;

/// How often the accept loop and each client handler re-check the run flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Listening socket plus its accept loop thread.
///
/// Binds `0.0.0.0:port` with `SO_REUSEADDR`, a backlog of 128, and accepts
/// in a loop, handing each connection to a newly spawned handler thread. A
/// handle to every spawned handler is retained so [`Listener::join`] can
/// wait for all of them, not just the accept loop itself.
pub struct Listener {
    accept_thread: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind and start accepting connections in a background thread.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from socket creation, binding, or listening.
    pub fn bind(port: u16, engine: Arc<Engine>, running: Arc<AtomicBool>) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nodelay(true)?;
        let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        socket.set_nonblocking(true)?;
        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening for Modbus TCP clients");

        let accept_thread = thread::spawn(move || accept_loop(listener, engine, running));

        Ok(Self { accept_thread, local_addr })
    }

    /// The address actually bound (useful when `port` was `0` in tests).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the accept loop — and every handler it spawned — has
    /// exited. Shutdown is driven by clearing the run flag passed to
    /// [`Listener::bind`]; this call only waits for that to take effect.
    ///
    /// # Panics
    ///
    /// Panics if the accept loop thread itself panicked.
    pub fn join(self) {
        self.accept_thread.join().expect("listener accept thread panicked");
    }
}

fn accept_loop(listener: TcpListener, engine: Arc<Engine>, running: Arc<AtomicBool>) {
    let handlers: Mutex<Vec<JoinHandle<()>>> = Mutex::new(Vec::new());

    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "client connected");
                let engine = Arc::clone(&engine);
                let running = Arc::clone(&running);
                let handle = thread::spawn(move || handle_client(stream, peer, &engine, &running));
                handlers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(handle);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    let stragglers = handlers.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
    for handle in stragglers {
        let _ = handle.join();
    }
    info!("listener stopped");
}

fn handle_client(mut stream: TcpStream, peer: SocketAddr, engine: &Engine, running: &AtomicBool) {
    let _ = stream.set_nodelay(true);
    let _ = stream.set_read_timeout(Some(POLL_INTERVAL));

    let mut buf = [0u8; RECV_BUF_SIZE];
    let mut filled = 0usize;

    while running.load(Ordering::Acquire) {
        let read_result = stream.read(&mut buf[filled..]);
        match read_result {
            Ok(0) => {
                debug!(%peer, "peer closed connection");
                break;
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                break;
            }
        }

        loop {
            let Some(frame_len) = required_frame_len(&buf[..filled]) else {
                break;
            };
            if frame_len > RECV_BUF_SIZE {
                warn!(%peer, frame_len, "frame exceeds buffer capacity, dropping connection buffer");
                filled = 0;
                break;
            }
            if filled < frame_len {
                break;
            }

            if let Some(response) = engine.handle(&buf[..frame_len]) {
                if let Err(e) = stream.write_all(&response) {
                    warn!(%peer, error = %e, "write failed");
                    return;
                }
            }

            buf.copy_within(frame_len..filled, 0);
            filled -= frame_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RegisterStore;
    use std::io::{Read as _, Write as _};
    use std::net::TcpStream as ClientStream;

    fn spawn_test_listener(unit_id: u8) -> (Listener, Arc<AtomicBool>) {
        let store = Arc::new(RegisterStore::new(100, 100, 100, 100));
        let engine = Arc::new(Engine::new(unit_id, store));
        let running = Arc::new(AtomicBool::new(true));
        let listener = Listener::bind(0, engine, Arc::clone(&running)).expect("bind should succeed");
        (listener, running)
    }

    #[test]
    fn accepts_and_answers_a_request() {
        let (listener, running) = spawn_test_listener(1);
        let addr = listener.local_addr();

        let mut client = ClientStream::connect(addr).expect("connect should succeed");
        client.set_nodelay(true).unwrap();
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        client.write_all(&req).unwrap();

        let mut resp = vec![0u8; 29];
        client.read_exact(&mut resp).unwrap();
        assert_eq!(resp[0..2], [0x00, 0x01]);
        assert_eq!(resp[7], 0x03);

        running.store(false, Ordering::Release);
        drop(client);
        listener.join();
    }

    #[test]
    fn split_frame_across_two_writes_is_reassembled() {
        let (listener, running) = spawn_test_listener(1);
        let addr = listener.local_addr();

        let mut client = ClientStream::connect(addr).expect("connect should succeed");
        client.set_nodelay(true).unwrap();
        let req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        client.write_all(&req[..4]).unwrap();
        thread::sleep(Duration::from_millis(20));
        client.write_all(&req[4..]).unwrap();

        let mut resp = vec![0u8; 29];
        client.read_exact(&mut resp).unwrap();
        assert_eq!(resp[7], 0x03);

        running.store(false, Ordering::Release);
        drop(client);
        listener.join();
    }

    #[test]
    fn wrong_unit_id_gets_no_response_but_connection_stays_open() {
        let (listener, running) = spawn_test_listener(1);
        let addr = listener.local_addr();

        let mut client = ClientStream::connect(addr).expect("connect should succeed");
        client.set_nodelay(true).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        let wrong_unit_req = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x00, 0x00, 0x00, 0x0A];
        client.write_all(&wrong_unit_req).unwrap();

        let mut probe = [0u8; 1];
        let err = client.read(&mut probe).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);

        let good_req = [0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        client.write_all(&good_req).unwrap();
        let mut resp = vec![0u8; 11];
        client.read_exact(&mut resp).unwrap();
        assert_eq!(resp[7], 0x03);

        running.store(false, Ordering::Release);
        drop(client);
        listener.join();
    }
}
