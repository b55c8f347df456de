//! A TCP listener whose accepted connections become framed unit streams.

use crate::framing::FramedStream;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Accepts connections on a background thread and hands each one, framed
/// with the listener's delimiter, to the callback.
pub struct UnitListener {
    local: SocketAddr,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl UnitListener {
    /// Bind `port` (0 picks an ephemeral port) and start accepting.
    pub fn listen<F>(port: u16, delim: &[u8], mut callback: F) -> io::Result<UnitListener>
    where
        F: FnMut(FramedStream<TcpStream>, SocketAddr) + Send + 'static,
    {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        // polled accept so teardown does not hang on a blocking accept
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let delim = delim.to_vec();
        let join = std::thread::spawn(move || {
            tracing::debug!(target: "ceptr::socket", %local, "listening");
            while !thread_stop.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        tracing::debug!(target: "ceptr::socket", %peer, "accepted");
                        if stream.set_nonblocking(false).is_err() {
                            continue;
                        }
                        callback(FramedStream::new(stream, &delim), peer);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(25));
                    }
                    Err(e) => {
                        tracing::warn!(target: "ceptr::socket", error = %e, "accept failed");
                        break;
                    }
                }
            }
        });
        Ok(UnitListener {
            local,
            stop,
            join: Some(join),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Stop accepting and join the accept thread.
    pub fn kill(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for UnitListener {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::DELIM_LF;
    use parking_lot::Mutex;
    use std::io::Write;

    #[test]
    fn accepted_connections_are_framed() {
        let units: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = units.clone();
        let listener = UnitListener::listen(0, DELIM_LF, move |mut stream, _peer| {
            while let Ok(Some(u)) = stream.read_unit() {
                sink.lock().push(u);
            }
        })
        .unwrap();

        let mut conn = TcpStream::connect(listener.local_addr()).unwrap();
        conn.write_all(b"hello\nworld").unwrap();
        drop(conn);

        // the accept thread frames the connection before we tear down
        for _ in 0..100 {
            if units.lock().len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        listener.kill();
        assert_eq!(
            *units.lock(),
            vec![b"hello".to_vec(), b"world".to_vec()]
        );
    }
}
