//! A background thread that reads units off a stream, gated by a mutex and
//! condition variable: the reader parks after each unit until the consumer
//! takes it, so a slow consumer backpressures the stream instead of
//! buffering it.

use crate::framing::FramedStream;
use parking_lot::{Condvar, Mutex};
use std::io::Read;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Default)]
struct ReaderState {
    unit: Option<Vec<u8>>,
    eof: bool,
    dying: bool,
    error: Option<String>,
}

struct Shared {
    state: Mutex<ReaderState>,
    cv: Condvar,
}

pub struct UnitReader {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
    /// For TCP-backed readers: a handle to shut the socket down, which
    /// unblocks a reader parked in `recv`.
    socket: Option<TcpStream>,
}

impl UnitReader {
    /// Spawn the reader thread over any byte source.
    ///
    /// [`UnitReader::kill`] on a generic source waits for the in-flight
    /// read to return; use [`UnitReader::spawn_tcp`] for sockets so kill
    /// can unblock it.
    pub fn spawn<R: Read + Send + 'static>(reader: R, delim: &[u8]) -> UnitReader {
        Self::spawn_inner(reader, delim, None)
    }

    /// Spawn over a TCP stream, keeping a shutdown handle for teardown.
    pub fn spawn_tcp(stream: TcpStream, delim: &[u8]) -> std::io::Result<UnitReader> {
        let socket = stream.try_clone()?;
        Ok(Self::spawn_inner(stream, delim, Some(socket)))
    }

    fn spawn_inner<R: Read + Send + 'static>(
        reader: R,
        delim: &[u8],
        socket: Option<TcpStream>,
    ) -> UnitReader {
        let shared = Arc::new(Shared {
            state: Mutex::new(ReaderState::default()),
            cv: Condvar::new(),
        });
        let ours = shared.clone();
        let mut stream = FramedStream::new(reader, delim);
        let join = std::thread::spawn(move || {
            loop {
                match stream.read_unit() {
                    Ok(Some(unit)) => {
                        let mut st = shared.state.lock();
                        while st.unit.is_some() && !st.dying {
                            shared.cv.wait(&mut st);
                        }
                        if st.dying {
                            break;
                        }
                        st.unit = Some(unit);
                        shared.cv.notify_all();
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(target: "ceptr::stream", error = %e, "reader stopping");
                        shared.state.lock().error = Some(e.to_string());
                        break;
                    }
                }
            }
            // whatever the exit path, wake any blocked consumer for good
            let mut st = shared.state.lock();
            st.eof = true;
            shared.cv.notify_all();
        });
        UnitReader {
            shared: ours,
            join: Some(join),
            socket,
        }
    }

    /// Block until the next unit is ready; `None` at end of input.
    pub fn next_unit(&self) -> Option<Vec<u8>> {
        let mut st = self.shared.state.lock();
        loop {
            if let Some(u) = st.unit.take() {
                self.shared.cv.notify_all();
                return Some(u);
            }
            if st.eof {
                return None;
            }
            self.shared.cv.wait(&mut st);
        }
    }

    /// A unit if one is ready right now.
    pub fn try_unit(&self) -> Option<Vec<u8>> {
        let mut st = self.shared.state.lock();
        let u = st.unit.take();
        if u.is_some() {
            self.shared.cv.notify_all();
        }
        u
    }

    pub fn error(&self) -> Option<String> {
        self.shared.state.lock().error.clone()
    }

    /// Tear the reader down: mark it dying, unblock it (shutting the
    /// socket down when there is one) and wait for the thread to exit.
    pub fn kill(mut self) {
        {
            let mut st = self.shared.state.lock();
            st.dying = true;
            self.shared.cv.notify_all();
        }
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::DELIM_LF;
    use std::io::Cursor;

    #[test]
    fn units_arrive_in_order_then_eof() {
        let reader = UnitReader::spawn(Cursor::new(b"one\ntwo\nthree".to_vec()), DELIM_LF);
        assert_eq!(reader.next_unit(), Some(b"one".to_vec()));
        assert_eq!(reader.next_unit(), Some(b"two".to_vec()));
        assert_eq!(reader.next_unit(), Some(b"three".to_vec()));
        assert_eq!(reader.next_unit(), None);
        assert_eq!(reader.error(), None);
        reader.kill();
    }

    #[test]
    fn the_reader_waits_for_the_consumer() {
        let reader = UnitReader::spawn(Cursor::new(b"a\nb\n".to_vec()), DELIM_LF);
        // only one unit is buffered however fast the producer is
        let first = reader.next_unit();
        assert_eq!(first, Some(b"a".to_vec()));
        assert_eq!(reader.next_unit(), Some(b"b".to_vec()));
        assert_eq!(reader.next_unit(), None);
        reader.kill();
    }

    #[test]
    fn kill_mid_stream_joins() {
        let reader = UnitReader::spawn(Cursor::new(b"a\nb\nc\n".to_vec()), DELIM_LF);
        assert_eq!(reader.next_unit(), Some(b"a".to_vec()));
        reader.kill();
    }
}
