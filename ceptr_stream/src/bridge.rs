//! The stream→signal adapter: each framed unit becomes a `LINE`-carrier
//! signal pushed into a host's injection channel. The host delivers it to
//! the destination receptor on its own thread, so the pump never touches
//! receptor state.

use crate::framing::FramedStream;
use ceptr_core::semtable::sys::LINE;
use ceptr_core::signal::make_signal;
use ceptr_core::tree::{Surface, Tree};
use ceptr_core::vmhost::SignalInjector;
use ceptr_core::{ReceptorAddress, Symbol};
use std::io::Read;
use std::thread::JoinHandle;
use uuid::Uuid;

/// Pump units off a stream as signals until end of input, the stream
/// errors, or the host goes away. Unit bytes travel as a `LINE` string
/// (lossily decoded).
pub fn pump_units<R: Read + Send + 'static>(
    mut stream: FramedStream<R>,
    injector: SignalInjector,
    from: ReceptorAddress,
    to: ReceptorAddress,
    aspect: Symbol,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        match stream.read_unit() {
            Ok(Some(unit)) => {
                let text = String::from_utf8_lossy(&unit).into_owned();
                let body = Tree::with_root(LINE, Surface::Str(text));
                let s = make_signal(
                    from,
                    to,
                    aspect,
                    LINE,
                    &body,
                    Some(Uuid::new_v4()),
                    None,
                    None,
                );
                if injector.inject(s).is_err() {
                    tracing::debug!(target: "ceptr::stream", "host gone, pump stopping");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(target: "ceptr::stream", error = %e, "stream read failed");
                break;
            }
        }
    })
}
