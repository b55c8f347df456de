/*
    The stream boundary of the VM host.

    Bytes come in from files and sockets; this crate chops them into
    delimiter-framed units and hands each unit onward, either directly
    (FramedStream / UnitReader) or wrapped as a signal pushed into a host's
    injection channel (bridge). Nothing in here touches receptor state: the
    host drains injected signals on its own thread.
*/

pub mod bridge;
pub mod framing;
pub mod listener;
pub mod reader;

pub use bridge::pump_units;
pub use framing::{FramedStream, ScanState, UnitScanner, DELIM_CRLF, DELIM_LF};
pub use listener::UnitListener;
pub use reader::UnitReader;
