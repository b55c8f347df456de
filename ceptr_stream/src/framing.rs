//! Delimiter framing: scanning a growing byte buffer for units.
//!
//! A unit is the longest prefix of the buffer up to (not including) the
//! first occurrence of the delimiter. The scanner walks the states
//! `Initial → (Partial | Success | Complete)`; a partial scan resumes where
//! it stopped instead of rescanning, backing up just enough to catch a
//! delimiter split across reads. On end of input a non-empty partial is
//! delivered as a final unit.

use std::io::Read;

pub const DELIM_LF: &[u8] = b"\n";
pub const DELIM_CRLF: &[u8] = b"\r\n";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanState {
    /// Nothing scanned yet.
    Initial,
    /// No delimiter found so far; more input may complete the unit.
    Partial,
    /// A unit is available.
    Success,
    /// The whole buffer has been consumed.
    Complete,
}

/// The scanning state machine, independent of where bytes come from.
#[derive(Clone, Debug)]
pub struct UnitScanner {
    buf: Vec<u8>,
    delim: Vec<u8>,
    state: ScanState,
    unit_start: usize,
    unit_size: usize,
    scanned: usize,
}

impl UnitScanner {
    pub fn new(delim: &[u8]) -> UnitScanner {
        assert!(!delim.is_empty(), "a delimiter needs at least one byte");
        UnitScanner {
            buf: Vec::new(),
            delim: delim.to_vec(),
            state: ScanState::Initial,
            unit_start: 0,
            unit_size: 0,
            scanned: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Append raw input.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Advance the state machine: position past the previous unit, then
    /// look for the next delimiter.
    pub fn scan(&mut self) -> ScanState {
        match self.state {
            ScanState::Initial => self.unit_start = 0,
            ScanState::Success => self.unit_start += self.unit_size + self.delim.len(),
            _ => {}
        }
        if self.unit_start >= self.buf.len() {
            self.state = ScanState::Complete;
            return self.state;
        }
        let resume = if self.state == ScanState::Partial {
            // back up so a delimiter split across reads is still seen
            self.scanned
                .saturating_sub(self.delim.len() - 1)
                .max(self.unit_start)
        } else {
            self.unit_start
        };
        match self.buf[resume..]
            .windows(self.delim.len())
            .position(|w| w == self.delim)
        {
            Some(pos) => {
                self.unit_size = resume + pos - self.unit_start;
                self.state = ScanState::Success;
            }
            None => {
                self.scanned = self.buf.len();
                self.state = ScanState::Partial;
            }
        }
        self.state
    }

    /// The current unit; only meaningful in [`ScanState::Success`].
    pub fn unit(&self) -> &[u8] {
        &self.buf[self.unit_start..self.unit_start + self.unit_size]
    }

    /// Whether undelivered bytes remain past the last unit.
    pub fn has_trailing(&self) -> bool {
        self.unit_start < self.buf.len()
    }

    /// Deliver the trailing bytes as a final unit (end-of-input only).
    pub fn take_trailing(&mut self) -> Vec<u8> {
        let unit = self.buf[self.unit_start..].to_vec();
        self.unit_size = self.buf.len() - self.unit_start;
        self.state = ScanState::Success;
        unit
    }

    /// Drop consumed bytes and start a fresh scan over what remains.
    pub fn compact(&mut self) {
        let consumed = self.unit_start.min(self.buf.len());
        self.buf.drain(..consumed);
        self.unit_start = 0;
        self.scanned = 0;
        self.state = ScanState::Initial;
    }
}

/// A unit reader over any byte source.
pub struct FramedStream<R> {
    reader: R,
    scanner: UnitScanner,
    eof: bool,
    /// Bytes per read; doubles while a unit stays incomplete, standing in
    /// for the original buffer growth on overflow.
    chunk: usize,
}

const INITIAL_CHUNK: usize = 256;
const MAX_CHUNK: usize = 64 * 1024;

impl<R: Read> FramedStream<R> {
    pub fn new(reader: R, delim: &[u8]) -> FramedStream<R> {
        FramedStream {
            reader,
            scanner: UnitScanner::new(delim),
            eof: false,
            chunk: INITIAL_CHUNK,
        }
    }

    fn load(&mut self) -> std::io::Result<()> {
        let mut chunk = vec![0u8; self.chunk];
        let n = self.reader.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
            tracing::debug!(target: "ceptr::stream", "end of input");
        } else {
            self.scanner.feed(&chunk[..n]);
        }
        Ok(())
    }

    /// The next unit, or `None` at end of input. A trailing partial at end
    /// of input comes back as the final unit.
    pub fn read_unit(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            match self.scanner.scan() {
                ScanState::Success => {
                    self.chunk = INITIAL_CHUNK;
                    return Ok(Some(self.scanner.unit().to_vec()));
                }
                ScanState::Complete => {
                    self.scanner.compact();
                    if self.eof {
                        return Ok(None);
                    }
                    self.load()?;
                }
                ScanState::Partial => {
                    if self.eof {
                        if self.scanner.has_trailing() {
                            return Ok(Some(self.scanner.take_trailing()));
                        }
                        return Ok(None);
                    }
                    self.chunk = (self.chunk * 2).min(MAX_CHUNK);
                    self.load()?;
                }
                ScanState::Initial => unreachable!("scan never yields Initial"),
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn units(input: &[u8], delim: &[u8]) -> Vec<Vec<u8>> {
        let mut s = FramedStream::new(Cursor::new(input.to_vec()), delim);
        let mut out = Vec::new();
        while let Some(u) = s.read_unit().unwrap() {
            out.push(u);
        }
        out
    }

    #[test]
    fn lf_delimited_units_then_eof() {
        assert_eq!(units(b"abc\ndef\n", DELIM_LF), vec![b"abc".to_vec(), b"def".to_vec()]);
    }

    #[test]
    fn trailing_partial_is_a_final_unit() {
        assert_eq!(units(b"abc", DELIM_LF), vec![b"abc".to_vec()]);
        assert_eq!(units(b"abc\nde", DELIM_LF), vec![b"abc".to_vec(), b"de".to_vec()]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert_eq!(units(b"", DELIM_LF), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn empty_units_between_delimiters() {
        assert_eq!(
            units(b"a\n\nb\n", DELIM_LF),
            vec![b"a".to_vec(), b"".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn crlf_delimiter() {
        assert_eq!(
            units(b"ab\r\ncd\r\nef", DELIM_CRLF),
            vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()]
        );
    }

    /// Hands out one byte per read, forcing the scanner to resume partial
    /// scans and to see delimiters split across reads.
    struct Dribble(Vec<u8>, usize);
    impl Read for Dribble {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.1 >= self.0.len() {
                return Ok(0);
            }
            buf[0] = self.0[self.1];
            self.1 += 1;
            Ok(1)
        }
    }

    #[test]
    fn delimiter_split_across_reads() {
        let mut s = FramedStream::new(Dribble(b"ab\r\ncd".to_vec(), 0), DELIM_CRLF);
        assert_eq!(s.read_unit().unwrap(), Some(b"ab".to_vec()));
        assert_eq!(s.read_unit().unwrap(), Some(b"cd".to_vec()));
        assert_eq!(s.read_unit().unwrap(), None);
    }

    #[test]
    fn long_units_grow_the_buffer() {
        let unit = vec![b'x'; 100_000];
        let mut input = unit.clone();
        input.push(b'\n');
        input.extend_from_slice(b"tail\n");
        let got = units(&input, DELIM_LF);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], unit);
        assert_eq!(got[1], b"tail".to_vec());
    }

    #[test]
    fn scanner_states_walk_the_contract() {
        let mut sc = UnitScanner::new(DELIM_LF);
        assert_eq!(sc.state(), ScanState::Initial);
        sc.feed(b"ab");
        assert_eq!(sc.scan(), ScanState::Partial);
        sc.feed(b"c\nd");
        assert_eq!(sc.scan(), ScanState::Success);
        assert_eq!(sc.unit(), b"abc");
        assert_eq!(sc.scan(), ScanState::Partial);
        assert!(sc.has_trailing());
        assert_eq!(sc.take_trailing(), b"d".to_vec());
        assert_eq!(sc.scan(), ScanState::Complete);
    }
}
