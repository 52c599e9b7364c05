use std::fmt;
use std::io::{self, BufReader, Read};
use std::mem;

/// Lowest byte value treated as printable ASCII (space).
const PRINTABLE_MIN: u8 = 32;
/// Highest byte value treated as printable ASCII (`~`).
const PRINTABLE_MAX: u8 = 126;

/// A run of printable ASCII bytes mined from a binary stream.
///
/// Tokens are produced by [`extract`] in the order they occur in the source.
/// The last token of a stream may be empty.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Token(Vec<u8>);

impl Token {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Token(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Printable ASCII is valid UTF-8.
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

pub fn is_printable(byte: u8) -> bool {
    (PRINTABLE_MIN..=PRINTABLE_MAX).contains(&byte)
}

/// Lazy iterator over the printable runs of a byte stream.
///
/// Each non-printable byte closes the current run if it is non-empty. When the
/// stream ends, whatever has been accumulated is emitted as one final token,
/// even if that token is empty. A read error is yielded once and ends the
/// iteration.
pub struct Tokens<R: Read> {
    bytes: io::Bytes<BufReader<R>>,
    accumulator: Vec<u8>,
    finished: bool,
}

/// Starts scanning `reader` for printable runs. The reader is consumed once.
pub fn extract<R: Read>(reader: R) -> Tokens<R> {
    Tokens {
        bytes: BufReader::new(reader).bytes(),
        accumulator: Vec::new(),
        finished: false,
    }
}

impl<R: Read> Iterator for Tokens<R> {
    type Item = io::Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        for byte in self.bytes.by_ref() {
            match byte {
                Ok(b) if is_printable(b) => self.accumulator.push(b),
                Ok(_) => {
                    if !self.accumulator.is_empty() {
                        return Some(Ok(Token(mem::take(&mut self.accumulator))));
                    }
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        self.finished = true;
        Some(Ok(Token(mem::take(&mut self.accumulator))))
    }
}
