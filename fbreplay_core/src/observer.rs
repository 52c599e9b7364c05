use std::cell::Cell;
use std::fmt;

/// Four-byte response headers defined by the fastboot protocol.
pub const HEADER_OKAY: &[u8] = b"OKAY";
pub const HEADER_FAIL: &[u8] = b"FAIL";
pub const HEADER_INFO: &[u8] = b"INFO";
pub const HEADER_TEXT: &[u8] = b"TEXT";
pub const HEADER_DATA: &[u8] = b"DATA";

/// One response frame read back from the device: a header and its message.
#[derive(Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub header: Vec<u8>,
    pub message: Vec<u8>,
}

/// Whether a frame ends the exchange or just reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Final,
    Progress,
}

impl ResponseFrame {
    pub fn new(header: impl Into<Vec<u8>>, message: impl Into<Vec<u8>>) -> Self {
        Self {
            header: header.into(),
            message: message.into(),
        }
    }

    /// `OKAY` and `FAIL` end an exchange. Everything else, including headers
    /// the protocol does not define, is treated as progress.
    pub fn kind(&self) -> FrameKind {
        if self.header == HEADER_OKAY || self.header == HEADER_FAIL {
            FrameKind::Final
        } else {
            FrameKind::Progress
        }
    }

    /// The message with trailing NUL padding removed.
    pub fn trimmed_message(&self) -> &[u8] {
        trim_nuls(&self.message)
    }
}

fn trim_nuls(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |last| last + 1);
    &bytes[..end]
}

impl fmt::Debug for ResponseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFrame")
            .field("header", &String::from_utf8_lossy(&self.header))
            .field("message", &String::from_utf8_lossy(&self.message))
            .finish()
    }
}

/// Receives the frames of a single protocol exchange.
///
/// Transports hand every frame they read to the observer passed into the call,
/// normally through [`deliver`]. Observers are created per call and never
/// outlive it, so no state leaks from one exchange into the next.
pub trait ResponseObserver {
    /// Called for `INFO`, `TEXT`, `DATA` and unrecognized frames.
    fn on_progress_frame(&mut self, frame: &ResponseFrame);

    /// Called for the `OKAY` or `FAIL` frame that ends the exchange.
    fn on_final_frame(&mut self, frame: &ResponseFrame);
}

/// Routes `frame` to the observer method matching its kind.
pub fn deliver(observer: &mut dyn ResponseObserver, frame: &ResponseFrame) {
    match frame.kind() {
        FrameKind::Final => observer.on_final_frame(frame),
        FrameKind::Progress => observer.on_progress_frame(frame),
    }
}

/// Set once the final frame of one call has been seen.
///
/// A fresh token is created for every protocol call and lent to that call's
/// observer; the caller polls it afterwards.
#[derive(Debug, Default)]
pub struct CompletionToken {
    done: Cell<bool>,
}

impl CompletionToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        self.done.set(true);
    }

    pub fn is_complete(&self) -> bool {
        self.done.get()
    }
}

/// The observer used by the replay engine: logs every frame and marks the
/// call's completion token on the final one.
///
/// Messages listed in `quiet` (compared without trailing NULs) are logged at
/// trace level only, so generic rejections don't drown out the output.
pub struct LoggingObserver<'a> {
    label: &'a str,
    quiet: &'a [Vec<u8>],
    completion: &'a CompletionToken,
}

impl<'a> LoggingObserver<'a> {
    pub fn new(label: &'a str, quiet: &'a [Vec<u8>], completion: &'a CompletionToken) -> Self {
        Self {
            label,
            quiet,
            completion,
        }
    }

    /// Whether `message` is on the quiet list, ignoring trailing NULs.
    fn is_quiet(&self, message: &[u8]) -> bool {
        let message = trim_nuls(message);
        self.quiet.iter().any(|q| q.as_slice() == message)
    }

    fn log(&self, frame: &ResponseFrame) {
        let header = String::from_utf8_lossy(&frame.header);
        let text = String::from_utf8_lossy(frame.trimmed_message());
        if self.is_quiet(&frame.message) {
            tracing::trace!(
                action = self.label,
                "Output from {} is {}: {}",
                self.label,
                header,
                text
            );
        } else {
            tracing::info!(
                action = self.label,
                "Output from {} is {}: {}",
                self.label,
                header,
                text
            );
        }
    }
}

impl ResponseObserver for LoggingObserver<'_> {
    fn on_progress_frame(&mut self, frame: &ResponseFrame) {
        self.log(frame);
    }

    fn on_final_frame(&mut self, frame: &ResponseFrame) {
        self.log(frame);
        self.completion.complete();
    }
}
