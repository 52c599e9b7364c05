//! Turns classified candidates into executable actions.
//!
//! Two safety filters live here. Candidates shaped like `erase:<anything>` are
//! removed before normalization and never surface again. Actions whose verb
//! mentions `reboot` are kept but turned into no-ops so the replay session is
//! not cut short by a reboot it asked for itself.

use crate::classifier::{Candidate, Shape, compile};
use crate::extractor::extract;
use crate::random_source::FlashPayload;
use regex::bytes::Regex;
use std::fmt;
use std::io::{self, Read};
use std::sync::LazyLock;

static DESTRUCTIVE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?s-u)^erase:.*$"));

const REBOOT: &[u8] = b"reboot";

/// What the engine does with an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// A single command. `argument: None` means the command is sent bare,
    /// which is not the same as `Some(vec![])` (a trailing `:` on the wire).
    Command {
        verb: Vec<u8>,
        argument: Option<Vec<u8>>,
    },
    /// Download each payload in turn and flash it to `partition`.
    Flash {
        partition: Vec<u8>,
        payloads: Vec<FlashPayload>,
    },
    /// A command that would reboot the device. Never sent.
    Suppressed {
        verb: Vec<u8>,
        argument: Option<Vec<u8>>,
    },
}

/// A fully resolved command derived from one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    shape: Shape,
    kind: ActionKind,
}

impl Action {
    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    /// The bytes this action puts on the wire, e.g. `getvar:version`.
    pub fn wire_form(&self) -> Vec<u8> {
        match &self.kind {
            ActionKind::Command { verb, argument } | ActionKind::Suppressed { verb, argument } => {
                join(verb, argument.as_deref())
            }
            ActionKind::Flash { partition, .. } => join(b"flash", Some(partition)),
        }
    }

    /// Lossy text form of [`Action::wire_form`] for logs.
    pub fn label(&self) -> String {
        String::from_utf8_lossy(&self.wire_form()).into_owned()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

fn join(verb: &[u8], argument: Option<&[u8]>) -> Vec<u8> {
    let mut wire = verb.to_vec();
    if let Some(arg) = argument {
        wire.push(b':');
        wire.extend_from_slice(arg);
    }
    wire
}

/// True for candidates that must never be replayed (`erase:*`).
pub fn is_destructive(candidate: &[u8]) -> bool {
    DESTRUCTIVE.is_match(candidate)
}

fn is_separator(byte: u8) -> bool {
    byte == b':' || byte == b' '
}

fn split_once_at(bytes: &[u8], pred: impl Fn(u8) -> bool) -> (Vec<u8>, Option<Vec<u8>>) {
    match bytes.iter().position(|b| pred(*b)) {
        Some(at) => (bytes[..at].to_vec(), Some(bytes[at + 1..].to_vec())),
        None => (bytes.to_vec(), None),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Maps a candidate onto the action that replays it.
///
/// `oem` candidates are sent verbatim as the verb with no argument, so the
/// bytes on the wire are exactly the bytes found in the binary. This also
/// lets `oem reboot...` variants trip the reboot filter.
pub fn normalize(candidate: &Candidate) -> Action {
    let bytes = candidate.as_bytes();
    let shape = candidate.shape();

    let (verb, argument) = match shape {
        Shape::Oem => (bytes.to_vec(), None),
        Shape::Getvar | Shape::Flashing => split_once_at(bytes, is_separator),
        Shape::Flash => {
            let (_, partition) = split_once_at(bytes, is_separator);
            return Action {
                shape,
                kind: ActionKind::Flash {
                    partition: partition.unwrap_or_default(),
                    payloads: FlashPayload::SEQUENCE.to_vec(),
                },
            };
        }
        Shape::Generic => split_once_at(bytes, |b| b == b':'),
    };

    let kind = if contains(&verb, REBOOT) {
        ActionKind::Suppressed { verb, argument }
    } else {
        ActionKind::Command { verb, argument }
    };
    Action { shape, kind }
}

/// Mines `reader` for replayable actions, in stream order.
///
/// Destructive candidates are dropped silently.
pub fn plan<R: Read>(reader: R) -> io::Result<Vec<Action>> {
    let mut actions = Vec::new();
    for token in extract(reader) {
        let Some(candidate) = Candidate::from_token(token?) else {
            continue;
        };
        if is_destructive(candidate.as_bytes()) {
            continue;
        }
        actions.push(normalize(&candidate));
    }
    Ok(actions)
}
