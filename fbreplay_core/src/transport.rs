use crate::observer::{ResponseFrame, ResponseObserver, deliver};
use std::io::{self, Read};
use std::time::Duration;
use thiserror::Error;

/// Failures a device collaborator can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The device answered `FAIL`. Expected and uninteresting.
    #[error("device rejected the command: {0}")]
    RemoteRejection(String),
    /// The response header was malformed or unexpected.
    #[error("unexpected response header: {0}")]
    ProtocolMismatch(String),
    /// The protocol handshake got out of step with the device.
    #[error("protocol state mismatch: {0}")]
    StateMismatch(String),
    /// The connection dropped or a read failed mid-exchange.
    #[error("connection to the device was lost: {0}")]
    TransportFailure(String),
    /// No matching device is attached (yet).
    #[error("no device found")]
    DeviceNotFound,
}

/// A live connection to a device in bootloader mode.
///
/// Every call blocks until the device answers, the timeout lapses or the
/// connection breaks. Response frames are handed to `observer` as they arrive.
pub trait DeviceSession {
    fn send_simple_command(
        &mut self,
        verb: &[u8],
        argument: Option<&[u8]>,
        timeout: Duration,
        observer: &mut dyn ResponseObserver,
    ) -> Result<(), TransportError>;

    /// Downloads `total_len` bytes from `data` and flashes them to `partition`.
    fn send_flash(
        &mut self,
        partition: &[u8],
        data: &mut dyn Read,
        total_len: u64,
        observer: &mut dyn ResponseObserver,
    ) -> Result<(), TransportError>;
}

/// Opens sessions to the primary device. A new session is opened after every
/// reconnection; sessions are never revived.
pub trait Transport {
    type Session: DeviceSession;

    fn connect(&mut self) -> Result<Self::Session, TransportError>;
}

/// The secondary channel used to reboot a device that fell out of bootloader
/// mode (adb on Android devices).
pub trait ControlChannel {
    fn connect(&mut self) -> Result<(), TransportError>;

    fn reboot_to(&mut self, target: &[u8]) -> Result<(), TransportError>;
}

/// A stand-in device that answers `OKAY` to everything.
///
/// Used for dry runs: the whole replay pipeline runs, payload bytes are
/// generated and drained, but nothing leaves the machine.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    sessions_opened: usize,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened
    }
}

impl Transport for SimulatedTransport {
    type Session = SimulatedSession;

    fn connect(&mut self) -> Result<SimulatedSession, TransportError> {
        self.sessions_opened += 1;
        tracing::debug!(session = self.sessions_opened, "simulated device connected");
        Ok(SimulatedSession::default())
    }
}

#[derive(Debug, Default)]
pub struct SimulatedSession {
    commands: usize,
    bytes_flashed: u64,
}

impl SimulatedSession {
    pub fn commands(&self) -> usize {
        self.commands
    }

    pub fn bytes_flashed(&self) -> u64 {
        self.bytes_flashed
    }
}

impl DeviceSession for SimulatedSession {
    fn send_simple_command(
        &mut self,
        verb: &[u8],
        argument: Option<&[u8]>,
        _timeout: Duration,
        observer: &mut dyn ResponseObserver,
    ) -> Result<(), TransportError> {
        self.commands += 1;
        tracing::debug!(
            verb = %String::from_utf8_lossy(verb),
            argument = ?argument.map(String::from_utf8_lossy),
            "simulated command"
        );
        deliver(observer, &ResponseFrame::new("OKAY", ""));
        Ok(())
    }

    fn send_flash(
        &mut self,
        partition: &[u8],
        data: &mut dyn Read,
        total_len: u64,
        observer: &mut dyn ResponseObserver,
    ) -> Result<(), TransportError> {
        self.commands += 1;
        let drained = io::copy(&mut data.take(total_len), &mut io::sink())
            .map_err(|e| TransportError::TransportFailure(e.to_string()))?;
        self.bytes_flashed += drained;
        deliver(
            observer,
            &ResponseFrame::new("INFO", format!("received {drained} of {total_len} bytes")),
        );
        tracing::debug!(
            partition = %String::from_utf8_lossy(partition),
            drained,
            "simulated flash"
        );
        deliver(observer, &ResponseFrame::new("OKAY", ""));
        Ok(())
    }
}

/// A control channel that is always reachable and ignores reboot requests.
#[derive(Debug, Default)]
pub struct SimulatedControlChannel {
    pub reboots: Vec<Vec<u8>>,
}

impl ControlChannel for SimulatedControlChannel {
    fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn reboot_to(&mut self, target: &[u8]) -> Result<(), TransportError> {
        self.reboots.push(target.to_vec());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted collaborators for exercising the engine without hardware.

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// One protocol call as the device saw it.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Command {
            session: usize,
            wire: Vec<u8>,
        },
        Flash {
            session: usize,
            partition: Vec<u8>,
            total_len: u64,
            read: u64,
        },
    }

    #[derive(Debug, Default)]
    pub struct Script {
        /// Replies consumed in call order; an empty queue means `OKAY`.
        pub replies: VecDeque<Result<(), TransportError>>,
        /// Connect attempts that fail with `DeviceNotFound` before one succeeds.
        pub connect_failures: usize,
        pub connects: usize,
        pub calls: Vec<Call>,
        /// Whether final frames are delivered on successful calls.
        pub silent: bool,
    }

    /// A transport whose replies are read from a shared [`Script`].
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        pub script: Rc<RefCell<Script>>,
    }

    impl ScriptedTransport {
        pub fn replying(replies: impl IntoIterator<Item = Result<(), TransportError>>) -> Self {
            let transport = Self::default();
            transport.script.borrow_mut().replies = replies.into_iter().collect();
            transport
        }

        pub fn calls(&self) -> Vec<Call> {
            self.script.borrow().calls.clone()
        }

        pub fn wires(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .map(|call| match call {
                    Call::Command { wire, .. } => String::from_utf8_lossy(&wire).into_owned(),
                    Call::Flash {
                        partition,
                        total_len,
                        ..
                    } => format!("flash:{}#{total_len}", String::from_utf8_lossy(&partition)),
                })
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        type Session = ScriptedSession;

        fn connect(&mut self) -> Result<ScriptedSession, TransportError> {
            let mut script = self.script.borrow_mut();
            if script.connect_failures > 0 {
                script.connect_failures -= 1;
                return Err(TransportError::DeviceNotFound);
            }
            script.connects += 1;
            Ok(ScriptedSession {
                id: script.connects,
                script: Rc::clone(&self.script),
            })
        }
    }

    pub struct ScriptedSession {
        id: usize,
        script: Rc<RefCell<Script>>,
    }

    impl ScriptedSession {
        fn reply(&self, observer: &mut dyn ResponseObserver) -> Result<(), TransportError> {
            let (reply, silent) = {
                let mut script = self.script.borrow_mut();
                (script.replies.pop_front().unwrap_or(Ok(())), script.silent)
            };
            match &reply {
                Ok(()) if !silent => deliver(observer, &ResponseFrame::new("OKAY", "")),
                Err(TransportError::RemoteRejection(why)) => {
                    deliver(observer, &ResponseFrame::new("FAIL", why.clone()))
                }
                _ => {}
            }
            reply
        }
    }

    impl DeviceSession for ScriptedSession {
        fn send_simple_command(
            &mut self,
            verb: &[u8],
            argument: Option<&[u8]>,
            _timeout: Duration,
            observer: &mut dyn ResponseObserver,
        ) -> Result<(), TransportError> {
            let mut wire = verb.to_vec();
            if let Some(arg) = argument {
                wire.push(b':');
                wire.extend_from_slice(arg);
            }
            self.script.borrow_mut().calls.push(Call::Command {
                session: self.id,
                wire,
            });
            self.reply(observer)
        }

        fn send_flash(
            &mut self,
            partition: &[u8],
            data: &mut dyn Read,
            total_len: u64,
            observer: &mut dyn ResponseObserver,
        ) -> Result<(), TransportError> {
            let read = io::copy(data, &mut io::sink()).unwrap_or_default();
            self.script.borrow_mut().calls.push(Call::Flash {
                session: self.id,
                partition: partition.to_vec(),
                total_len,
                read,
            });
            self.reply(observer)
        }
    }

    #[derive(Debug, Default)]
    pub struct ScriptedControlChannel {
        pub connect_failures: usize,
        pub connects: usize,
        pub reboots: Vec<Vec<u8>>,
    }

    impl ControlChannel for ScriptedControlChannel {
        fn connect(&mut self) -> Result<(), TransportError> {
            if self.connect_failures > 0 {
                self.connect_failures -= 1;
                return Err(TransportError::DeviceNotFound);
            }
            self.connects += 1;
            Ok(())
        }

        fn reboot_to(&mut self, target: &[u8]) -> Result<(), TransportError> {
            self.reboots.push(target.to_vec());
            Ok(())
        }
    }
}
