use std::io::{BufRead, Write};

/// How to get a lost device back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Reboot the device into its bootloader over the control channel, then
    /// wait for it.
    Active,
    /// Wait for the device to come back by itself.
    Passive,
}

/// Decides, for each lost connection, which recovery path to take.
///
/// `interrupted` is the wire form of the action that was running when the
/// device went away.
pub trait RecoveryStrategy {
    fn choose(&mut self, interrupted: &str) -> RecoveryMode;
}

/// Always takes the same path.
#[derive(Debug, Clone, Copy)]
pub struct FixedRecovery(pub RecoveryMode);

impl RecoveryStrategy for FixedRecovery {
    fn choose(&mut self, _interrupted: &str) -> RecoveryMode {
        self.0
    }
}

/// Asks the operator. Anything but `y`/`Y` means passive recovery.
pub struct PromptRecovery<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptRecovery<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> RecoveryStrategy for PromptRecovery<R, W> {
    fn choose(&mut self, interrupted: &str) -> RecoveryMode {
        let prompt = write!(
            self.output,
            "Device lost after {interrupted}. Reboot it via the control channel? (y/N): "
        )
        .and_then(|()| self.output.flush());
        if let Err(e) = prompt {
            tracing::warn!("could not write recovery prompt: {e}");
        }

        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(_) if answer.trim().eq_ignore_ascii_case("y") => RecoveryMode::Active,
            Ok(_) => RecoveryMode::Passive,
            Err(e) => {
                tracing::warn!("could not read recovery answer, waiting passively: {e}");
                RecoveryMode::Passive
            }
        }
    }
}
