use crate::config::{EngineSettings, ReplayConfig};
use crate::normalizer::{Action, ActionKind};
use crate::observer::{CompletionToken, LoggingObserver};
use crate::random_source::FlashPayload;
use crate::recovery::{RecoveryMode, RecoveryStrategy};
use crate::transport::{ControlChannel, DeviceSession, Transport, TransportError};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::thread;

/// Outcome of sending one action to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    RemoteRejection(String),
    ProtocolMismatch(String),
    StateMismatch(String),
    TransportFailure(String),
}

impl ExecutionStatus {
    fn severity(&self) -> u8 {
        match self {
            ExecutionStatus::Success => 0,
            ExecutionStatus::RemoteRejection(_) => 1,
            ExecutionStatus::StateMismatch(_) => 2,
            ExecutionStatus::ProtocolMismatch(_) => 3,
            ExecutionStatus::TransportFailure(_) => 4,
        }
    }
}

impl From<Result<(), TransportError>> for ExecutionStatus {
    fn from(result: Result<(), TransportError>) -> Self {
        match result {
            Ok(()) => ExecutionStatus::Success,
            Err(TransportError::RemoteRejection(why)) => ExecutionStatus::RemoteRejection(why),
            Err(TransportError::ProtocolMismatch(why)) => ExecutionStatus::ProtocolMismatch(why),
            Err(TransportError::StateMismatch(why)) => ExecutionStatus::StateMismatch(why),
            Err(TransportError::TransportFailure(why)) => ExecutionStatus::TransportFailure(why),
            Err(e @ TransportError::DeviceNotFound) => {
                ExecutionStatus::TransportFailure(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Connected,
    AwaitingResponse,
    Disconnected,
    RecoveringViaSecondaryChannel,
    Reconnecting,
    TerminalSuccess,
    /// The post-recovery retry of one action failed. Per-action only: the
    /// engine reconnects and moves on.
    TerminalFailed,
}

/// What became of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed(ExecutionStatus),
    /// The device dropped, came back, and the single retry produced this.
    Recovered(ExecutionStatus),
    /// The device dropped again during the retry.
    SkippedAfterRetry(String),
    /// Would have rebooted the device.
    Suppressed,
    /// Flash fuzzing is turned off.
    FlashDisabled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub actions: usize,
    pub succeeded: usize,
    pub rejected: usize,
    pub mismatched: usize,
    pub recovered: usize,
    pub skipped_after_retry: usize,
    pub suppressed: usize,
    pub flash_disabled: usize,
}

impl SessionSummary {
    fn record(&mut self, disposition: &Disposition) {
        self.actions += 1;
        let status = match disposition {
            Disposition::Completed(status) => status,
            Disposition::Recovered(status) => {
                self.recovered += 1;
                status
            }
            Disposition::SkippedAfterRetry(_) => {
                self.skipped_after_retry += 1;
                return;
            }
            Disposition::Suppressed => {
                self.suppressed += 1;
                return;
            }
            Disposition::FlashDisabled => {
                self.flash_disabled += 1;
                return;
            }
        };
        match status {
            ExecutionStatus::Success => self.succeeded += 1,
            ExecutionStatus::RemoteRejection(_) => self.rejected += 1,
            ExecutionStatus::ProtocolMismatch(_) | ExecutionStatus::StateMismatch(_) => {
                self.mismatched += 1
            }
            ExecutionStatus::TransportFailure(_) => {}
        }
    }
}

fn report(label: &str, status: &ExecutionStatus) {
    match status {
        ExecutionStatus::Success => tracing::debug!(action = label, "{label} succeeded"),
        ExecutionStatus::RemoteRejection(why) => {
            tracing::debug!(action = label, "Failed to run {label} due to {why}")
        }
        ExecutionStatus::ProtocolMismatch(why) => {
            tracing::error!(action = label, "Malformed response running {label}: {why}")
        }
        ExecutionStatus::StateMismatch(why) => {
            tracing::error!(action = label, "State mismatch executing {label}: {why}")
        }
        ExecutionStatus::TransportFailure(_) => {}
    }
}

/// Replays actions against a device, one at a time, recovering the connection
/// whenever it drops.
///
/// The engine owns the device session. Per-action failures never escape
/// [`ReplayEngine::run`]; the worst that can happen to an action is that it
/// is skipped after its one retry.
pub struct ReplayEngine<T: Transport, C: ControlChannel> {
    transport: T,
    control: C,
    recovery: Box<dyn RecoveryStrategy>,
    settings: EngineSettings,
    flash_fuzz: bool,
    reboot_target: Vec<u8>,
    quiet: Vec<Vec<u8>>,
    rng: ChaCha8Rng,
    session: Option<T::Session>,
    state: EngineState,
    last_attempted: Option<String>,
    #[cfg(test)]
    history: Vec<EngineState>,
}

impl<T: Transport, C: ControlChannel> ReplayEngine<T, C> {
    /// Opens the first session. No retries: a missing device here is the
    /// caller's problem.
    pub fn connect(
        config: &ReplayConfig,
        mut transport: T,
        control: C,
        recovery: Box<dyn RecoveryStrategy>,
    ) -> Result<Self, TransportError> {
        let session = transport.connect()?;
        let seed = config.flash_fuzz.seed.unwrap_or_else(rand::random);
        tracing::info!(seed, "connected to device");

        Ok(Self {
            transport,
            control,
            recovery,
            settings: config.engine.clone(),
            flash_fuzz: config.flash_fuzz.enabled,
            reboot_target: config.recovery.reboot_target.as_bytes().to_vec(),
            quiet: config.observer.quiet_message_bytes(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            session: Some(session),
            state: EngineState::Connected,
            last_attempted: None,
            #[cfg(test)]
            history: Vec::new(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Wire form of the most recent action, kept for crash attribution.
    pub fn last_attempted(&self) -> Option<&str> {
        self.last_attempted.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Replays `actions` in order and returns the tally.
    pub fn run<'a>(&mut self, actions: impl IntoIterator<Item = &'a Action>) -> SessionSummary {
        let mut summary = SessionSummary::default();
        for action in actions {
            let disposition = self.replay(action);
            summary.record(&disposition);
        }
        self.transition(EngineState::TerminalSuccess);
        tracing::info!(?summary, "replay finished");
        summary
    }

    fn replay(&mut self, action: &Action) -> Disposition {
        let label = action.label();

        let disposition = match action.kind() {
            ActionKind::Suppressed { .. } => {
                tracing::info!(action = %label, "Not running {label}: it would reboot the device");
                Disposition::Suppressed
            }
            ActionKind::Flash { .. } if !self.flash_fuzz => {
                tracing::info!(action = %label, "Not running {label}: flash fuzzing is disabled");
                Disposition::FlashDisabled
            }
            _ => {
                if self.session.is_none() {
                    let previous = self.last_attempted.clone().unwrap_or_default();
                    self.restore_session(&previous);
                }
                match self.execute(action, &label) {
                    ExecutionStatus::TransportFailure(why) => {
                        self.recover_and_retry(action, &label, &why)
                    }
                    status => Disposition::Completed(status),
                }
            }
        };

        self.last_attempted = Some(label);
        disposition
    }

    fn execute(&mut self, action: &Action, label: &str) -> ExecutionStatus {
        self.transition(EngineState::AwaitingResponse);

        let status = match self.session.as_mut() {
            None => ExecutionStatus::TransportFailure("no open session".to_string()),
            Some(session) => match action.kind() {
                ActionKind::Command { verb, argument } => {
                    let token = CompletionToken::new();
                    let mut observer = LoggingObserver::new(label, &self.quiet, &token);
                    let status = ExecutionStatus::from(session.send_simple_command(
                        verb,
                        argument.as_deref(),
                        self.settings.command_timeout(),
                        &mut observer,
                    ));
                    report(label, &status);
                    status
                }
                ActionKind::Flash {
                    partition,
                    payloads,
                } => flash(
                    session,
                    label,
                    partition,
                    payloads,
                    &mut self.rng,
                    &self.settings,
                    &self.quiet,
                ),
                // Filtered out by `replay`.
                ActionKind::Suppressed { .. } => ExecutionStatus::Success,
            },
        };

        if matches!(status, ExecutionStatus::TransportFailure(_)) {
            self.session = None;
            self.transition(EngineState::Disconnected);
        } else {
            self.transition(EngineState::Connected);
        }
        status
    }

    fn recover_and_retry(&mut self, action: &Action, label: &str, why: &str) -> Disposition {
        tracing::error!(
            action = label,
            previous = ?self.last_attempted,
            "The device is offline ({why}). Probably triggered by {label}"
        );
        self.restore_session(label);

        tracing::info!(action = label, "Device is back, retrying {label} once");
        match self.execute(action, label) {
            ExecutionStatus::TransportFailure(why) => {
                self.transition(EngineState::TerminalFailed);
                tracing::error!(
                    action = label,
                    "Retry of {label} lost the device again, skipping it: {why}"
                );
                Disposition::SkippedAfterRetry(why)
            }
            status => Disposition::Recovered(status),
        }
    }

    /// Brings the device back and opens a new session. Waits as long as it
    /// takes.
    fn restore_session(&mut self, interrupted: &str) {
        self.transition(EngineState::Disconnected);
        if self.recovery.choose(interrupted) == RecoveryMode::Active {
            self.transition(EngineState::RecoveringViaSecondaryChannel);
            self.reboot_via_control_channel();
        }

        self.transition(EngineState::Reconnecting);
        let mut attempts: u64 = 0;
        let session = loop {
            attempts += 1;
            match self.transport.connect() {
                Ok(session) => break session,
                Err(TransportError::DeviceNotFound) => {
                    tracing::trace!(attempts, "device not back yet")
                }
                Err(e) => tracing::debug!(attempts, "reconnect attempt failed: {e}"),
            }
            thread::sleep(self.settings.backoff());
        };
        tracing::info!(attempts, "reconnected to device");
        self.session = Some(session);
        self.transition(EngineState::Connected);
    }

    fn reboot_via_control_channel(&mut self) {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match self.control.connect() {
                Ok(()) => break,
                Err(TransportError::DeviceNotFound) => {
                    tracing::trace!(attempts, "control channel not available yet")
                }
                Err(e) => tracing::debug!(attempts, "control channel connect failed: {e}"),
            }
            thread::sleep(self.settings.backoff());
        }

        let target = String::from_utf8_lossy(&self.reboot_target);
        tracing::info!("Rebooting device to {target} via control channel");
        if let Err(e) = self.control.reboot_to(&self.reboot_target) {
            tracing::warn!("Reboot to {target} failed, waiting for the device anyway: {e}");
        }
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "engine state");
            self.state = next;
            #[cfg(test)]
            self.history.push(next);
        }
    }
}

/// Flashes every payload in turn. A transport failure stops the sequence;
/// any other failure only ends its own payload. Returns the most severe
/// outcome seen.
fn flash<S: DeviceSession>(
    session: &mut S,
    label: &str,
    partition: &[u8],
    payloads: &[FlashPayload],
    rng: &mut ChaCha8Rng,
    settings: &EngineSettings,
    quiet: &[Vec<u8>],
) -> ExecutionStatus {
    let mut worst = ExecutionStatus::Success;
    for payload in payloads {
        let step = format!("{label} ({payload:?} payload)");
        tracing::debug!(action = label, size = payload.size(), "Flashing {step}");

        let token = CompletionToken::new();
        let mut observer = LoggingObserver::new(label, quiet, &token);
        let mut source = payload.source(&mut *rng);
        let status = ExecutionStatus::from(session.send_flash(
            partition,
            &mut source,
            payload.size(),
            &mut observer,
        ));

        match status {
            ExecutionStatus::TransportFailure(_) => return status,
            ExecutionStatus::Success => wait_for_completion(&token, settings),
            _ => report(&step, &status),
        }
        if status.severity() > worst.severity() {
            worst = status;
        }
    }
    worst
}

// Bounded: gives up silently after the poll limit.
fn wait_for_completion(token: &CompletionToken, settings: &EngineSettings) {
    for _ in 0..settings.flash_poll_limit {
        if token.is_complete() {
            return;
        }
        thread::sleep(settings.flash_poll_interval());
    }
}
