pub mod classifier;
pub mod config;
pub mod executor;
pub mod extractor;
pub mod normalizer;
pub mod observer;
pub mod random_source;
pub mod recovery;
pub mod transport;

pub use classifier::{Candidate, Shape, classify, is_candidate};
pub use config::{RecoveryPolicy, ReplayConfig};
pub use executor::{Disposition, EngineState, ExecutionStatus, ReplayEngine, SessionSummary};
pub use extractor::{Token, Tokens, extract};
pub use normalizer::{Action, ActionKind, is_destructive, normalize, plan};
pub use observer::{CompletionToken, LoggingObserver, ResponseFrame, ResponseObserver};
pub use random_source::{BoundedRandomSource, FlashPayload};
pub use recovery::{FixedRecovery, PromptRecovery, RecoveryMode, RecoveryStrategy};
pub use transport::{
    ControlChannel, DeviceSession, SimulatedControlChannel, SimulatedTransport, Transport,
    TransportError,
};
