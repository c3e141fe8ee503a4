//! Conversation sessions: registry, per-session actor and lifecycle.

pub mod actor;
pub mod events;
pub mod handle;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod types;

pub use actor::{ChannelCapacities, SessionSettings};
pub use events::{ConversationEvent, EventKind};
pub use handle::{SessionHandle, SessionOutputs, SessionSnapshot};
pub use registry::{RegistryConfig, SessionRegistry};
pub use state::{ConversationStatus, InvalidTransition};
pub use supervisor::SweepReport;
pub use types::{
    AudioChunk, ControlAction, ConversationConfig, ConversationControl, ConversationDefaults,
    ConversationMessage, EndReason, MessageKind, MessageMetadata,
};
