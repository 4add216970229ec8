//! Shared types for the scribe reconciliation engine: identifiers, the
//! transcript model, the upstream wire decoder and the runtime seam.

pub mod errors;
pub mod ids;
pub mod runtime;
pub mod transcript;
pub mod upstream;

pub use errors::RuntimeError;
pub use ids::{MessageId, PartId, SessionId};
pub use runtime::{AgentRuntime, RuntimeRequest, UpstreamStream};
pub use transcript::{Message, MessagePart, PartBody, Role, Session, ToolPart};
pub use upstream::{decode, AssistantBlock, DecodedEvent, TerminalInfo, TerminalOutcome, ToolResultBlock};
