//! Live delivery of session events to connected clients.
//!
//! [`StreamRelay`] stamps and broadcasts events as the engine consumes them.
//! [`RelayBridge`] fans the broadcast out to the subscribers registered in a
//! [`RelayHub`] for the owning session.

pub mod bridge;
pub mod event;
pub mod hub;
pub mod relay;

pub use bridge::{create_bridge, serialize_event, RelayBridge};
pub use event::{DoneSummary, RelayBody, RelayEvent};
pub use hub::{RelayHub, SubscriberId};
pub use relay::StreamRelay;
