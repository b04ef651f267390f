//! Real-time event channel.
//!
//! Inbound commands are dispatched to the lifecycle one at a time per
//! connection; outbound deliveries fan out through the hub.

mod dispatch;
mod hub;
mod relay;

pub use dispatch::{ConnectionContext, EventChannel};
pub use hub::{ConnectionHub, ConnectionId, OUTBOUND_CAPACITY};
pub use relay::{CacheRelay, EVENTS_TOPIC};
