//! Wire types and envelope helpers shared by the relay core and the server
//! binary.

pub mod envelope;
pub mod outbound;

pub use envelope::Envelope;
pub use outbound::{ConnectionStatusKind, DeviceListEntry, OutboundMessage};
