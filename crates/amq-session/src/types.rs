//! Core identifier types for the session layer.

use std::fmt;

/// Broker-scoped channel number. Assigned by the connection when the channel
/// is opened and never changes for the lifetime of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u16);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker-assigned tag identifying one delivered message on a channel.
pub type DeliveryTag = u64;

/// Client-assigned producer id, generated by the channel. Not broker-visible.
pub type ProducerId = u64;
