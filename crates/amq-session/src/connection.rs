//! Collaborator traits consumed by the session layer.
//!
//! The session layer never touches the wire: it emits abstract
//! [`ProtocolCommand`]s through a [`ProtocolWriter`], reconstructs message
//! bodies through a [`MessageFactory`], and reaches its owning connection
//! through [`Connection`]. The connection/failover state machine implements
//! these traits; [`crate::testing`] provides in-memory doubles.

use std::sync::Mutex;

use crate::command::{ProtocolCommand, ReplyKind};
use crate::error::{DecodeError, TransportError, UndeliveredError};
use crate::message::{BodyFragment, ContentHeader, TypedMessage};
use crate::types::ChannelId;

/// Outbound command path to the broker.
pub trait ProtocolWriter: Send + Sync {
    /// Fire-and-forget write.
    fn write(&self, channel: ChannelId, command: ProtocolCommand) -> Result<(), TransportError>;

    /// Blocking round trip: send the command and wait until the broker
    /// replies with the expected kind, or the connection fails.
    fn write_sync(
        &self,
        channel: ChannelId,
        command: ProtocolCommand,
        expected: ReplyKind,
    ) -> Result<(), TransportError>;
}

/// Reconstructs a typed message from its content header and body fragments.
pub trait MessageFactory: Send + Sync {
    fn decode(
        &self,
        header: &ContentHeader,
        bodies: &[BodyFragment],
    ) -> Result<TypedMessage, DecodeError>;
}

/// The owning connection, as seen by a channel.
pub trait Connection: Send + Sync {
    /// The connection's command writer.
    fn writer(&self) -> &dyn ProtocolWriter;

    /// Connection-wide failover lock. Held around any operation that mutates
    /// channel lifecycle or replay state, so failover reconnection is atomic
    /// with respect to client calls. Acquired before any channel-level lock.
    fn failover_lock(&self) -> &Mutex<()>;

    /// Remove a closed channel from the connection's channel table.
    fn deregister_channel(&self, channel: ChannelId);

    /// Sink for asynchronous errors that have no waiting caller, such as
    /// bounced messages.
    fn report_exception(&self, error: UndeliveredError);
}
