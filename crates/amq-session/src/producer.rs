//! Producer handle: one publisher created on a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::types::ProducerId;

/// Destination and publish flags for a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerOptions {
    pub exchange: String,
    pub routing_key: String,
    /// Bounce the message back if it cannot be routed to any queue.
    pub mandatory: bool,
    /// Bounce the message back if no consumer can take it immediately.
    pub immediate: bool,
}

/// A live producer, registered in the channel under a client-assigned id.
///
/// No protocol command is needed to create a producer; the broker learns of
/// it lazily at first publish. The id exists only so the handle can identify
/// itself to the channel when deregistering.
pub struct ProducerHandle {
    id: ProducerId,
    options: ProducerOptions,
    channel: Weak<Channel>,
    closed: AtomicBool,
}

impl ProducerHandle {
    pub(crate) fn new(id: ProducerId, options: ProducerOptions, channel: Weak<Channel>) -> Self {
        Self {
            id,
            options,
            channel,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ProducerId {
        self.id
    }

    pub fn exchange(&self) -> &str {
        &self.options.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.options.routing_key
    }

    pub fn options(&self) -> &ProducerOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close this producer and deregister it from the channel. Idempotent.
    pub fn close(&self) -> Result<(), ChannelError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(channel) = self.channel.upgrade() {
            channel.deregister_producer(self.id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("id", &self.id)
            .field("exchange", &self.options.exchange)
            .field("routing_key", &self.options.routing_key)
            .field("closed", &self.is_closed())
            .finish()
    }
}
