//! Inbound message model: delivery and bounce envelopes, raw content, and
//! translation of bounced messages into typed errors.
//!
//! A pending delivery is transient: it is consumed exactly once, either by
//! the dispatcher or by the synchronous bounce path in the channel.

use crate::connection::MessageFactory;
use crate::error::{DecodeError, UndeliveredError};

/// Broker reply code: no consumers were available for an immediate message.
pub const REPLY_NO_CONSUMERS: u16 = 313;

/// Broker reply code: a mandatory message could not be routed to any queue.
pub const REPLY_NO_ROUTE: u16 = 312;

/// Content header accompanying an inbound message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHeader {
    /// Protocol class the content belongs to (60 for basic content).
    pub class_id: u16,
    /// Total body size in bytes across all fragments.
    pub body_size: u64,
    /// MIME type, when the broker supplied one.
    pub content_type: Option<String>,
}

/// One frame's worth of message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyFragment(pub Vec<u8>);

/// A message reconstructed from its content header and body fragments by the
/// message-factory collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedMessage {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Routing information for a deliverable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverEnvelope {
    /// Tag of the consumer this delivery is addressed to.
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

/// Reject/return information for a message the broker could not deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceEnvelope {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

/// An inbound message waiting to be processed.
#[derive(Debug, Clone)]
pub enum PendingDelivery {
    /// A message addressed to a registered consumer.
    Delivery {
        envelope: DeliverEnvelope,
        header: ContentHeader,
        bodies: Vec<BodyFragment>,
    },
    /// A message the broker returned instead of delivering.
    Bounce {
        envelope: BounceEnvelope,
        header: ContentHeader,
        bodies: Vec<BodyFragment>,
    },
}

/// Translate a bounced message into the matching typed error, reconstructing
/// the message through the factory collaborator.
pub fn translate_bounce(
    factory: &dyn MessageFactory,
    envelope: &BounceEnvelope,
    header: &ContentHeader,
    bodies: &[BodyFragment],
) -> Result<UndeliveredError, DecodeError> {
    let message = factory.decode(header, bodies)?;

    tracing::debug!(
        reply_code = envelope.reply_code,
        reply_text = %envelope.reply_text,
        "message returned by broker"
    );

    let error = match envelope.reply_code {
        REPLY_NO_CONSUMERS => UndeliveredError::NoConsumers {
            reason: envelope.reply_text.clone(),
            message,
        },
        REPLY_NO_ROUTE => UndeliveredError::NoRoute {
            reason: envelope.reply_text.clone(),
            message,
        },
        code => UndeliveredError::Undelivered {
            code,
            reason: envelope.reply_text.clone(),
            message,
        },
    };
    Ok(error)
}
