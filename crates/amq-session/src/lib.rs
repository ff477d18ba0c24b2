//! Session ("channel") layer for an AMQP-style messaging client.
//!
//! A [`Channel`] is one logical session multiplexed over a shared broker
//! connection. It owns the inbound delivery pipeline (a watermark-driven
//! [`FlowControlQueue`] drained by a background dispatcher), the consumer and
//! producer handle registries, transaction state, and a replay log of
//! state-establishing commands that is resent after a connection failover.
//!
//! The layer is transport-agnostic: outbound traffic goes through the
//! [`ProtocolWriter`] trait and inbound messages arrive via
//! [`Channel::message_received`]. The [`testing`] module provides in-memory
//! doubles for all collaborator traits.

pub mod channel;
pub mod command;
pub mod config;
pub mod connection;
pub mod consumer;
mod dispatch;
pub mod error;
pub mod flow;
pub mod message;
pub mod producer;
pub mod registry;
pub mod replay;
pub mod testing;
pub mod types;

pub use channel::Channel;
pub use command::{ProtocolCommand, ReplyKind};
pub use config::{
    AcknowledgeMode, ChannelConfig, DEFAULT_PREFETCH_HIGH_MARK, DEFAULT_PREFETCH_LOW_MARK,
};
pub use connection::{Connection, MessageFactory, ProtocolWriter};
pub use consumer::{ConsumerHandle, ConsumerOptions, ReceivedMessage};
pub use error::{ChannelError, DecodeError, TransportError, UndeliveredError};
pub use flow::FlowControlQueue;
pub use message::{
    BodyFragment, BounceEnvelope, ContentHeader, DeliverEnvelope, PendingDelivery, TypedMessage,
    REPLY_NO_CONSUMERS, REPLY_NO_ROUTE,
};
pub use producer::{ProducerHandle, ProducerOptions};
pub use replay::ReplayLog;
pub use types::{ChannelId, DeliveryTag, ProducerId};
