//! Consumer handle: one active subscription on a channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::config::AcknowledgeMode;
use crate::error::ChannelError;
use crate::message::{BodyFragment, ContentHeader, DeliverEnvelope};

/// Subscription parameters for creating a consumer.
///
/// `durable` and `subscription_name` are accepted for interface parity but
/// rejected at creation time; durable subscriptions are unsupported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerOptions {
    pub queue_name: String,
    /// Do not deliver messages published on this same connection.
    pub no_local: bool,
    pub exclusive: bool,
    pub durable: bool,
    pub subscription_name: Option<String>,
}

/// A delivery handed to a consumer, ready for the application.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub envelope: DeliverEnvelope,
    pub header: ContentHeader,
    pub bodies: Vec<BodyFragment>,
}

/// A live subscription, registered in the channel under its consumer tag.
///
/// The tag is generated by the channel (`{session}-{sequence}`) before the
/// start-consuming command is sent, so inbound deliveries can be routed even
/// while the broker's acknowledgment of the subscribe is still in flight.
pub struct ConsumerHandle {
    tag: String,
    queue_name: String,
    no_local: bool,
    exclusive: bool,
    acknowledge_mode: AcknowledgeMode,
    channel: Weak<Channel>,
    closed: AtomicBool,
    /// Delivery tag of the most recent delivery, drained by `Commit`.
    last_delivery_tag: Mutex<Option<u64>>,
    last_error: Mutex<Option<ChannelError>>,
    inbox: Mutex<VecDeque<ReceivedMessage>>,
    inbox_available: Condvar,
}

impl ConsumerHandle {
    pub(crate) fn new(
        tag: String,
        queue_name: String,
        no_local: bool,
        exclusive: bool,
        acknowledge_mode: AcknowledgeMode,
        channel: Weak<Channel>,
    ) -> Self {
        Self {
            tag,
            queue_name,
            no_local,
            exclusive,
            acknowledge_mode,
            channel,
            closed: AtomicBool::new(false),
            last_delivery_tag: Mutex::new(None),
            last_error: Mutex::new(None),
            inbox: Mutex::new(VecDeque::new()),
            inbox_available: Condvar::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn acknowledge_mode(&self) -> AcknowledgeMode {
        self.acknowledge_mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The error this consumer was notified of during a forced closure.
    pub fn last_error(&self) -> Option<ChannelError> {
        self.last_error.lock().unwrap().clone()
    }

    /// Hand a delivery to this consumer. Called by the dispatcher.
    pub(crate) fn notify_message(
        &self,
        envelope: DeliverEnvelope,
        header: ContentHeader,
        bodies: Vec<BodyFragment>,
    ) {
        if self.is_closed() {
            tracing::trace!(tag = %self.tag, "delivery for closed consumer dropped");
            return;
        }

        let delivery_tag = envelope.delivery_tag;
        *self.last_delivery_tag.lock().unwrap() = Some(delivery_tag);

        {
            let mut inbox = self.inbox.lock().unwrap();
            inbox.push_back(ReceivedMessage {
                envelope,
                header,
                bodies,
            });
            self.inbox_available.notify_one();
        }

        if self.acknowledge_mode == AcknowledgeMode::AutoAcknowledge {
            if let Some(channel) = self.channel.upgrade() {
                if let Err(e) = channel.acknowledge_message(delivery_tag, false) {
                    tracing::warn!(tag = %self.tag, delivery_tag, "auto-ack failed: {e}");
                }
            }
        }
    }

    /// Take the delivery tag of the last delivered message, clearing the
    /// backlog marker. Used by `Commit` to send a multiple-ack per consumer.
    pub(crate) fn take_last_delivery(&self) -> Option<u64> {
        self.last_delivery_tag.lock().unwrap().take()
    }

    /// Pop the next delivery without blocking.
    pub fn try_receive(&self) -> Option<ReceivedMessage> {
        self.inbox.lock().unwrap().pop_front()
    }

    /// Pop the next delivery, waiting up to `timeout` for one to arrive.
    pub fn receive_timeout(&self, timeout: Duration) -> Option<ReceivedMessage> {
        let deadline = Instant::now() + timeout;
        let mut inbox = self.inbox.lock().unwrap();
        loop {
            if let Some(message) = inbox.pop_front() {
                return Some(message);
            }
            if self.is_closed() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .inbox_available
                .wait_timeout(inbox, deadline - now)
                .unwrap();
            inbox = guard;
        }
    }

    /// Close this consumer and deregister it from the channel.
    ///
    /// Idempotent. No protocol traffic is sent; the subscription lapses with
    /// the channel.
    pub fn close(&self) -> Result<(), ChannelError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inbox_available.notify_all();
        if let Some(channel) = self.channel.upgrade() {
            channel.deregister_consumer(&self.tag);
        }
        Ok(())
    }

    /// Forced closure with an associated error: record the error, close, and
    /// deregister. No protocol traffic is sent, since this propagates an
    /// existing failure.
    pub(crate) fn notify_error(&self, error: ChannelError) {
        *self.last_error.lock().unwrap() = Some(error);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inbox_available.notify_all();
        if let Some(channel) = self.channel.upgrade() {
            channel.deregister_consumer(&self.tag);
        }
    }

    /// Mark closed during failover when resubscription was vetoed.
    pub(crate) fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inbox_available.notify_all();
        if let Some(channel) = self.channel.upgrade() {
            channel.deregister_consumer(&self.tag);
        }
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("tag", &self.tag)
            .field("queue_name", &self.queue_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
