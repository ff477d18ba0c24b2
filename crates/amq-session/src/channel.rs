//! The session ("channel") object: one multiplexed conversation with the
//! broker, carrying its own consumers, producers, and transaction state.
//!
//! The channel owns the flow-control queue, the dispatch worker, both handle
//! registries, and the failover replay log. Two locks serialize cross-cutting
//! state: the *closing* lock guards the close transition and handle creation,
//! the *suspension* lock guards suspend/resume and rollback against racing
//! watermark callbacks. The connection-wide failover lock is ordered before
//! both.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::command::{ProtocolCommand, ReplyKind};
use crate::config::{AcknowledgeMode, ChannelConfig};
use crate::connection::{Connection, MessageFactory, ProtocolWriter};
use crate::consumer::{ConsumerHandle, ConsumerOptions};
use crate::dispatch::Dispatcher;
use crate::error::{ChannelError, TransportError};
use crate::flow::{Crossing, FlowControlQueue};
use crate::message::{self, BodyFragment, BounceEnvelope, ContentHeader, PendingDelivery};
use crate::producer::{ProducerHandle, ProducerOptions};
use crate::registry::Registry;
use crate::replay::ReplayLog;
use crate::types::{ChannelId, DeliveryTag, ProducerId};

/// Client-scoped session counter, used to build consumer tags.
static NEXT_SESSION_NUMBER: AtomicU32 = AtomicU32::new(0);

/// One logical session multiplexed over a shared connection.
pub struct Channel {
    id: ChannelId,
    session_number: u32,
    transacted: bool,
    acknowledge_mode: AcknowledgeMode,
    prefetch_low: usize,
    prefetch_high: usize,

    connection: Arc<dyn Connection>,
    message_factory: Arc<dyn MessageFactory>,

    queue: Arc<FlowControlQueue<PendingDelivery>>,
    dispatcher: Mutex<Option<Dispatcher>>,
    consumers: Registry<String, ConsumerHandle>,
    producers: Registry<ProducerId, ProducerHandle>,
    replay_log: ReplayLog,

    closed: AtomicBool,
    /// Guards the close transition and handle creation against racing close.
    closing: Mutex<()>,
    /// Holds the suspended flag; serializes suspend/resume and rollback
    /// against watermark callbacks.
    suspension: Mutex<bool>,
    /// Highest watermark-crossing sequence acted on so far; crossings can be
    /// observed out of order across threads, and a stale one is dropped.
    last_flow_crossing: AtomicU64,

    /// Consumer tag sequence; starts at 1, never reused.
    next_consumer_number: AtomicU32,
    /// Advanced only by the single thread permitted to create producers.
    next_producer_id: AtomicU64,
}

impl Channel {
    /// Open a channel over `connection` with the broker-assigned `id`.
    ///
    /// Watermark-driven flow control is wired up only for
    /// [`AcknowledgeMode::NoAcknowledge`]; every other mode collapses both
    /// watermarks to the high prefetch value and disables the callbacks.
    pub fn new(
        connection: Arc<dyn Connection>,
        message_factory: Arc<dyn MessageFactory>,
        id: ChannelId,
        config: ChannelConfig,
    ) -> Arc<Self> {
        let session_number = NEXT_SESSION_NUMBER.fetch_add(1, Ordering::SeqCst) + 1;
        let acknowledge_mode = config.effective_acknowledge_mode();

        Arc::new_cyclic(|weak: &Weak<Channel>| {
            let queue = if acknowledge_mode == AcknowledgeMode::NoAcknowledge {
                let on_low = weak.clone();
                let on_high = weak.clone();
                FlowControlQueue::new(
                    config.prefetch_low,
                    config.prefetch_high,
                    Some(Box::new(move |crossing| {
                        Self::on_prefetch_low(&on_low, crossing)
                    })),
                    Some(Box::new(move |crossing| {
                        Self::on_prefetch_high(&on_high, crossing)
                    })),
                )
            } else {
                FlowControlQueue::new(config.prefetch_high, config.prefetch_high, None, None)
            };

            tracing::debug!(
                channel = %id,
                session_number,
                transacted = config.transacted,
                ?acknowledge_mode,
                "channel: init"
            );

            Self {
                id,
                session_number,
                transacted: config.transacted,
                acknowledge_mode,
                prefetch_low: config.prefetch_low,
                prefetch_high: config.prefetch_high,
                connection,
                message_factory,
                queue: Arc::new(queue),
                dispatcher: Mutex::new(None),
                consumers: Registry::new(),
                producers: Registry::new(),
                replay_log: ReplayLog::new(),
                closed: AtomicBool::new(false),
                closing: Mutex::new(()),
                suspension: Mutex::new(false),
                last_flow_crossing: AtomicU64::new(0),
                next_consumer_number: AtomicU32::new(1),
                next_producer_id: AtomicU64::new(0),
            }
        })
    }

    // ------------------------------------------------------------------ //
    // Accessors
    // ------------------------------------------------------------------ //

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn session_number(&self) -> u32 {
        self.session_number
    }

    pub fn prefetch_low(&self) -> usize {
        self.prefetch_low
    }

    pub fn prefetch_high(&self) -> usize {
        self.prefetch_high
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_suspended(&self) -> bool {
        *self.suspension.lock().unwrap()
    }

    /// Whether the channel is transacted. Fails if the channel is closed.
    pub fn transacted(&self) -> Result<bool, ChannelError> {
        self.check_not_closed()?;
        Ok(self.transacted)
    }

    /// The channel's effective acknowledge mode. Fails if the channel is closed.
    pub fn acknowledge_mode(&self) -> Result<AcknowledgeMode, ChannelError> {
        self.check_not_closed()?;
        Ok(self.acknowledge_mode)
    }

    pub fn replay_log(&self) -> &ReplayLog {
        &self.replay_log
    }

    pub(crate) fn consumers(&self) -> &Registry<String, ConsumerHandle> {
        &self.consumers
    }

    pub(crate) fn message_factory(&self) -> &dyn MessageFactory {
        self.message_factory.as_ref()
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    fn writer(&self) -> &dyn ProtocolWriter {
        self.connection.writer()
    }

    // ------------------------------------------------------------------ //
    // Lifecycle
    // ------------------------------------------------------------------ //

    /// Start the dispatch worker. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut dispatcher = self.dispatcher.lock().unwrap();
        if dispatcher.is_none() {
            *dispatcher = Some(Dispatcher::spawn(
                self.id,
                self.queue.clone(),
                Arc::downgrade(self),
            ));
        }
    }

    /// Suspend delivery at the broker, then stop the dispatch worker.
    pub fn stop(&self) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        self.suspend(true)?;
        self.stop_dispatcher();
        Ok(())
    }

    /// Close the channel: stop dispatch, close all handles, deregister from
    /// the connection. A second close is a no-op.
    pub fn close(&self) -> Result<(), ChannelError> {
        let _failover = self.connection.failover_lock().lock().unwrap();
        let _closing = self.closing.lock().unwrap();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_dispatcher();
        self.close_producers();
        self.close_consumers(None);
        self.connection.deregister_channel(self.id);
        Ok(())
    }

    /// Forced closure with an associated error (broker- or connection-
    /// initiated). Consumers are notified of the error instead of closed;
    /// no protocol traffic is sent.
    pub fn closed_with_error(&self, error: ChannelError) {
        let _failover = self.connection.failover_lock().lock().unwrap();
        let _closing = self.closing.lock().unwrap();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(channel = %self.id, "closing channel forcibly: {error}");
        self.stop_dispatcher();
        self.close_producers();
        self.close_consumers(Some(&error));
        self.connection.deregister_channel(self.id);
    }

    /// Mark the channel closed during failover when resubscription was
    /// vetoed. The caller must already hold the connection's failover lock.
    pub fn mark_closed(&self) {
        let _closing = self.closing.lock().unwrap();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_dispatcher();
        self.close_producers();
        for consumer in self.consumers.snapshot() {
            consumer.mark_closed();
        }
        self.connection.deregister_channel(self.id);
    }

    fn stop_dispatcher(&self) {
        if let Some(dispatcher) = self.dispatcher.lock().unwrap().as_ref() {
            dispatcher.stop();
        }
    }

    /// Close every producer handle, best-effort: a failing handle is logged
    /// and does not stop the remaining handles from closing.
    fn close_producers(&self) {
        tracing::debug!(channel = %self.id, "closing producers");
        for producer in self.producers.snapshot() {
            if let Err(e) = producer.close() {
                tracing::error!(channel = %self.id, producer = producer.id(), "error closing producer: {e}");
            }
        }
    }

    /// Close every consumer handle; in the error path, each consumer is
    /// notified of the error instead (no protocol close is sent when we are
    /// propagating an existing failure).
    fn close_consumers(&self, error: Option<&ChannelError>) {
        for consumer in self.consumers.snapshot() {
            match error {
                Some(err) => consumer.notify_error(err.clone()),
                None => {
                    if let Err(e) = consumer.close() {
                        tracing::error!(channel = %self.id, tag = consumer.tag(), "error closing consumer: {e}");
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------ //
    // Flow control
    // ------------------------------------------------------------------ //

    /// Suspend (`true`) or resume (`false`) delivery, blocking until the
    /// broker acknowledges the flow change.
    pub fn suspend(&self, suspend: bool) -> Result<(), ChannelError> {
        let mut suspended = self.suspension.lock().unwrap();
        self.check_not_closed()?;
        self.set_flow(&mut suspended, suspend)?;
        Ok(())
    }

    /// Flip the suspended flag and perform the channel-flow round trip.
    /// The caller must hold the suspension lock.
    fn set_flow(&self, suspended: &mut bool, suspend: bool) -> Result<(), TransportError> {
        tracing::debug!(channel = %self.id, suspend, "setting channel flow");
        *suspended = suspend;
        self.writer().write_sync(
            self.id,
            ProtocolCommand::ChannelFlow { active: !suspend },
            ReplyKind::ChannelFlowOk,
        )
    }

    fn on_prefetch_low(channel: &Weak<Channel>, crossing: Crossing) {
        let Some(channel) = channel.upgrade() else {
            return;
        };
        // The watermarks are only wired up in no-acknowledge mode, but the
        // callback re-checks in case of a misconfigured queue.
        if channel.acknowledge_mode != AcknowledgeMode::NoAcknowledge {
            return;
        }
        if channel.is_stale_crossing(crossing) {
            return;
        }
        tracing::warn!(
            channel = %channel.id,
            size = crossing.size,
            low = channel.prefetch_low,
            "below low watermark, resuming delivery"
        );
        if let Err(e) = channel.suspend(false) {
            tracing::error!(channel = %channel.id, "failed to resume delivery: {e}");
        }
    }

    fn on_prefetch_high(channel: &Weak<Channel>, crossing: Crossing) {
        let Some(channel) = channel.upgrade() else {
            return;
        };
        if channel.acknowledge_mode != AcknowledgeMode::NoAcknowledge {
            return;
        }
        if channel.is_stale_crossing(crossing) {
            return;
        }
        tracing::warn!(
            channel = %channel.id,
            size = crossing.size,
            high = channel.prefetch_high,
            "above high watermark, suspending delivery"
        );
        if let Err(e) = channel.suspend(true) {
            tracing::error!(channel = %channel.id, "failed to suspend delivery: {e}");
        }
    }

    /// Crossings are stamped under the queue lock but delivered after it is
    /// released, so the enqueue and dispatch threads can present them out of
    /// order. Only the newest crossing may drive the flow state; acting on a
    /// stale one could leave the channel suspended with a drained queue.
    fn is_stale_crossing(&self, crossing: Crossing) -> bool {
        let stale = self
            .last_flow_crossing
            .fetch_max(crossing.seq, Ordering::SeqCst)
            >= crossing.seq;
        if stale {
            tracing::debug!(channel = %self.id, seq = crossing.seq, "stale watermark crossing dropped");
        }
        stale
    }

    // ------------------------------------------------------------------ //
    // Transactions
    // ------------------------------------------------------------------ //

    /// Commit the current transaction: first acknowledge the last delivered
    /// message on every consumer, then send the commit command and block for
    /// the broker's reply.
    pub fn commit(&self) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        self.check_transacted()?;

        for consumer in self.consumers.snapshot() {
            if let Some(delivery_tag) = consumer.take_last_delivery() {
                self.writer()
                    .write(
                        self.id,
                        ProtocolCommand::BasicAck {
                            delivery_tag,
                            multiple: true,
                        },
                    )
                    .map_err(ChannelError::CommitFailed)?;
            }
        }

        self.writer()
            .write_sync(self.id, ProtocolCommand::TxCommit, ReplyKind::TxCommitOk)
            .map_err(ChannelError::CommitFailed)?;
        Ok(())
    }

    /// Roll back the current transaction. Delivery is suspended for the
    /// duration so no new deliveries land mid-rollback; the prior suspension
    /// state is restored afterwards.
    pub fn rollback(&self) -> Result<(), ChannelError> {
        let mut suspended = self.suspension.lock().unwrap();
        self.check_not_closed()?;
        self.check_transacted()?;

        let was_suspended = *suspended;
        if !was_suspended {
            self.set_flow(&mut suspended, true)
                .map_err(ChannelError::RollbackFailed)?;
        }

        self.writer()
            .write_sync(self.id, ProtocolCommand::TxRollback, ReplyKind::TxRollbackOk)
            .map_err(ChannelError::RollbackFailed)?;

        if !was_suspended {
            self.set_flow(&mut suspended, false)
                .map_err(ChannelError::RollbackFailed)?;
        }
        Ok(())
    }

    /// Redeliver unacknowledged messages. Not expressible in this protocol
    /// version.
    pub fn recover(&self) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        self.check_not_transacted()?;
        Err(ChannelError::Unsupported(
            "recover is not available with this protocol version",
        ))
    }

    // ------------------------------------------------------------------ //
    // Consumers and producers
    // ------------------------------------------------------------------ //

    /// Create a consumer on a queue.
    ///
    /// The consumer tag is generated client-side (`{session}-{sequence}`)
    /// before the start-consuming command is sent, so deliveries can be
    /// routed even if the broker defers its acknowledgment of the subscribe.
    /// The command is state-establishing and is appended to the replay log.
    pub fn create_consumer(
        self: &Arc<Self>,
        options: ConsumerOptions,
    ) -> Result<Arc<ConsumerHandle>, ChannelError> {
        if options.durable || options.subscription_name.is_some() {
            return Err(ChannelError::Unsupported("durable subscriptions"));
        }

        let _failover = self.connection.failover_lock().lock().unwrap();
        let _closing = self.closing.lock().unwrap();
        self.check_not_closed()?;

        let tag = format!(
            "{}-{}",
            self.session_number,
            self.next_consumer_number.fetch_add(1, Ordering::SeqCst)
        );
        tracing::debug!(
            channel = %self.id,
            tag = %tag,
            queue = %options.queue_name,
            "creating consumer"
        );

        let consumer = Arc::new(ConsumerHandle::new(
            tag.clone(),
            options.queue_name.clone(),
            options.no_local,
            options.exclusive,
            self.acknowledge_mode,
            Arc::downgrade(self),
        ));

        let command = ProtocolCommand::BasicConsume {
            queue: options.queue_name,
            consumer_tag: tag.clone(),
            no_local: options.no_local,
            no_ack: self.acknowledge_mode == AcknowledgeMode::NoAcknowledge,
            exclusive: options.exclusive,
            no_wait: true,
        };
        self.replay_log.append(command.clone());
        self.writer().write(self.id, command)?;

        self.consumers.insert(tag, consumer.clone());
        Ok(consumer)
    }

    /// Create a producer. No protocol command is needed; the broker learns
    /// of the producer lazily at first publish.
    pub fn create_producer(
        self: &Arc<Self>,
        options: ProducerOptions,
    ) -> Result<Arc<ProducerHandle>, ChannelError> {
        let _failover = self.connection.failover_lock().lock().unwrap();
        let _closing = self.closing.lock().unwrap();
        self.check_not_closed()?;

        let id = self.next_producer_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            channel = %self.id,
            producer = id,
            exchange = %options.exchange,
            routing_key = %options.routing_key,
            "creating producer"
        );

        let producer = Arc::new(ProducerHandle::new(id, options, Arc::downgrade(self)));
        self.producers.insert(id, producer.clone());
        Ok(producer)
    }

    /// Remove a durable subscription. Durable subscriptions are unsupported.
    pub fn unsubscribe(&self, _name: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("durable subscriptions"))
    }

    pub(crate) fn deregister_consumer(&self, tag: &str) {
        self.consumers.remove(&tag.to_string());
    }

    pub(crate) fn deregister_producer(&self, id: ProducerId) {
        self.producers.remove(&id);
    }

    // ------------------------------------------------------------------ //
    // Queue and exchange operations
    // ------------------------------------------------------------------ //

    /// Declare a queue. State-establishing; appended to the replay log.
    pub fn declare_queue(
        &self,
        queue: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        no_wait: bool,
    ) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        tracing::debug!(channel = %self.id, queue, durable, exclusive, auto_delete, "declaring queue");
        self.send_state_establishing(
            ProtocolCommand::QueueDeclare {
                queue: queue.to_string(),
                durable,
                exclusive,
                auto_delete,
                no_wait,
            },
            ReplyKind::QueueDeclareOk,
            no_wait,
        )
    }

    /// Bind a queue to an exchange. State-establishing; appended to the
    /// replay log.
    pub fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: Vec<(String, String)>,
        no_wait: bool,
    ) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        tracing::debug!(channel = %self.id, queue, exchange, routing_key, "binding queue");
        self.send_state_establishing(
            ProtocolCommand::QueueBind {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                arguments,
                no_wait,
            },
            ReplyKind::QueueBindOk,
            no_wait,
        )
    }

    /// Delete a queue. State-establishing; appended to the replay log, so a
    /// declare-then-delete sequence replays in that order after failover.
    pub fn delete_queue(
        &self,
        queue: &str,
        if_unused: bool,
        if_empty: bool,
        no_wait: bool,
    ) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        tracing::debug!(channel = %self.id, queue, "deleting queue");
        self.send_state_establishing(
            ProtocolCommand::QueueDelete {
                queue: queue.to_string(),
                if_unused,
                if_empty,
                no_wait,
            },
            ReplyKind::QueueDeleteOk,
            no_wait,
        )
    }

    /// Purge all messages from a queue. Transient; never replayed.
    pub fn purge_queue(&self, queue: &str, no_wait: bool) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        tracing::debug!(channel = %self.id, queue, "purging queue");
        let command = ProtocolCommand::QueuePurge {
            queue: queue.to_string(),
            no_wait,
        };
        if no_wait {
            self.writer().write(self.id, command)?;
        } else {
            self.writer()
                .write_sync(self.id, command, ReplyKind::QueuePurgeOk)?;
        }
        Ok(())
    }

    /// Declare an exchange. State-establishing; appended to the replay log.
    pub fn declare_exchange(
        &self,
        exchange: &str,
        kind: &str,
        no_wait: bool,
    ) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        tracing::debug!(channel = %self.id, exchange, kind, "declaring exchange");
        self.send_state_establishing(
            ProtocolCommand::ExchangeDeclare {
                exchange: exchange.to_string(),
                kind: kind.to_string(),
                durable: false,
                auto_delete: false,
                no_wait,
            },
            ReplyKind::ExchangeDeclareOk,
            no_wait,
        )
    }

    /// Delete an exchange. Unsupported by this client.
    pub fn delete_exchange(&self, _exchange: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("exchange deletion"))
    }

    /// Append to the replay log, then send: fire-and-forget under the
    /// failover lock when `no_wait`, otherwise as a blocking round trip.
    fn send_state_establishing(
        &self,
        command: ProtocolCommand,
        reply: ReplyKind,
        no_wait: bool,
    ) -> Result<(), ChannelError> {
        debug_assert!(command.is_state_establishing());
        self.replay_log.append(command.clone());
        if no_wait {
            let _failover = self.connection.failover_lock().lock().unwrap();
            self.writer().write(self.id, command)?;
        } else {
            self.writer().write_sync(self.id, command, reply)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------ //
    // Acknowledgment and inbound delivery
    // ------------------------------------------------------------------ //

    /// Acknowledge one message, or with `multiple` all messages up to and
    /// including `delivery_tag`. Fire-and-forget.
    pub fn acknowledge_message(
        &self,
        delivery_tag: DeliveryTag,
        multiple: bool,
    ) -> Result<(), ChannelError> {
        self.check_not_closed()?;
        tracing::debug!(channel = %self.id, delivery_tag, multiple, "sending ack");
        self.writer().write(
            self.id,
            ProtocolCommand::BasicAck {
                delivery_tag,
                multiple,
            },
        )?;
        Ok(())
    }

    /// Entry point for inbound messages from the transport. Deliverable
    /// messages are queued for the dispatcher; bounced messages are
    /// translated to typed errors immediately, on the calling thread.
    pub fn message_received(&self, message: PendingDelivery) {
        tracing::debug!(channel = %self.id, "message received");
        match message {
            PendingDelivery::Bounce {
                envelope,
                header,
                bodies,
            } => self.return_bounced_message(&envelope, &header, &bodies),
            delivery @ PendingDelivery::Delivery { .. } => self.queue.enqueue(delivery),
        }
    }

    fn return_bounced_message(
        &self,
        envelope: &BounceEnvelope,
        header: &ContentHeader,
        bodies: &[BodyFragment],
    ) {
        match message::translate_bounce(self.message_factory.as_ref(), envelope, header, bodies) {
            Ok(error) => self.connection.report_exception(error),
            Err(e) => {
                // A malformed bounce must not crash delivery processing.
                tracing::error!(
                    channel = %self.id,
                    reply_code = envelope.reply_code,
                    "failed to raise undelivered message exception, ignoring: {e}"
                );
            }
        }
    }

    // ------------------------------------------------------------------ //
    // Failover
    // ------------------------------------------------------------------ //

    /// Resend every replay-log entry in original order over the plain write
    /// path, re-establishing queues, bindings, and subscriptions after a
    /// reconnect. The caller must already hold the connection's failover lock.
    pub fn replay_on_failover(&self) -> Result<(), ChannelError> {
        tracing::debug!(
            channel = %self.id,
            entries = self.replay_log.len(),
            "replaying state-establishing commands"
        );
        for command in self.replay_log.snapshot() {
            tracing::debug!(channel = %self.id, command = command.name(), "replaying");
            self.writer().write(self.id, command)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------ //
    // Checks
    // ------------------------------------------------------------------ //

    fn check_not_closed(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            Err(ChannelError::Closed(self.id))
        } else {
            Ok(())
        }
    }

    fn check_transacted(&self) -> Result<(), ChannelError> {
        if !self.transacted {
            Err(ChannelError::NotTransacted)
        } else {
            Ok(())
        }
    }

    fn check_not_transacted(&self) -> Result<(), ChannelError> {
        if self.transacted {
            Err(ChannelError::Transacted)
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    pub(crate) fn delivery_queue(&self) -> &Arc<FlowControlQueue<PendingDelivery>> {
        &self.queue
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("session_number", &self.session_number)
            .field("transacted", &self.transacted)
            .field("acknowledge_mode", &self.acknowledge_mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        bounce_with, delivery_for, open_channel, open_channel_with_factory, FailingMessageFactory,
    };
    use std::time::Duration;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn late_bounce_reaches_exception_sink_via_dispatcher() {
        let (channel, connection) = open_channel(ChannelConfig::default());
        channel.start();

        // Enqueue a bounce directly, as if it raced the synchronous path.
        channel.delivery_queue().enqueue(bounce_with(312, "unroutable"));

        assert!(wait_until(|| !connection.exceptions().is_empty()));
        channel.close().unwrap();
    }

    #[test]
    fn malformed_late_bounce_does_not_kill_dispatcher() {
        let (channel, connection) =
            open_channel_with_factory(ChannelConfig::default(), Arc::new(FailingMessageFactory));
        channel.start();
        let consumer = channel
            .create_consumer(ConsumerOptions {
                queue_name: "q".into(),
                ..Default::default()
            })
            .unwrap();

        channel.delivery_queue().enqueue(bounce_with(999, "bad"));
        // The decode failure is logged, not reported and not propagated.
        channel.message_received(delivery_for(consumer.tag(), 1, b"still alive"));

        let received = consumer.receive_timeout(Duration::from_secs(2));
        assert!(received.is_some(), "dispatch loop should survive the bounce");
        assert!(connection.exceptions().is_empty());
        channel.close().unwrap();
    }

    #[test]
    fn stale_watermark_crossing_is_dropped() {
        let (channel, connection) = open_channel(ChannelConfig {
            acknowledge_mode: AcknowledgeMode::NoAcknowledge,
            prefetch_high: 3,
            prefetch_low: 1,
            ..Default::default()
        });
        let weak = Arc::downgrade(&channel);

        // The resume crossing (seq 2) outruns the older suspend crossing
        // (seq 1); the late suspend must not leave the channel stuck.
        Channel::on_prefetch_low(&weak, Crossing { size: 1, seq: 2 });
        Channel::on_prefetch_high(&weak, Crossing { size: 3, seq: 1 });

        assert!(!channel.is_suspended());
        let flows: Vec<bool> = connection
            .writer
            .written()
            .iter()
            .filter_map(|w| match w.command {
                ProtocolCommand::ChannelFlow { active } => Some(active),
                _ => None,
            })
            .collect();
        assert_eq!(flows, vec![true]);
    }

    #[test]
    fn session_numbers_are_client_scoped_and_increasing() {
        let (first, _) = open_channel(ChannelConfig::default());
        let (second, _) = open_channel(ChannelConfig::default());
        assert!(second.session_number() > first.session_number());
    }

    #[test]
    fn start_is_idempotent() {
        let (channel, _) = open_channel(ChannelConfig::default());
        channel.start();
        channel.start();
        channel.close().unwrap();
    }
}
