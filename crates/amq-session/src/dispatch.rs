//! Background delivery dispatch.
//!
//! One dispatcher per channel: a dedicated worker thread that drains the
//! channel's flow-control queue and routes each item to its consumer, or
//! through the bounced-message path for late-arriving returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crate::channel::Channel;
use crate::flow::FlowControlQueue;
use crate::message::{self, PendingDelivery};
use crate::types::ChannelId;

/// Handle to a channel's dispatch worker.
///
/// Stopping is an idempotent, one-way flag flip: an item already dequeued is
/// dispatched to completion before the loop observes the flag.
pub(crate) struct Dispatcher {
    stopped: Arc<AtomicBool>,
    queue: Arc<FlowControlQueue<PendingDelivery>>,
}

impl Dispatcher {
    /// Spawn the dispatch worker for `channel`.
    ///
    /// The worker holds only a weak reference, so an abandoned channel can
    /// still be dropped; the thread exits when the channel goes away or the
    /// dispatcher is stopped.
    pub(crate) fn spawn(
        id: ChannelId,
        queue: Arc<FlowControlQueue<PendingDelivery>>,
        channel: Weak<Channel>,
    ) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let worker_stopped = stopped.clone();
        let worker_queue = queue.clone();

        let builder = thread::Builder::new().name(format!("amq-dispatch-{id}"));
        let spawned = builder.spawn(move || {
            run(id, worker_queue, channel, worker_stopped);
        });
        if let Err(e) = spawned {
            // Out of threads; the queue will back up until the channel is closed.
            tracing::error!(channel = %id, "failed to spawn dispatcher: {e}");
        }

        Self { stopped, queue }
    }

    /// Stop the worker. Safe to call multiple times and from any thread.
    pub(crate) fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.stop();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn run(
    id: ChannelId,
    queue: Arc<FlowControlQueue<PendingDelivery>>,
    channel: Weak<Channel>,
    stopped: Arc<AtomicBool>,
) {
    while !stopped.load(Ordering::SeqCst) {
        let Some(message) = queue.dequeue() else {
            break;
        };
        let Some(channel) = channel.upgrade() else {
            break;
        };
        dispatch(&channel, message);
    }
    tracing::debug!(channel = %id, "dispatcher terminating");
}

fn dispatch(channel: &Channel, message: PendingDelivery) {
    match message {
        PendingDelivery::Delivery {
            envelope,
            header,
            bodies,
        } => match channel.consumers().get(&envelope.consumer_tag) {
            Some(consumer) => {
                consumer.notify_message(envelope, header, bodies);
            }
            None => {
                // The consumer may have closed concurrently with an in-flight
                // delivery; expected, not an error.
                tracing::warn!(
                    channel = %channel.id(),
                    tag = %envelope.consumer_tag,
                    "delivery for unknown consumer tag, dropping"
                );
            }
        },
        PendingDelivery::Bounce {
            envelope,
            header,
            bodies,
        } => {
            // A bounce that raced the dispatcher start; processed here, off
            // the transport thread. Decode failures must not kill the loop.
            match message::translate_bounce(channel.message_factory(), &envelope, &header, &bodies)
            {
                Ok(error) => channel.connection().report_exception(error),
                Err(e) => {
                    tracing::error!(
                        channel = %channel.id(),
                        reply_code = envelope.reply_code,
                        "failed to raise undelivered message exception, ignoring: {e}"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent_and_observable() {
        let queue = Arc::new(FlowControlQueue::new(0, 10, None, None));
        let dispatcher = Dispatcher::spawn(ChannelId(1), queue, Weak::new());
        assert!(!dispatcher.is_stopped());
        dispatcher.stop();
        dispatcher.stop();
        assert!(dispatcher.is_stopped());
    }

    #[test]
    fn worker_exits_when_channel_is_gone() {
        // With a dead weak reference, the first dequeued item ends the loop.
        let queue = Arc::new(FlowControlQueue::new(0, 10, None, None));
        let dispatcher = Dispatcher::spawn(ChannelId(2), queue.clone(), Weak::new());
        queue.enqueue(PendingDelivery::Delivery {
            envelope: crate::message::DeliverEnvelope {
                consumer_tag: "1-1".into(),
                delivery_tag: 1,
                redelivered: false,
                exchange: String::new(),
                routing_key: String::new(),
            },
            header: crate::message::ContentHeader {
                class_id: 60,
                body_size: 0,
                content_type: None,
            },
            bodies: vec![],
        });
        // Give the worker a moment to drain, then stop; nothing to assert
        // beyond not hanging or panicking.
        std::thread::sleep(std::time::Duration::from_millis(50));
        dispatcher.stop();
    }
}
