//! In-memory doubles for the collaborator traits, plus small builders for
//! inbound messages. Used by the unit and integration tests; kept in the
//! crate proper so the integration tests can share them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::Channel;
use crate::command::{ProtocolCommand, ReplyKind};
use crate::config::ChannelConfig;
use crate::connection::{Connection, MessageFactory, ProtocolWriter};
use crate::error::{DecodeError, TransportError, UndeliveredError};
use crate::message::{
    BodyFragment, BounceEnvelope, ContentHeader, DeliverEnvelope, PendingDelivery, TypedMessage,
};
use crate::types::ChannelId;

/// One command captured by the [`RecordingWriter`].
#[derive(Debug, Clone)]
pub struct WrittenCommand {
    pub channel: ChannelId,
    pub command: ProtocolCommand,
    /// The reply the caller blocked for, or `None` for fire-and-forget writes.
    pub expected_reply: Option<ReplyKind>,
}

/// A writer that records every command instead of touching a wire, with
/// switchable failure injection per write path.
#[derive(Debug, Default)]
pub struct RecordingWriter {
    commands: Mutex<Vec<WrittenCommand>>,
    fail_writes: AtomicBool,
    fail_sync_writes: AtomicBool,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, in order.
    pub fn written(&self) -> Vec<WrittenCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    /// Make subsequent fire-and-forget writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent blocking writes fail.
    pub fn fail_sync_writes(&self, fail: bool) {
        self.fail_sync_writes.store(fail, Ordering::SeqCst);
    }
}

impl ProtocolWriter for RecordingWriter {
    fn write(&self, channel: ChannelId, command: ProtocolCommand) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("writer failed".into()));
        }
        self.commands.lock().unwrap().push(WrittenCommand {
            channel,
            command,
            expected_reply: None,
        });
        Ok(())
    }

    fn write_sync(
        &self,
        channel: ChannelId,
        command: ProtocolCommand,
        expected: ReplyKind,
    ) -> Result<(), TransportError> {
        if self.fail_sync_writes.load(Ordering::SeqCst) {
            return Err(TransportError::NoReply);
        }
        self.commands.lock().unwrap().push(WrittenCommand {
            channel,
            command,
            expected_reply: Some(expected),
        });
        Ok(())
    }
}

/// A connection double that records deregistrations and reported exceptions.
#[derive(Default)]
pub struct TestConnection {
    pub writer: RecordingWriter,
    failover: Mutex<()>,
    deregistered: Mutex<Vec<ChannelId>>,
    exceptions: Mutex<Vec<UndeliveredError>>,
}

impl TestConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel ids deregistered so far, in order.
    pub fn deregistered(&self) -> Vec<ChannelId> {
        self.deregistered.lock().unwrap().clone()
    }

    /// Asynchronous errors reported so far, in order.
    pub fn exceptions(&self) -> Vec<UndeliveredError> {
        self.exceptions.lock().unwrap().clone()
    }
}

impl Connection for TestConnection {
    fn writer(&self) -> &dyn ProtocolWriter {
        &self.writer
    }

    fn failover_lock(&self) -> &Mutex<()> {
        &self.failover
    }

    fn deregister_channel(&self, channel: ChannelId) {
        self.deregistered.lock().unwrap().push(channel);
    }

    fn report_exception(&self, error: UndeliveredError) {
        self.exceptions.lock().unwrap().push(error);
    }
}

/// Concatenates body fragments verbatim and carries the header's MIME type.
#[derive(Debug, Clone, Copy)]
pub struct PlainMessageFactory;

impl MessageFactory for PlainMessageFactory {
    fn decode(
        &self,
        header: &ContentHeader,
        bodies: &[BodyFragment],
    ) -> Result<TypedMessage, DecodeError> {
        let mut body = Vec::with_capacity(header.body_size as usize);
        for fragment in bodies {
            body.extend_from_slice(&fragment.0);
        }
        Ok(TypedMessage {
            content_type: header.content_type.clone(),
            body,
        })
    }
}

/// Always fails to decode, for exercising the malformed-bounce path.
#[derive(Debug, Clone, Copy)]
pub struct FailingMessageFactory;

impl MessageFactory for FailingMessageFactory {
    fn decode(
        &self,
        _header: &ContentHeader,
        _bodies: &[BodyFragment],
    ) -> Result<TypedMessage, DecodeError> {
        Err(DecodeError("synthetic decode failure".into()))
    }
}

/// A deliverable message addressed to `tag` with a single body fragment.
pub fn delivery_for(tag: &str, delivery_tag: u64, body: &[u8]) -> PendingDelivery {
    PendingDelivery::Delivery {
        envelope: DeliverEnvelope {
            consumer_tag: tag.to_string(),
            delivery_tag,
            redelivered: false,
            exchange: "amq.direct".into(),
            routing_key: "test".into(),
        },
        header: ContentHeader {
            class_id: 60,
            body_size: body.len() as u64,
            content_type: Some("text/plain".into()),
        },
        bodies: vec![BodyFragment(body.to_vec())],
    }
}

/// A bounced message with the given reply code and text.
pub fn bounce_with(reply_code: u16, reply_text: &str) -> PendingDelivery {
    let body = b"bounced body";
    PendingDelivery::Bounce {
        envelope: BounceEnvelope {
            reply_code,
            reply_text: reply_text.to_string(),
            exchange: "amq.direct".into(),
            routing_key: "nowhere".into(),
        },
        header: ContentHeader {
            class_id: 60,
            body_size: body.len() as u64,
            content_type: Some("text/plain".into()),
        },
        bodies: vec![BodyFragment(body.to_vec())],
    }
}

/// A channel over a fresh [`TestConnection`] with a [`PlainMessageFactory`].
pub fn open_channel(config: ChannelConfig) -> (Arc<Channel>, Arc<TestConnection>) {
    open_channel_with_factory(config, Arc::new(PlainMessageFactory))
}

/// A channel over a fresh [`TestConnection`] with the given factory.
pub fn open_channel_with_factory(
    config: ChannelConfig,
    factory: Arc<dyn MessageFactory>,
) -> (Arc<Channel>, Arc<TestConnection>) {
    let connection = Arc::new(TestConnection::new());
    let channel = Channel::new(connection.clone(), factory, ChannelId(1), config);
    (channel, connection)
}
