//! Abstract protocol commands emitted by the session layer.
//!
//! Wire encoding is the transport collaborator's responsibility; the session
//! layer only decides *which* command to send, whether to wait for the
//! broker's reply, and whether the command must be replayed after failover.

/// A protocol command addressed to the broker on behalf of one channel.
///
/// State-establishing commands (see [`ProtocolCommand::is_state_establishing`])
/// are additionally appended to the channel's replay log so they can be
/// resent verbatim after a reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolCommand {
    /// Suspend (`active = false`) or resume (`active = true`) delivery.
    ChannelFlow { active: bool },
    /// Commit the current transaction.
    TxCommit,
    /// Roll back the current transaction.
    TxRollback,
    /// Acknowledge the message identified by `delivery_tag`; with `multiple`
    /// set, all messages up to and including it.
    BasicAck { delivery_tag: u64, multiple: bool },
    /// Start consuming from a queue under a client-generated consumer tag.
    BasicConsume {
        queue: String,
        consumer_tag: String,
        no_local: bool,
        no_ack: bool,
        exclusive: bool,
        no_wait: bool,
    },
    /// Declare a queue.
    QueueDeclare {
        queue: String,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        no_wait: bool,
    },
    /// Bind a queue to an exchange under a routing key.
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
        arguments: Vec<(String, String)>,
        no_wait: bool,
    },
    /// Delete a queue.
    QueueDelete {
        queue: String,
        if_unused: bool,
        if_empty: bool,
        no_wait: bool,
    },
    /// Purge all messages from a queue.
    QueuePurge { queue: String, no_wait: bool },
    /// Declare an exchange of the given kind ("direct", "topic", ...).
    ExchangeDeclare {
        exchange: String,
        kind: String,
        durable: bool,
        auto_delete: bool,
        no_wait: bool,
    },
}

impl ProtocolCommand {
    /// Whether this command establishes channel state that must be resent
    /// after a broker reconnect.
    ///
    /// Acknowledgments, purges, flow control, and transaction commands are
    /// transient and never replayed.
    pub fn is_state_establishing(&self) -> bool {
        matches!(
            self,
            ProtocolCommand::BasicConsume { .. }
                | ProtocolCommand::QueueDeclare { .. }
                | ProtocolCommand::QueueBind { .. }
                | ProtocolCommand::QueueDelete { .. }
                | ProtocolCommand::ExchangeDeclare { .. }
        )
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolCommand::ChannelFlow { .. } => "channel.flow",
            ProtocolCommand::TxCommit => "tx.commit",
            ProtocolCommand::TxRollback => "tx.rollback",
            ProtocolCommand::BasicAck { .. } => "basic.ack",
            ProtocolCommand::BasicConsume { .. } => "basic.consume",
            ProtocolCommand::QueueDeclare { .. } => "queue.declare",
            ProtocolCommand::QueueBind { .. } => "queue.bind",
            ProtocolCommand::QueueDelete { .. } => "queue.delete",
            ProtocolCommand::QueuePurge { .. } => "queue.purge",
            ProtocolCommand::ExchangeDeclare { .. } => "exchange.declare",
        }
    }
}

/// The broker reply a synchronous write blocks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    ChannelFlowOk,
    TxCommitOk,
    TxRollbackOk,
    BasicConsumeOk,
    QueueDeclareOk,
    QueueBindOk,
    QueueDeleteOk,
    QueuePurgeOk,
    ExchangeDeclareOk,
}
