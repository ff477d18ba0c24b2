//! Append-only log of state-establishing commands for failover replay.

use std::sync::Mutex;

use crate::command::ProtocolCommand;

/// Ordered record of previously-sent, state-establishing commands.
///
/// Entries are appended in send order and resent in the same order after a
/// reconnect. The log is never pruned for the lifetime of the channel: a
/// queue deleted after being declared is still replayed as declare-then-
/// delete, trading unbounded growth for correctness across repeated
/// reconnects.
#[derive(Debug, Default)]
pub struct ReplayLog {
    entries: Mutex<Vec<ProtocolCommand>>,
}

impl ReplayLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command in send order.
    pub fn append(&self, command: ProtocolCommand) {
        self.entries.lock().unwrap().push(command);
    }

    /// A copy of all entries, in original send order.
    pub fn snapshot(&self) -> Vec<ProtocolCommand> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
