//! Channel configuration: acknowledge modes and prefetch watermarks.

use serde::{Deserialize, Serialize};

/// Default high prefetch watermark (queue depth at which delivery is suspended).
pub const DEFAULT_PREFETCH_HIGH_MARK: usize = 5000;

/// Default low prefetch watermark (queue depth at which delivery resumes).
pub const DEFAULT_PREFETCH_LOW_MARK: usize = 2500;

/// How deliveries on a channel are acknowledged to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcknowledgeMode {
    /// The broker considers messages acknowledged as soon as they are sent.
    /// The only mode in which watermark-driven flow control is active.
    NoAcknowledge,
    /// Each delivery is acknowledged automatically when handed to its consumer.
    AutoAcknowledge,
    /// The application acknowledges explicitly.
    ClientAcknowledge,
    /// Lazy acknowledgment; duplicates are tolerated.
    DupsOkAcknowledge,
    /// Acknowledgments ride on transaction commits. Forced when the channel
    /// is transacted.
    SessionTransacted,
}

/// Configuration for opening a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Whether the channel is transacted. A transacted channel always uses
    /// [`AcknowledgeMode::SessionTransacted`] regardless of `acknowledge_mode`.
    pub transacted: bool,
    pub acknowledge_mode: AcknowledgeMode,
    /// Queue depth at which delivery is suspended.
    pub prefetch_high: usize,
    /// Queue depth at which delivery resumes.
    pub prefetch_low: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transacted: false,
            acknowledge_mode: AcknowledgeMode::AutoAcknowledge,
            prefetch_high: DEFAULT_PREFETCH_HIGH_MARK,
            prefetch_low: DEFAULT_PREFETCH_LOW_MARK,
        }
    }
}

impl ChannelConfig {
    /// The effective acknowledge mode after applying the transacted override.
    pub fn effective_acknowledge_mode(&self) -> AcknowledgeMode {
        if self.transacted {
            AcknowledgeMode::SessionTransacted
        } else {
            self.acknowledge_mode
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_watermarks() {
        let config = ChannelConfig::default();
        assert_eq!(config.prefetch_high, 5000);
        assert_eq!(config.prefetch_low, 2500);
        assert!(!config.transacted);
    }

    #[test]
    fn transacted_forces_session_transacted_mode() {
        let config = ChannelConfig {
            transacted: true,
            acknowledge_mode: AcknowledgeMode::NoAcknowledge,
            ..Default::default()
        };
        assert_eq!(
            config.effective_acknowledge_mode(),
            AcknowledgeMode::SessionTransacted
        );
    }

    #[test]
    fn non_transacted_keeps_requested_mode() {
        let config = ChannelConfig {
            acknowledge_mode: AcknowledgeMode::ClientAcknowledge,
            ..Default::default()
        };
        assert_eq!(
            config.effective_acknowledge_mode(),
            AcknowledgeMode::ClientAcknowledge
        );
    }
}
