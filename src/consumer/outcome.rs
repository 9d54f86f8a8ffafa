//! Per-message acknowledgment policy

use std::fmt;

/// What happened to one fetched message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Decoded, handled successfully, committed
    Committed,
    /// Undecodable; committed without dispatch so it cannot block the partition
    SkippedCommitted,
    /// Handler failed; left uncommitted for redelivery
    LeftUncommitted,
}

impl MessageOutcome {
    /// Decide the outcome from the decode result and, if dispatched, the handler result
    pub fn decide(decoded: bool, handled: Option<bool>) -> Self {
        match (decoded, handled) {
            (false, _) => MessageOutcome::SkippedCommitted,
            (true, Some(true)) => MessageOutcome::Committed,
            (true, _) => MessageOutcome::LeftUncommitted,
        }
    }

    /// Same as [`decide`](Self::decide), from the results themselves
    pub fn from_results<E, D, H>(decoded: &Result<E, D>, handled: Option<&Result<(), H>>) -> Self {
        Self::decide(decoded.is_ok(), handled.map(Result::is_ok))
    }

    pub fn should_commit(&self) -> bool {
        !matches!(self, MessageOutcome::LeftUncommitted)
    }
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageOutcome::Committed => "committed",
            MessageOutcome::SkippedCommitted => "skipped",
            MessageOutcome::LeftUncommitted => "uncommitted",
        };
        f.write_str(s)
    }
}
