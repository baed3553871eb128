//! All-link group duplicate elimination
//!
//! A group command arrives as a broadcast, then one cleanup per responder,
//! then a success broadcast (cmd1 0x06). Devices repeat broadcasts and
//! cleanups, so only the first message of each round is published.
//!
//! ```text
//!   BCAST ──► ExpectClean ──CLEAN──► ExpectSuccess ──SUCCESS──► ExpectBcast
//! ```

use std::time::{Duration, Instant};

/// Window in which a repeated broadcast with the same cmd1 counts as a retransmission
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(10);

/// Kind of group traffic fed into the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMessage {
    Bcast,
    Clean,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Bcast,
    Clean,
    Success,
}

/// Duplicate tracker for one all-link group of one device
#[derive(Debug, Clone)]
pub struct GroupMessageStateMachine {
    expect: Expect,
    last_cmd1: u8,
    last_updated: Option<Instant>,
}

impl Default for GroupMessageStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupMessageStateMachine {
    pub fn new() -> Self {
        Self {
            expect: Expect::Bcast,
            last_cmd1: 0,
            last_updated: None,
        }
    }

    /// Feed one message; returns true if it should be published
    pub fn action(&mut self, msg: GroupMessage, cmd1: u8, now: Instant) -> bool {
        let publish = match (self.expect, msg) {
            (Expect::Bcast, GroupMessage::Bcast | GroupMessage::Clean) => true,
            (Expect::Bcast, GroupMessage::Success) => false,
            (Expect::Clean, GroupMessage::Bcast) => {
                let recent = self
                    .last_updated
                    .map(|t| now.saturating_duration_since(t) < DUPLICATE_WINDOW)
                    .unwrap_or(false);
                !(cmd1 == self.last_cmd1 && recent)
            }
            (Expect::Clean, _) => false,
            (Expect::Success, GroupMessage::Bcast) => true,
            (Expect::Success, _) => false,
        };
        if msg == GroupMessage::Bcast {
            self.last_cmd1 = cmd1;
        }
        self.last_updated = Some(now);
        self.expect = match msg {
            GroupMessage::Bcast => Expect::Clean,
            GroupMessage::Clean => Expect::Success,
            GroupMessage::Success => Expect::Bcast,
        };
        publish
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_round_publishes_once() {
        let mut sm = GroupMessageStateMachine::new();
        let t = Instant::now();
        assert!(sm.action(GroupMessage::Bcast, 0x11, t));
        assert!(!sm.action(GroupMessage::Clean, 0x00, t));
        assert!(!sm.action(GroupMessage::Clean, 0x00, t));
        assert!(!sm.action(GroupMessage::Success, 0x06, t));
        assert!(sm.action(GroupMessage::Bcast, 0x13, t));
    }

    #[test]
    fn test_repeated_broadcast_suppressed_in_window() {
        let mut sm = GroupMessageStateMachine::new();
        let t = Instant::now();
        assert!(sm.action(GroupMessage::Bcast, 0x11, t));
        assert!(!sm.action(GroupMessage::Bcast, 0x11, t + Duration::from_millis(200)));
        assert!(sm.action(GroupMessage::Bcast, 0x13, t + Duration::from_millis(400)));
        assert!(sm.action(
            GroupMessage::Bcast,
            0x13,
            t + Duration::from_millis(400) + DUPLICATE_WINDOW
        ));
    }

    #[test]
    fn test_missed_broadcast_publishes_cleanup() {
        let mut sm = GroupMessageStateMachine::new();
        assert!(sm.action(GroupMessage::Clean, 0x00, Instant::now()));
    }
}
