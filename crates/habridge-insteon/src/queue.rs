//! Per-device outbound request queue
//!
//! Requests leave in due order, never closer together than the quiet time of
//! the previously sent message. A message already waiting in the queue is not
//! queued twice; re-enqueueing it only moves its due time.

use crate::Msg;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Times a request is resent after the modem NAKs it
pub const MAX_RETRIES: u8 = 3;

/// A message waiting to be written, tagged with the feature that asked for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub feature: String,
    pub msg: Msg,
    pub due: Instant,
    pub retries: u8,
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: Vec<QueueEntry>,
    not_before: Option<Instant>,
    last_sent: Option<QueueEntry>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue `msg` for `feature` after `delay`. Returns false if an identical
    /// message was already pending.
    pub fn enqueue(&mut self, feature: &str, msg: Msg, delay: Duration, now: Instant) -> bool {
        let due = now + delay;
        if let Some(pos) = self.entries.iter().position(|e| e.msg == msg) {
            trace!("request {} already queued, rescheduling", msg);
            let mut entry = self.entries.remove(pos);
            entry.due = due;
            self.insert(entry);
            return false;
        }
        self.insert(QueueEntry {
            feature: feature.to_string(),
            msg,
            due,
            retries: 0,
        });
        true
    }

    fn insert(&mut self, entry: QueueEntry) {
        let pos = self.entries.partition_point(|e| e.due <= entry.due);
        self.entries.insert(pos, entry);
    }

    /// Take the next request if it is due and the quiet time has elapsed
    pub fn next_due(&mut self, now: Instant) -> Option<QueueEntry> {
        if self.not_before.is_some_and(|t| now < t) {
            return None;
        }
        if self.entries.first()?.due > now {
            return None;
        }
        let entry = self.entries.remove(0);
        self.not_before = Some(now + entry.msg.quiet_time());
        debug!(
            "request taken off queue: {} {}, quiet time {:?}",
            entry.feature,
            entry.msg,
            entry.msg.quiet_time()
        );
        self.last_sent = Some(entry.clone());
        Some(entry)
    }

    /// Earliest instant at which [`RequestQueue::next_due`] can return something
    pub fn next_wake(&self) -> Option<Instant> {
        let head = self.entries.first()?.due;
        Some(match self.not_before {
            Some(t) if t > head => t,
            _ => head,
        })
    }

    /// Resend the last written request at the head of the queue.
    /// Returns false once the retry budget is spent.
    pub fn retry_last(&mut self, now: Instant) -> bool {
        let Some(mut entry) = self.last_sent.take() else {
            return false;
        };
        if entry.retries >= MAX_RETRIES {
            warn!("giving up on {} after {} retries", entry.msg, entry.retries);
            return false;
        }
        entry.retries += 1;
        entry.due = now;
        debug!("retrying {} (attempt {})", entry.msg, entry.retries);
        self.entries.insert(0, entry);
        true
    }

    /// Forget the last written request once the modem acknowledged it
    pub fn acknowledge(&mut self, msg: &Msg) -> bool {
        let matches = self
            .last_sent
            .as_ref()
            .is_some_and(|e| e.msg.as_bytes() == echo_body(msg));
        if matches {
            self.last_sent = None;
        }
        matches
    }

    /// The request most recently handed out, until it is acknowledged
    pub fn last_sent(&self) -> Option<&QueueEntry> {
        self.last_sent.as_ref()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.not_before = None;
        self.last_sent = None;
    }
}

/// Bytes of an echo without the trailing ACK/NAK, which equal the sent message
fn echo_body(echo: &Msg) -> &[u8] {
    let bytes = echo.as_bytes();
    if echo.is_echo() && !bytes.is_empty() {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    }
}
