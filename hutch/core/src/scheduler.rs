//! Command scheduler queue
//!
//! A single global FIFO of pending command sequences, regardless of which
//! session submitted them. Expiration is evaluated lazily when a command is
//! popped for dispatch, never by a background timer, so an expired command
//! can sit in the queue indefinitely without cost until reached.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde_json::Value;

use crate::protocol::Expiration;
use crate::session::SessionId;

/// Queued unit of work: one client `command` awaiting dispatch.
#[derive(Clone, Debug)]
pub struct PendingCommand {
    /// Originating session; looked up at response time, dropped if gone.
    pub session: SessionId,
    /// Echo token for the eventual response.
    pub request_id: Option<Value>,
    /// Opaque sequence payload handed to the device untouched.
    pub sequence: Value,
    /// Optional absolute expiry.
    pub expiration: Option<Expiration>,
}

impl PendingCommand {
    /// True when the command carries an expiration that is already past.
    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        self.expiration.is_some_and(|exp| exp.is_past(now))
    }
}

/// Strictly FIFO queue of pending commands.
///
/// Owned exclusively by the animator; nothing else reads or writes it.
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: VecDeque<PendingCommand>,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command to the tail. Arrival order is dispatch order.
    pub fn enqueue(&mut self, command: PendingCommand) {
        self.items.push_back(command);
    }

    /// Pop commands until one is dispatchable.
    ///
    /// Heads whose expiration already passed are collected (the caller owes
    /// each an `expired` response); the first live command is popped and
    /// returned alongside them. Commands behind the first live one are left
    /// untouched; their expiry is checked when their turn comes.
    pub fn pop_dispatchable(
        &mut self,
        now: DateTime<Local>,
    ) -> (Vec<PendingCommand>, Option<PendingCommand>) {
        let mut expired = Vec::new();
        while let Some(head) = self.items.pop_front() {
            if head.is_expired(now) {
                expired.push(head);
            } else {
                return (expired, Some(head));
            }
        }
        (expired, None)
    }

    /// Number of commands waiting.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
    }

    fn command(tag: &str, expiration: Option<Expiration>) -> PendingCommand {
        PendingCommand {
            session: SessionId::next(),
            request_id: Some(json!(tag)),
            sequence: json!([]),
            expiration,
        }
    }

    fn expired_at(now: DateTime<Local>, minutes: i64) -> Option<Expiration> {
        Some(Expiration::at(now - Duration::minutes(minutes)))
    }

    fn live_until(now: DateTime<Local>, minutes: i64) -> Option<Expiration> {
        Some(Expiration::at(now + Duration::minutes(minutes)))
    }

    #[test]
    fn dispatch_order_is_arrival_order() {
        let now = fixed_now();
        let mut queue = CommandQueue::new();
        queue.enqueue(command("first", None));
        queue.enqueue(command("second", None));
        queue.enqueue(command("third", live_until(now, 1)));

        for expected in ["first", "second", "third"] {
            let (expired, next) = queue.pop_dispatchable(now);
            assert!(expired.is_empty());
            assert_eq!(next.unwrap().request_id, Some(json!(expected)));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn expired_heads_are_skimmed_off_before_the_first_live_command() {
        let now = fixed_now();
        let mut queue = CommandQueue::new();
        queue.enqueue(command("stale-1", expired_at(now, 2)));
        queue.enqueue(command("stale-2", expired_at(now, 1)));
        queue.enqueue(command("live", live_until(now, 1)));

        let (expired, next) = queue.pop_dispatchable(now);
        let expired_tags: Vec<_> = expired.iter().map(|c| c.request_id.clone()).collect();
        assert_eq!(expired_tags, vec![Some(json!("stale-1")), Some(json!("stale-2"))]);
        assert_eq!(next.unwrap().request_id, Some(json!("live")));
        assert!(queue.is_empty());
    }

    #[test]
    fn expired_commands_behind_a_live_one_are_not_touched_yet() {
        let now = fixed_now();
        let mut queue = CommandQueue::new();
        queue.enqueue(command("live", None));
        queue.enqueue(command("stale", expired_at(now, 5)));

        let (expired, next) = queue.pop_dispatchable(now);
        assert!(expired.is_empty());
        assert_eq!(next.unwrap().request_id, Some(json!("live")));
        assert_eq!(queue.len(), 1, "stale command waits for its own turn");

        let (expired, next) = queue.pop_dispatchable(now);
        assert_eq!(expired.len(), 1);
        assert!(next.is_none());
    }

    #[test]
    fn fully_expired_queue_drains_to_nothing() {
        let now = fixed_now();
        let mut queue = CommandQueue::new();
        queue.enqueue(command("a", expired_at(now, 1)));
        queue.enqueue(command("b", expired_at(now, 1)));

        let (expired, next) = queue.pop_dispatchable(now);
        assert_eq!(expired.len(), 2);
        assert!(next.is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let mut queue = CommandQueue::new();
        let (expired, next) = queue.pop_dispatchable(fixed_now());
        assert!(expired.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn commands_without_expiration_never_expire() {
        let cmd = command("eternal", None);
        assert!(!cmd.is_expired(fixed_now() + Duration::days(3650)));
    }
}
