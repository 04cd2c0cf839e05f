// src/runtime/mailbox.rs
//! Per-agent FIFO mailbox with selective receive
//!
//! Messages are kept in arrival order. `take_matching` removes the oldest
//! message accepted by a template, so delivery order between one sender and one
//! recipient always equals send order, whatever else is queued around it.

use crate::runtime::message::{Message, Template};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// FIFO mailbox owned by a single agent
pub struct Mailbox {
    /// Pending messages, oldest first
    queue: Mutex<VecDeque<Message>>,

    /// Wakes receivers parked on this mailbox
    notify: Notify,

    /// Messages delivered
    push_count: AtomicU64,

    /// Messages consumed
    pop_count: AtomicU64,

    /// Messages refused (recipient stopped)
    drop_count: AtomicU64,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
        }
    }

    /// Append a message and wake waiting receivers
    pub fn push(&self, message: Message) {
        self.queue.lock().push_back(message);
        self.push_count.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Remove the oldest message accepted by `template` (any message when `None`)
    pub fn take_matching(&self, template: Option<&Template>) -> Option<Message> {
        let mut queue = self.queue.lock();

        let index = match template {
            Some(template) => queue.iter().position(|m| template.matches(m))?,
            None if queue.is_empty() => return None,
            None => 0,
        };

        let message = queue.remove(index);
        if message.is_some() {
            self.pop_count.fetch_add(1, Ordering::Relaxed);
        }
        message
    }

    /// Count a message that was addressed here but refused
    pub fn record_drop(&self) {
        self.drop_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Future resolving on the next push or `wake_all`.
    ///
    /// Call `enable()` on the pinned future before checking the queue, or a
    /// push between the check and the await is missed.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Wake every parked receiver without delivering anything
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            pending: self.len(),
        }
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Mailbox statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
    /// Total messages delivered
    pub push_count: u64,

    /// Total messages consumed
    pub pop_count: u64,

    /// Total messages refused
    pub drop_count: u64,

    /// Messages still queued
    pub pending: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::message::{Address, Performative};
    use proptest::prelude::*;

    fn message(from: &str, conversation: &str, body: &str) -> Message {
        Message::new(Address::from(from), Address::from("box@localhost"), Performative::Inform)
            .with_conversation(conversation)
            .with_body(body)
    }

    #[test]
    fn test_fifo_without_template() {
        let mailbox = Mailbox::new();
        mailbox.push(message("a", "c", "1"));
        mailbox.push(message("a", "c", "2"));

        assert_eq!(mailbox.take_matching(None).unwrap().body, "1");
        assert_eq!(mailbox.take_matching(None).unwrap().body, "2");
        assert!(mailbox.take_matching(None).is_none());
    }

    #[test]
    fn test_selective_receive_leaves_other_messages() {
        let mailbox = Mailbox::new();
        mailbox.push(message("a", "other", "skip"));
        mailbox.push(message("a", "ping-pong", "take"));

        let template = Template::new().conversation("ping-pong");
        assert_eq!(mailbox.take_matching(Some(&template)).unwrap().body, "take");
        assert!(mailbox.take_matching(Some(&template)).is_none());
        assert_eq!(mailbox.len(), 1);
    }

    #[test]
    fn test_stats() {
        let mailbox = Mailbox::new();
        mailbox.push(message("a", "c", "1"));
        mailbox.push(message("a", "c", "2"));
        mailbox.take_matching(None);
        mailbox.record_drop();

        let stats = mailbox.stats();
        assert_eq!(stats.push_count, 2);
        assert_eq!(stats.pop_count, 1);
        assert_eq!(stats.drop_count, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_push_wakes_enabled_waiter() {
        let mailbox = std::sync::Arc::new(Mailbox::new());

        let waiter = {
            let mailbox = std::sync::Arc::clone(&mailbox);
            tokio::spawn(async move {
                let notified = mailbox.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(msg) = mailbox.take_matching(None) {
                    return Some(msg.body);
                }
                notified.await;
                mailbox.take_matching(None).map(|m| m.body)
            })
        };

        tokio::task::yield_now().await;
        mailbox.push(message("a", "c", "wake"));

        let body = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body.as_deref(), Some("wake"));
    }

    proptest! {
        #[test]
        fn prop_per_sender_order_preserved(senders in proptest::collection::vec(0usize..3, 1..60)) {
            let mailbox = Mailbox::new();
            let mut sent: Vec<Vec<String>> = vec![Vec::new(); 3];

            for (seq, sender) in senders.iter().enumerate() {
                let body = format!("{}-{}", sender, seq);
                sent[*sender].push(body.clone());
                mailbox.push(message(&format!("s{}", sender), "c", &body));
            }

            for (sender, expected) in sent.iter().enumerate() {
                let template = Template::new().sender(Address::from(format!("s{}", sender)));
                let mut received = Vec::new();
                while let Some(msg) = mailbox.take_matching(Some(&template)) {
                    received.push(msg.body);
                }
                prop_assert_eq!(&received, expected);
            }
            prop_assert!(mailbox.is_empty());
        }
    }
}
