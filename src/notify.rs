use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::MAILBOX_CAPACITY;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("mailbox full for {0}")]
    MailboxFull(Ulid),
    #[error("recipient {0} unreachable: {1}")]
    Unreachable(Ulid, String),
}

/// Outbound message channel. Implementations may fail; callers decide
/// whether a failure is retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: Ulid, text: &str) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub recipient: Ulid,
    pub text: String,
}

/// Bounded per-recipient mailboxes. Clients poll theirs with
/// `SELECT * FROM alerts`.
pub struct NotifyHub {
    mailboxes: DashMap<Ulid, VecDeque<Alert>>,
    capacity: usize,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new(MAILBOX_CAPACITY)
    }
}

impl NotifyHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            mailboxes: DashMap::new(),
            capacity,
        }
    }

    /// Take everything queued for `recipient`, oldest first.
    pub fn drain(&self, recipient: &Ulid) -> Vec<Alert> {
        self.mailboxes
            .remove(recipient)
            .map(|(_, queue)| queue.into())
            .unwrap_or_default()
    }

    pub fn pending(&self, recipient: &Ulid) -> usize {
        self.mailboxes.get(recipient).map_or(0, |q| q.len())
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn send(&self, recipient: Ulid, text: &str) -> Result<(), DeliveryError> {
        let mut queue = self.mailboxes.entry(recipient).or_default();
        if queue.len() >= self.capacity {
            return Err(DeliveryError::MailboxFull(recipient));
        }
        queue.push_back(Alert {
            recipient,
            text: text.to_string(),
        });
        Ok(())
    }
}
