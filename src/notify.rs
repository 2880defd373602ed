//! LISTEN/NOTIFY message buffering.
use std::collections::VecDeque;

use crate::{common::ByteStr, protocol::backend::NotificationResponse};

/// An asynchronous notification delivered by `NOTIFY`.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The process ID of the notifying backend.
    pub process_id: u32,
    /// The channel the notification was raised on.
    pub channel: ByteStr,
    /// The payload string passed by the notifying process.
    pub payload: ByteStr,
}

impl From<NotificationResponse> for Notification {
    fn from(msg: NotificationResponse) -> Self {
        Notification {
            process_id: msg.process_id,
            channel: msg.channel,
            payload: msg.payload,
        }
    }
}

/// Append-only FIFO of notifications observed in any response stream.
///
/// Arrival order is preserved, nothing is deduplicated and nothing
/// expires; bounding growth is the caller's job, by draining regularly.
#[derive(Debug, Default)]
pub(crate) struct NotificationQueue {
    inner: VecDeque<Notification>,
}

impl NotificationQueue {
    pub(crate) fn push(&mut self, notification: Notification) {
        self.inner.push_back(notification);
    }

    /// Pop the oldest notification, `None` when empty. Never blocks.
    pub(crate) fn pop(&mut self) -> Option<Notification> {
        self.inner.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}
