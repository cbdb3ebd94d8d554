//! Unread counts and read-state propagation.

use std::sync::Arc;

use futures::{stream, StreamExt};
use gateway::{Gateway, GatewayError};
use shared::{
    domain::{MessageId, RoomId, UserId},
    records::MessageRecord,
};
use tracing::{debug, warn};

use crate::error::Result;

/// Concurrent reader appends issued by one sweep.
pub const DEFAULT_READ_FAN_OUT: usize = 8;

/// Remaining readers of a message, shown only on the current user's own
/// messages outside the self-room.
pub fn unread_count_for(
    message: &MessageRecord,
    room_member_count: usize,
    current_user: UserId,
    is_self_room: bool,
) -> usize {
    if message.sender_id != current_user || is_self_room {
        return 0;
    }
    room_member_count.saturating_sub(message.reader_count())
}

/// Whether `user` still has to read a message someone else wrote.
pub fn is_unread_by(message: &MessageRecord, user: UserId) -> bool {
    message.sender_id != user && !message.is_read_by(user)
}

/// Outcome of [`ReadReceipts::mark_all_read`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSweep {
    pub marked: usize,
    pub failed: usize,
}

pub struct ReadReceipts {
    gateway: Arc<dyn Gateway>,
    fan_out: usize,
}

impl ReadReceipts {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            fan_out: DEFAULT_READ_FAN_OUT,
        }
    }

    pub fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out.max(1);
        self
    }

    /// Record that `current_user` read `message`. Returns `false` when there
    /// was nothing to record. The append itself is atomic at the gateway.
    pub async fn mark_read(&self, message: &MessageRecord, current_user: UserId) -> Result<bool> {
        if !is_unread_by(message, current_user) {
            return Ok(false);
        }
        self.gateway.append_reader(message.id, current_user).await?;
        debug!(message_id = %message.id, user_id = %current_user, "marked read");
        Ok(true)
    }

    /// Mark every loaded message of `room_id` that someone else wrote and
    /// `current_user` has not read. Failures are logged and counted.
    pub async fn mark_all_read(
        &self,
        room_id: RoomId,
        is_self_room: bool,
        current_user: UserId,
        messages: &[MessageRecord],
    ) -> ReadSweep {
        if is_self_room {
            return ReadSweep::default();
        }
        let targets: Vec<MessageId> = messages
            .iter()
            .filter(|message| message.room_id == room_id && is_unread_by(message, current_user))
            .map(|message| message.id)
            .collect();
        if targets.is_empty() {
            return ReadSweep::default();
        }

        let backend = &self.gateway;
        let results: Vec<(MessageId, Result<(), GatewayError>)> = stream::iter(targets)
            .map(|message_id| async move {
                (message_id, backend.append_reader(message_id, current_user).await)
            })
            .buffer_unordered(self.fan_out)
            .collect()
            .await;

        let mut sweep = ReadSweep::default();
        for (message_id, result) in results {
            match result {
                Ok(()) => sweep.marked += 1,
                Err(err) => {
                    sweep.failed += 1;
                    warn!(%message_id, %room_id, error = %err, "read receipt dropped");
                }
            }
        }
        debug!(%room_id, marked = sweep.marked, failed = sweep.failed, "read sweep finished");
        sweep
    }
}

#[cfg(test)]
#[path = "tests/receipts_tests.rs"]
mod tests;
