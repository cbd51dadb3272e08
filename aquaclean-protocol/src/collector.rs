//! Reassembly of frames into messages.
//!
//! Frames are grouped by transaction id. A start frame with the Final flag
//! set completes immediately without allocating a reassembly buffer;
//! anything else opens or extends a pending message that closes on its
//! Final frame.

use crate::error::ReassemblyError;
use crate::frame::{Frame, FrameKind, TransactionId};
use crate::message::Message;
use bytes::{Bytes, BytesMut};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Default age after which an unfinished message is discarded.
pub const DEFAULT_MAX_PENDING_AGE: Duration = Duration::from_secs(5);

/// Default bound on a reassembled message body.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Outcome of feeding one frame to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorEvent {
    MessageComplete(Message),
    AwaitingMore,
    Error(ReassemblyError),
}

struct PendingMessage {
    message_type: bool,
    body: BytesMut,
    frames: usize,
    started_at: Instant,
}

/// Collects frames into complete messages.
pub struct FrameCollector {
    pending: HashMap<TransactionId, PendingMessage>,
    /// Transactions whose last message completed and which no start frame has reopened.
    completed: HashSet<TransactionId>,
    max_pending_age: Duration,
    max_message_size: usize,
}

impl FrameCollector {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            completed: HashSet::new(),
            max_pending_age: DEFAULT_MAX_PENDING_AGE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_pending_age(mut self, age: Duration) -> Self {
        self.max_pending_age = age;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Feeds a frame received now.
    pub fn on_frame(&mut self, frame: Frame) -> CollectorEvent {
        self.on_frame_at(frame, Instant::now())
    }

    /// Feeds a frame received at `now`.
    pub fn on_frame_at(&mut self, frame: Frame, now: Instant) -> CollectorEvent {
        self.evict_stale(now);

        let transaction = frame.transaction();
        let kind = frame.kind();

        if kind.starts_message() {
            self.completed.remove(&transaction);
            if self.pending.remove(&transaction).is_some() {
                tracing::warn!(
                    "Discarding unfinished message for transaction {}: new message started",
                    transaction
                );
            }

            if frame.is_last() {
                return self.complete(transaction, frame.header.message_type, frame.payload, 1);
            }

            if frame.payload.len() > self.max_message_size {
                return self.too_large(transaction);
            }
            let mut body = BytesMut::with_capacity(frame.payload.len() * 2);
            body.extend_from_slice(&frame.payload);
            self.pending.insert(
                transaction,
                PendingMessage {
                    message_type: frame.header.message_type,
                    body,
                    frames: 1,
                    started_at: now,
                },
            );
            tracing::trace!("Opened message for transaction {}", transaction);
            return CollectorEvent::AwaitingMore;
        }

        if kind != FrameKind::Consecutive {
            tracing::debug!(
                "Dropping {:?} frame for transaction {}",
                kind,
                transaction
            );
            return CollectorEvent::Error(ReassemblyError::UnexpectedKind(kind));
        }

        let mut entry = match self.pending.entry(transaction) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(_) => {
                let err = if self.completed.contains(&transaction) {
                    ReassemblyError::AlreadyComplete(transaction)
                } else {
                    ReassemblyError::UnknownTransaction(transaction)
                };
                tracing::debug!("Dropping continuation frame: {}", err);
                return CollectorEvent::Error(err);
            }
        };

        if entry.get().body.len() + frame.payload.len() > self.max_message_size {
            entry.remove();
            return self.too_large(transaction);
        }
        let pending = entry.get_mut();
        pending.body.extend_from_slice(&frame.payload);
        pending.frames += 1;

        if !frame.is_last() {
            return CollectorEvent::AwaitingMore;
        }

        let done = entry.remove();
        self.complete(
            transaction,
            done.message_type,
            done.body.freeze(),
            done.frames,
        )
    }

    fn complete(
        &mut self,
        transaction: TransactionId,
        message_type: bool,
        body: Bytes,
        frames: usize,
    ) -> CollectorEvent {
        self.completed.insert(transaction);
        tracing::trace!(
            "Message complete: transaction={} frames={} bytes={}",
            transaction,
            frames,
            body.len()
        );
        CollectorEvent::MessageComplete(Message {
            transaction,
            message_type,
            body,
            frames,
        })
    }

    fn too_large(&mut self, transaction: TransactionId) -> CollectorEvent {
        tracing::warn!(
            "Dropping message for transaction {}: exceeds {} bytes",
            transaction,
            self.max_message_size
        );
        CollectorEvent::Error(ReassemblyError::MessageTooLarge {
            transaction,
            max: self.max_message_size,
        })
    }

    /// Discards unfinished messages older than the configured age.
    ///
    /// Returns the number of messages discarded.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let max_age = self.max_pending_age;
        let before = self.pending.len();
        self.pending.retain(|transaction, pending| {
            let keep = now.saturating_duration_since(pending.started_at) <= max_age;
            if !keep {
                tracing::debug!(
                    "Evicting unfinished message for transaction {} after {} frames",
                    transaction,
                    pending.frames
                );
            }
            keep
        });
        before - self.pending.len()
    }

    /// Returns the number of unfinished messages.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops all reassembly state.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.completed.clear();
    }
}

impl Default for FrameCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameHeader;

    fn tid(n: u8) -> TransactionId {
        TransactionId::new(n).unwrap()
    }

    fn frame(kind: FrameKind, transaction: u8, last: bool, payload: &'static [u8]) -> Frame {
        let mut header = FrameHeader::new(kind, tid(transaction));
        header.last = last;
        Frame::new(header, Bytes::from_static(payload))
    }

    fn expect_message(event: CollectorEvent) -> Message {
        match event {
            CollectorEvent::MessageComplete(message) => message,
            other => panic!("Expected MessageComplete, got {:?}", other),
        }
    }

    #[test]
    fn test_single_frame_fast_path() {
        let mut collector = FrameCollector::new();
        let message = expect_message(collector.on_frame(frame(FrameKind::Start, 3, true, b"abc")));

        assert_eq!(message.transaction, tid(3));
        assert_eq!(message.body.as_ref(), b"abc");
        assert_eq!(message.frames, 1);
        assert_eq!(collector.pending_count(), 0);
    }

    #[test]
    fn test_fast_path_independent_of_prior_state() {
        let mut collector = FrameCollector::new();
        collector.on_frame(frame(FrameKind::Start, 1, false, b"xx"));
        collector.on_frame(frame(FrameKind::Start, 2, true, b"yy"));

        let message = expect_message(collector.on_frame(frame(FrameKind::Start, 4, true, b"zz")));
        assert_eq!(message.body.as_ref(), b"zz");
    }

    #[test]
    fn test_three_frame_reassembly() {
        let mut collector = FrameCollector::new();
        assert_eq!(
            collector.on_frame(frame(FrameKind::Start, 5, false, b"one-")),
            CollectorEvent::AwaitingMore
        );
        assert_eq!(
            collector.on_frame(frame(FrameKind::Consecutive, 5, false, b"two-")),
            CollectorEvent::AwaitingMore
        );
        assert_eq!(collector.pending_count(), 1);
        let message =
            expect_message(collector.on_frame(frame(FrameKind::Consecutive, 5, true, b"three")));

        assert_eq!(message.body.as_ref(), b"one-two-three");
        assert_eq!(message.frames, 3);
        assert_eq!(collector.pending_count(), 0);
    }

    #[test]
    fn test_interleaved_transactions() {
        let mut collector = FrameCollector::new();
        collector.on_frame(frame(FrameKind::Start, 1, false, b"a1"));
        collector.on_frame(frame(FrameKind::Start, 2, false, b"b1"));
        collector.on_frame(frame(FrameKind::Consecutive, 1, false, b"a2"));

        let b = expect_message(collector.on_frame(frame(FrameKind::Consecutive, 2, true, b"b2")));
        let a = expect_message(collector.on_frame(frame(FrameKind::Consecutive, 1, true, b"a3")));

        assert_eq!(b.body.as_ref(), b"b1b2");
        assert_eq!(a.body.as_ref(), b"a1a2a3");
    }

    #[test]
    fn test_continuation_for_unknown_transaction() {
        let mut collector = FrameCollector::new();
        let event = collector.on_frame(frame(FrameKind::Consecutive, 6, true, b"late"));
        assert_eq!(
            event,
            CollectorEvent::Error(ReassemblyError::UnknownTransaction(tid(6)))
        );

        // Collector keeps working.
        let message = expect_message(collector.on_frame(frame(FrameKind::Start, 6, true, b"ok")));
        assert_eq!(message.body.as_ref(), b"ok");
    }

    #[test]
    fn test_duplicate_final_frame_dropped() {
        let mut collector = FrameCollector::new();
        collector.on_frame(frame(FrameKind::Start, 2, false, b"a"));
        let last = frame(FrameKind::Consecutive, 2, true, b"b");
        expect_message(collector.on_frame(last.clone()));

        assert_eq!(
            collector.on_frame(last),
            CollectorEvent::Error(ReassemblyError::AlreadyComplete(tid(2)))
        );
    }

    #[test]
    fn test_new_start_replaces_unfinished_message() {
        let mut collector = FrameCollector::new();
        collector.on_frame(frame(FrameKind::Start, 0, false, b"stale"));
        collector.on_frame(frame(FrameKind::Start, 0, false, b"fresh-"));
        let message = expect_message(collector.on_frame(frame(FrameKind::Consecutive, 0, true, b"end")));
        assert_eq!(message.body.as_ref(), b"fresh-end");
    }

    #[test]
    fn test_flow_control_frame_dropped() {
        let mut collector = FrameCollector::new();
        assert_eq!(
            collector.on_frame(frame(FrameKind::FlowControl, 1, true, b"")),
            CollectorEvent::Error(ReassemblyError::UnexpectedKind(FrameKind::FlowControl))
        );
        assert_eq!(
            collector.on_frame(frame(FrameKind::Reserved(6), 1, true, b"")),
            CollectorEvent::Error(ReassemblyError::UnexpectedKind(FrameKind::Reserved(6)))
        );
    }

    #[test]
    fn test_extended_frame_starts_message() {
        let mut collector = FrameCollector::new();
        collector.on_frame(frame(FrameKind::Extended, 7, false, b"ext-"));
        let message = expect_message(collector.on_frame(frame(FrameKind::Consecutive, 7, true, b"body")));
        assert_eq!(message.body.as_ref(), b"ext-body");
    }

    #[test]
    fn test_stale_messages_evicted() {
        let mut collector = FrameCollector::new().with_max_pending_age(Duration::from_secs(2));
        let start = Instant::now();
        collector.on_frame_at(frame(FrameKind::Start, 3, false, b"abc"), start);
        assert_eq!(collector.pending_count(), 1);

        assert_eq!(collector.evict_stale(start + Duration::from_secs(1)), 0);
        assert_eq!(collector.evict_stale(start + Duration::from_secs(3)), 1);
        assert_eq!(collector.pending_count(), 0);

        // The Final frame that finally arrives finds nothing to extend.
        let event = collector.on_frame_at(
            frame(FrameKind::Consecutive, 3, true, b"def"),
            start + Duration::from_secs(4),
        );
        assert_eq!(
            event,
            CollectorEvent::Error(ReassemblyError::UnknownTransaction(tid(3)))
        );
    }

    #[test]
    fn test_message_size_limit() {
        let mut collector = FrameCollector::new().with_max_message_size(6);
        collector.on_frame(frame(FrameKind::Start, 1, false, b"1234"));
        assert_eq!(
            collector.on_frame(frame(FrameKind::Consecutive, 1, false, b"567")),
            CollectorEvent::Error(ReassemblyError::MessageTooLarge {
                transaction: tid(1),
                max: 6
            })
        );
        assert_eq!(collector.pending_count(), 0);
    }
}
