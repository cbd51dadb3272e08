//! Transaction correlation, timeouts and retries.
//!
//! Every request is tagged with a 3-bit transaction id and answered by a
//! message carrying the same id. The device handles one request at a time,
//! so sends are serialized; responses are matched by id only, never by
//! arrival order.

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::transport::{Transport, TransportError};
use aquaclean_protocol::{Encoder, Message, TransactionId};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

type Outcome = Result<Message, ClientError>;

/// Bookkeeping for a request awaiting its response.
#[derive(Debug)]
struct PendingTransaction {
    transaction_id: TransactionId,
    sent_at: Option<Instant>,
    attempt_count: u32,
    deadline: Option<Instant>,
    outcome: oneshot::Sender<Outcome>,
}

#[derive(Debug, Default)]
struct TransactionTable {
    cursor: TransactionId,
    pending: HashMap<TransactionId, PendingTransaction>,
}

/// Sends requests and correlates responses.
pub struct TransactionManager<T> {
    transport: T,
    config: SessionConfig,
    table: Mutex<TransactionTable>,
    /// Held by the request currently on the wire.
    turn: AsyncMutex<()>,
    closed: AtomicBool,
}

impl<T: Transport> TransactionManager<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            table: Mutex::new(TransactionTable::default()),
            turn: AsyncMutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Sends a request body and waits for the matching response.
    ///
    /// Each attempt waits `response_timeout`; failed attempts are retried
    /// after an exponentially growing delay until `max_attempts` is reached.
    /// Dropping the returned future releases the transaction id.
    pub async fn send(&self, body: Bytes) -> Result<Message, ClientError> {
        self.ensure_open()?;
        let _turn = self.turn.lock().await;
        self.ensure_open()?;

        let (transaction, mut rx) = self.allocate()?;
        let _release = Release {
            table: &self.table,
            transaction,
        };

        // Requests always carry the Message-Type flag.
        let frames: Vec<Bytes> =
            Encoder::encode_message(transaction, true, &body, self.config.mtu)?
                .into_iter()
                .map(BytesMut::freeze)
                .collect();

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.config.backoff_for(attempt - 1);
                debug!(
                    "Retrying transaction {} in {:?} (attempt {}/{})",
                    transaction, delay, attempt, max_attempts
                );
                tokio::select! {
                    _ = time::sleep(delay) => {}
                    outcome = &mut rx => return settle(transaction, outcome),
                }
            }

            self.mark_sent(transaction, attempt);
            if let Err(e) = self.write_frames(transaction, &frames).await {
                if e.is_fatal() {
                    return Err(e.into());
                }
                warn!("Send of transaction {} failed: {}", transaction, e);
                last_error = Some(e.into());
                continue;
            }

            match time::timeout(self.config.response_timeout, &mut rx).await {
                Ok(outcome) => return settle(transaction, outcome),
                Err(_) => {
                    warn!(
                        "Transaction {} timed out (attempt {}/{})",
                        transaction, attempt, max_attempts
                    );
                    last_error = None;
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::Timeout {
            transaction,
            attempts: max_attempts,
        }))
    }

    async fn write_frames(
        &self,
        transaction: TransactionId,
        frames: &[Bytes],
    ) -> Result<(), TransportError> {
        for frame in frames {
            if self.config.verbosity.dumps_frames() {
                trace!(transaction = %transaction, "TX {}", hex::encode(frame));
            }
            self.transport.send_bytes(frame.clone()).await?;
        }
        debug!(
            "Sent transaction {} ({} frames)",
            transaction,
            frames.len()
        );
        Ok(())
    }

    /// Routes a reassembled message.
    ///
    /// Returns the message back when no request is waiting for its
    /// transaction id; such messages are device-initiated.
    pub fn on_message(&self, message: Message) -> Option<Message> {
        let pending = self.table.lock().pending.remove(&message.transaction);
        match pending {
            Some(pending) => {
                let now = Instant::now();
                if pending.deadline.map_or(false, |deadline| now > deadline) {
                    debug!(
                        "Late response for transaction {} during backoff",
                        pending.transaction_id
                    );
                }
                debug!(
                    "Response for transaction {} after {} attempt(s) in {:?}",
                    pending.transaction_id,
                    pending.attempt_count,
                    pending.sent_at.map(|sent| now - sent).unwrap_or_default()
                );
                if let Err(Ok(message)) = pending.outcome.send(Ok(message)) {
                    // The caller went away between timeout and delivery.
                    return Some(message);
                }
                None
            }
            None => Some(message),
        }
    }

    /// Cancels a pending transaction. Returns whether one was pending.
    ///
    /// The id is released immediately and the request is not retried.
    pub fn cancel(&self, transaction: TransactionId) -> bool {
        let pending = self.table.lock().pending.remove(&transaction);
        match pending {
            Some(pending) => {
                debug!("Cancelled transaction {}", transaction);
                let _ = pending.outcome.send(Err(ClientError::Cancelled(transaction)));
                true
            }
            None => false,
        }
    }

    /// Fails every pending transaction and rejects further sends.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.table.lock().pending.drain().collect();
        if !drained.is_empty() {
            debug!("Failing {} pending transaction(s)", drained.len());
        }
        for (_, pending) in drained {
            let _ = pending.outcome.send(Err(ClientError::Disconnected));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the number of pending transactions.
    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    /// Returns the ids of pending transactions.
    pub fn pending_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self.table.lock().pending.keys().copied().collect();
        ids.sort();
        ids
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Disconnected);
        }
        Ok(())
    }

    /// Picks the next id round-robin, skipping ids still pending.
    fn allocate(&self) -> Result<(TransactionId, oneshot::Receiver<Outcome>), ClientError> {
        let mut table = self.table.lock();
        for _ in 0..TransactionId::COUNT {
            let candidate = table.cursor;
            table.cursor = candidate.next();
            if table.pending.contains_key(&candidate) {
                continue;
            }

            let (tx, rx) = oneshot::channel();
            table.pending.insert(
                candidate,
                PendingTransaction {
                    transaction_id: candidate,
                    sent_at: None,
                    attempt_count: 0,
                    deadline: None,
                    outcome: tx,
                },
            );
            return Ok((candidate, rx));
        }
        Err(ClientError::NoTransactionAvailable)
    }

    fn mark_sent(&self, transaction: TransactionId, attempt: u32) {
        if let Some(pending) = self.table.lock().pending.get_mut(&transaction) {
            let now = Instant::now();
            pending.sent_at = Some(now);
            pending.attempt_count = attempt;
            pending.deadline = Some(now + self.config.response_timeout);
        }
    }
}

fn settle(
    transaction: TransactionId,
    outcome: Result<Outcome, oneshot::error::RecvError>,
) -> Result<Message, ClientError> {
    // A dropped sender means the entry was removed without an outcome.
    outcome.unwrap_or(Err(ClientError::Cancelled(transaction)))
}

/// Removes the pending entry when the sending future finishes or is dropped.
struct Release<'a> {
    table: &'a Mutex<TransactionTable>,
    transaction: TransactionId,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.table.lock().pending.remove(&self.transaction);
    }
}
