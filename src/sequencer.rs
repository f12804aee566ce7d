//! Ordering gate
//!
//! Workers finish out of order; the gate lets each one commit only when its
//! sequence number is the next expected one. Every advance is broadcast to all
//! waiters because the next eligible waiter depends on data, not arrival order.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

/// Anything committed through the gate.
pub trait Sequenced {
    fn sequence(&self) -> u64;
}

/// Receives items in strictly ascending sequence order.
#[async_trait]
pub trait Committer<T>: Send + Sync {
    async fn commit(&self, item: T);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencerError {
    #[error("sequencer already initialized at {0}")]
    AlreadyInitialized(u64),
    #[error("sequence {sequence} already committed (next expected {next})")]
    Stale { sequence: u64, next: u64 },
    #[error("sequencer closed")]
    Closed,
}

pub struct Sequencer {
    enabled: bool,
    /// `None` until `init`, then the next sequence allowed to commit.
    next: watch::Sender<Option<u64>>,
}

impl Sequencer {
    pub fn new(enabled: bool) -> Self {
        let (next, _) = watch::channel(None);
        Self { enabled, next }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sets the first sequence to commit. A second call is an invariant violation.
    pub fn init(&self, first: u64) -> Result<(), SequencerError> {
        let mut previous = None;
        self.next.send_if_modified(|next| match next {
            Some(current) => {
                previous = Some(*current);
                false
            }
            None => {
                *next = Some(first);
                true
            }
        });
        match previous {
            Some(current) => Err(SequencerError::AlreadyInitialized(current)),
            None => Ok(()),
        }
    }

    /// Next sequence the gate will let through, if initialized.
    pub fn next_sequence(&self) -> Option<u64> {
        *self.next.borrow()
    }

    /// Blocks until `item` is next in line, commits it, then wakes every waiter.
    ///
    /// With ordering disabled the commit happens immediately. A gap in the
    /// sequence stalls all later items forever.
    pub async fn commit_with_sequence<T, C>(&self, item: T, committer: &C) -> Result<(), SequencerError>
    where
        T: Sequenced + Send,
        C: Committer<T> + ?Sized,
    {
        if !self.enabled {
            committer.commit(item).await;
            return Ok(());
        }

        let sequence = item.sequence();
        let mut rx = self.next.subscribe();
        let next = rx
            .wait_for(|next| matches!(next, Some(n) if *n >= sequence))
            .await
            .map(|next| (*next).unwrap_or(sequence))
            .map_err(|_| SequencerError::Closed)?;
        if next != sequence {
            return Err(SequencerError::Stale { sequence, next });
        }

        committer.commit(item).await;
        self.next.send_modify(|next| *next = Some(sequence + 1));
        Ok(())
    }
}

/// Forwards committed items into a bounded channel.
pub struct ChannelCommitter<T> {
    tx: mpsc::Sender<T>,
}

impl<T> ChannelCommitter<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl<T: Send + 'static> Committer<T> for ChannelCommitter<T> {
    async fn commit(&self, item: T) {
        if self.tx.send(item).await.is_err() {
            log::warn!("commit channel closed, dropping item");
        }
    }
}
