//! 区块流水线：获取 -> 解析 -> 有序提交

pub mod block_context;
pub mod block_getter;
pub mod block_parser;

pub use block_context::BlockContext;
pub use block_getter::BlockGetter;
pub use block_parser::{BlockParser, ParserDeps};

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::results::BlockMessage;
use crate::rpc::RpcError;
use crate::sequencer::SequencerError;
use crate::sinks::SinkError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
    #[error("gate: {0}")]
    Sequencer(#[from] SequencerError),
    #[error("sink: {0}")]
    Sink(#[from] SinkError),
    #[error("tx index {index} out of range ({len} txs)")]
    TxIndexOutOfRange { index: u64, len: usize },
    #[error("already started")]
    AlreadyStarted,
    #[error("stopped")]
    Stopped,
}

/// Counters updated by the commit stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    blocks: AtomicU64,
    txs: AtomicU64,
    pairs: AtomicU64,
    tokens: AtomicU64,
    actions: AtomicU64,
    last_height: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub blocks: u64,
    pub txs: u64,
    pub pairs: u64,
    pub tokens: u64,
    pub actions: u64,
    pub last_height: u64,
}

impl PipelineStats {
    pub fn record(&self, message: &BlockMessage) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.txs.fetch_add(message.txs.len() as u64, Ordering::Relaxed);
        self.pairs.fetch_add(message.new_pairs.len() as u64, Ordering::Relaxed);
        self.tokens.fetch_add(message.new_tokens.len() as u64, Ordering::Relaxed);
        self.actions.fetch_add(message.actions.len() as u64, Ordering::Relaxed);
        self.last_height.store(message.height, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            txs: self.txs.load(Ordering::Relaxed),
            pairs: self.pairs.load(Ordering::Relaxed),
            tokens: self.tokens.load(Ordering::Relaxed),
            actions: self.actions.load(Ordering::Relaxed),
            last_height: self.last_height.load(Ordering::Relaxed),
        }
    }
}
