//! RPC 访问层：JSON-RPC 客户端、连接池、链上数据类型

pub mod client;
pub mod pool;
pub mod types;

pub use client::{JsonRpcClient, JsonRpcFactory};
pub use pool::{ClientFactory, ClientPool, PoolConfig, SlotState};
pub use types::{Block, Log, Receipt, Transaction};

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::common::is_retryable_message;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("subscription unavailable: {0}")]
    Subscription(String),
    #[error("no healthy client")]
    NoHealthyClient,
    #[error("client pool closed")]
    PoolClosed,
    #[error("timeout")]
    Timeout,
}

impl RpcError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Rpc { message, .. } => is_retryable_message(message),
            RpcError::PoolClosed => false,
            other => is_retryable_message(&other.to_string()),
        }
    }
}

/// Stream of new head heights.
pub type HeadStream = BoxStream<'static, Result<u64, RpcError>>;

/// The chain operations the pipeline needs. Implemented by a single
/// connection and by the pool that fans out over several.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Block with full transaction objects.
    async fn block_by_number(&self, height: u64) -> Result<Block, RpcError>;

    async fn block_receipts(&self, height: u64) -> Result<Vec<Receipt>, RpcError>;

    async fn subscribe_new_heads(&self) -> Result<HeadStream, RpcError>;

    /// `eth_call`; `at = None` means latest.
    async fn call_contract(&self, to: Address, data: Bytes, at: Option<u64>) -> Result<Bytes, RpcError>;
}
