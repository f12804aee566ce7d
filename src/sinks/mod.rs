//! 外部依赖接口：缓存、存储、消息总线
//!
//! The pipeline only talks to these traits; concrete backends are injected at
//! construction.

pub mod bus;
pub mod memory;
pub mod watermark;

pub use bus::{ChannelBus, LogBus};
pub use memory::{MemoryCache, MemoryStore};
pub use watermark::WatermarkFile;

use alloy_primitives::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::core::results::BlockMessage;
use crate::core::rows::{ActionRow, PairRow, TokenRow, TxRow};
use crate::core::types::{Pair, Token};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("store: {0}")]
    Store(String),
    #[error("bus: {0}")]
    Bus(String),
    /// The backend refused the write; repeating it will not help.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, SinkError::Rejected(_))
    }
}

/// Shared pair/token/price cache plus the finished-block watermark and the
/// migration markers.
pub trait Cache: Send + Sync {
    fn get_pair(&self, address: &Address) -> Option<Pair>;
    fn set_pair(&self, pair: Pair);
    fn pair_exists(&self, address: &Address) -> bool;
    fn del_pair(&self, address: &Address);

    fn get_token(&self, address: &Address) -> Option<Token>;
    fn set_token(&self, token: Token);

    fn get_price(&self, height: u64) -> Option<Decimal>;
    fn set_price(&self, height: u64, price: Decimal);

    /// Highest fully committed height, 0 when nothing has been committed.
    fn get_finished_block(&self) -> u64;
    fn set_finished_block(&self, height: u64);

    fn migrate_token_exists(&self, token: &Address) -> bool;
    fn set_migrate_token(&self, token: &Address);
    fn del_migrate_token(&self, token: &Address);
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn add_tokens(&self, rows: &[TokenRow]) -> Result<(), SinkError>;
    async fn add_pairs(&self, rows: &[PairRow]) -> Result<(), SinkError>;
    async fn add_txs(&self, rows: &[TxRow]) -> Result<(), SinkError>;
    async fn add_actions(&self, rows: &[ActionRow]) -> Result<(), SinkError>;
    /// Links `token` to its AMM pair. A token with no row is left alone.
    async fn update_token_main_pair(&self, token: &str, pair: &str) -> Result<(), SinkError>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send(&self, message: &BlockMessage) -> Result<(), SinkError>;
}
