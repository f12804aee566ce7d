//! EVM DEX 事件与领域模型核心模块
//!
//! - 交易对 / 代币 / 协议 / 过滤码
//! - 事件定义与能力查询
//! - 金额换算与 USD 定价
//! - 交易级、区块级结果与下游消息

pub mod amounts; // 金额换算
pub mod events;  // 事件定义
pub mod results; // 解析结果
pub mod rows;    // 存储行
pub mod types;   // 领域类型

pub use amounts::{calc_amount_and_price, parse_amounts_by_pair, parse_signed_amounts_by_pair, wei_to_decimal};
pub use events::{DexEvent, EventMetadata, PoolUpdate};
pub use results::{merge_pool_updates, BlockMessage, BlockResult, TxResult};
pub use rows::{ActionRow, MigratedPool, PairRow, TokenRow, TxRow};
pub use types::{BaseTokens, FilterCode, Pair, PoolFamily, ProtocolId, Token, TokenCore};
