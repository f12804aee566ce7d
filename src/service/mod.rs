//! 交易对/代币解析服务
//!
//! Resolves unknown pool addresses into verified, normalized pairs with token
//! metadata, deduplicating concurrent lookups and caching every outcome
//! (including filtered ones).

pub mod contract_caller;
pub mod pair_service;
pub mod price;
pub mod singleflight;

pub use contract_caller::ContractCaller;
pub use pair_service::{PairService, PairWrap};
pub use price::{FixedPriceSource, PriceSource, ReservePriceSource};
pub use singleflight::SingleFlight;

use alloy_primitives::Address;

use crate::rpc::RpcError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
    #[error("contract call timed out")]
    Timeout,
    #[error("empty call output from {0}")]
    OutputEmpty(Address),
    #[error("malformed call output from {0}")]
    WrongOutput(Address),
    #[error("token {0} is filtered")]
    TokenFiltered(Address),
    #[error("zero reserves in price pair {0}")]
    ZeroReserves(Address),
}
