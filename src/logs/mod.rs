//! Log parser module
//!
//! Receipt logs are routed by topic0 through the [`TopicRegistry`], unpacked
//! against the event's ABI layout, and decoded into [`DexEvent`]s.

pub mod topic_registry;
pub mod uniswap_v2;
pub mod uniswap_v3;
pub mod unpacker;
pub mod utils;
pub mod xlaunch;

pub use topic_registry::{DecodeInput, EventRole, EventSpec, ParserFn, TopicInfo, TopicRegistry};
pub use unpacker::{AbiKind, AbiValue, LogUnpacker};

use alloy_primitives::{Address, B256};

use crate::core::types::{Pair, ProtocolId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    NoTopics,
    #[error("no parser for topic {0}")]
    NoParser(B256),
    #[error("wrong topic count: expected {expected}, got {actual}")]
    WrongTopicLen { expected: usize, actual: usize },
    #[error("wrong data length: expected {expected} bytes, got {actual}")]
    WrongDataLen { expected: usize, actual: usize },
    #[error("cannot decode field {index} as {kind:?}")]
    Abi { index: usize, kind: AbiKind },
    #[error("missing value {0}")]
    MissingValue(usize),
    #[error("factory {0} is not whitelisted")]
    WrongFactoryAddress(Address),
    #[error("swap with both input amounts zero")]
    AmountInZero,
    #[error("swap with both output amounts zero")]
    AmountOutZero,
    #[error("swap amount0 is zero")]
    Amount0Zero,
    #[error("swap amount1 is zero")]
    Amount1Zero,
}

impl DecodeError {
    /// Topics this crate does not handle at all, as opposed to malformed ones.
    pub fn is_unknown_topic(&self) -> bool {
        matches!(self, DecodeError::NoTopics | DecodeError::NoParser(_))
    }
}

/// Pair announced by a factory event: base-token filter applied, then
/// normalized so the base token sits on the token1 side.
pub(crate) fn created_pair(input: &DecodeInput<'_>, protocol: ProtocolId, address: Address, token0: Address, token1: Address) -> Pair {
    let mut pair = Pair::new(address, token0, token1);
    pair.protocol = Some(protocol);
    pair.block = input.log.block_number;
    if !pair.apply_base_token_filter(input.bases) {
        pair.normalize(input.bases);
    }
    pair
}
