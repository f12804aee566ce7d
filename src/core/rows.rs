//! Store rows. Addresses are EIP-55 strings; amounts are decimal strings.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{Pair, Token};
use crate::common::truncate_chars;

const MAX_TOKEN_NAME: usize = 64;
const MAX_TOKEN_SYMBOL: usize = 32;
const MAX_SUPPLY_LEN: usize = 64;
const MAX_URL: usize = 256;
const MAX_DESCRIPTION: usize = 512;

pub fn fmt_address(a: &Address) -> String {
    a.to_checksum(None)
}

pub fn fmt_hash(h: &B256) -> String {
    format!("{h:#x}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRow {
    pub tx_hash: String,
    pub event: String,
    pub token0_amount: Decimal,
    pub token1_amount: Decimal,
    pub maker: String,
    pub token0_address: String,
    pub token1_address: String,
    pub amount_usd: Decimal,
    pub price_usd: Decimal,
    pub block: u64,
    pub block_at: DateTime<Utc>,
    /// Log index within the block.
    pub block_index: u64,
    pub tx_index: u64,
    pub pair_address: String,
    pub program: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRow {
    pub name: String,
    pub address: String,
    pub token0: String,
    pub token1: String,
    pub chain_id: u64,
    /// Raw initial reserves in wire units.
    pub reserve0: String,
    pub reserve1: String,
    pub block: u64,
    pub block_at: Option<DateTime<Utc>>,
    pub program: String,
}

impl PairRow {
    pub fn from_pair(pair: &Pair, chain_id: u64) -> Self {
        Self {
            name: pair.name(),
            address: fmt_address(&pair.address),
            token0: fmt_address(&pair.token0.address),
            token1: fmt_address(&pair.token1.address),
            chain_id,
            reserve0: pair.init_reserve0.to_string(),
            reserve1: pair.init_reserve1.to_string(),
            block: pair.block,
            block_at: pair.block_time,
            program: pair.protocol.map(|p| p.name().to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRow {
    pub address: String,
    pub creator: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: String,
    pub chain_id: u64,
    pub block: u64,
    pub block_at: Option<DateTime<Utc>>,
    pub program: String,
    pub main_pair: String,
    pub url: String,
    pub description: String,
}

impl TokenRow {
    pub fn from_token(token: &Token, chain_id: u64) -> Self {
        let mut total_supply = token.total_supply.normalize().to_string();
        if total_supply.chars().count() > MAX_SUPPLY_LEN {
            total_supply = "0".to_string();
        }
        Self {
            address: fmt_address(&token.address),
            creator: if token.creator.is_zero() { String::new() } else { fmt_address(&token.creator) },
            name: truncate_chars(&token.name, MAX_TOKEN_NAME),
            symbol: truncate_chars(&token.symbol, MAX_TOKEN_SYMBOL),
            decimals: token.decimals,
            total_supply,
            chain_id,
            block: token.block,
            block_at: token.block_time,
            program: token.program.clone(),
            main_pair: String::new(),
            url: truncate_chars(&token.url, MAX_URL),
            description: truncate_chars(&token.description, MAX_DESCRIPTION),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRow {
    pub maker: String,
    pub token: String,
    pub pair: String,
    pub action: String,
    pub tx_hash: String,
    pub creator: String,
    pub block: u64,
    pub block_at: DateTime<Utc>,
}

/// A launch pool whose liquidity moved to an AMM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratedPool {
    pub pool: String,
    pub token: String,
}
