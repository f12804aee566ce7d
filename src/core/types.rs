//! 核心领域类型：协议、过滤码、基础代币、交易对与代币

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::truncate_chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[serde(into = "u8", try_from = "u8")]
pub enum ProtocolId {
    UniswapV2 = 1,
    UniswapV3 = 2,
    XLaunch = 3,
}

/// How a pool's token identity is read on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolFamily {
    /// `token0()` / `token1()`
    Amm,
    /// `token()`, paired with the native coin
    Launch,
}

impl ProtocolId {
    pub const ALL: [ProtocolId; 3] = [ProtocolId::UniswapV2, ProtocolId::UniswapV3, ProtocolId::XLaunch];

    pub fn name(self) -> &'static str {
        match self {
            ProtocolId::UniswapV2 => "UniswapV2",
            ProtocolId::UniswapV3 => "UniswapV3",
            ProtocolId::XLaunch => "XLaunch",
        }
    }

    /// Lower-case identifier used in action names (`on-<slug>`).
    pub fn slug(self) -> &'static str {
        match self {
            ProtocolId::UniswapV2 => "uniswap-v2",
            ProtocolId::UniswapV3 => "uniswap-v3",
            ProtocolId::XLaunch => "xlaunch",
        }
    }

    pub fn family(self) -> PoolFamily {
        match self {
            ProtocolId::UniswapV2 | ProtocolId::UniswapV3 => PoolFamily::Amm,
            ProtocolId::XLaunch => PoolFamily::Launch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[serde(into = "u8", try_from = "u8")]
pub enum FilterCode {
    GetToken = 1,
    VerifyFailed = 2,
    NoBaseToken = 3,
    NoXLaunchToken = 4,
}

/// Native coin, its wrapped form, and the stablecoins trades are priced against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTokens {
    pub wrapped_native: Address,
    pub stablecoins: Vec<Address>,
    pub native_symbol: String,
    pub native_decimals: u8,
}

impl BaseTokens {
    /// Zero address stands for the native coin.
    pub fn is_native(&self, a: &Address) -> bool {
        a.is_zero() || *a == self.wrapped_native
    }

    pub fn is_stablecoin(&self, a: &Address) -> bool {
        self.stablecoins.contains(a)
    }

    pub fn is_base(&self, a: &Address) -> bool {
        self.is_native(a) || self.is_stablecoin(a)
    }

    pub fn native_core(&self) -> TokenCore {
        TokenCore { address: Address::ZERO, symbol: self.native_symbol.clone(), decimals: self.native_decimals }
    }

    pub fn native_token(&self) -> Token {
        Token {
            address: Address::ZERO,
            name: self.native_symbol.clone(),
            symbol: self.native_symbol.clone(),
            decimals: self.native_decimals,
            ..Token::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCore {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenCore {
    pub fn new(address: Address) -> Self {
        Self { address, ..Self::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub creator: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: Decimal,
    pub block: u64,
    pub block_time: Option<DateTime<Utc>>,
    pub program: String,
    /// Decimals could not be read; the token is unusable for pricing.
    pub filtered: bool,
    pub url: String,
    pub description: String,
}

impl Token {
    pub fn core(&self) -> TokenCore {
        TokenCore { address: self.address, symbol: self.symbol.clone(), decimals: self.decimals }
    }
}

const MAX_PAIR_SYMBOL0: usize = 64;
const MAX_PAIR_SYMBOL1: usize = 63;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub address: Address,
    /// Logical order: token0 is the quote-side (non-base) token after normalization.
    pub token0: TokenCore,
    pub token1: TokenCore,
    /// Logical order differs from on-chain order.
    pub tokens_reversed: bool,
    /// Raw wire units, logical order.
    pub init_reserve0: U256,
    pub init_reserve1: U256,
    pub block: u64,
    pub block_time: Option<DateTime<Utc>>,
    pub protocol: Option<ProtocolId>,
    pub filter: Option<FilterCode>,
}

impl Pair {
    /// Pair in on-chain token order, not yet normalized.
    pub fn new(address: Address, token0: Address, token1: Address) -> Self {
        Self { address, token0: TokenCore::new(token0), token1: TokenCore::new(token1), ..Self::default() }
    }

    pub fn filtered(address: Address, code: FilterCode) -> Self {
        Self { address, filter: Some(code), ..Self::default() }
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    /// Filters the pair if neither side is a base token. Returns whether it
    /// is filtered now.
    pub fn apply_base_token_filter(&mut self, bases: &BaseTokens) -> bool {
        if !bases.is_base(&self.token0.address) && !bases.is_base(&self.token1.address) {
            self.filter = Some(FilterCode::NoBaseToken);
        }
        self.is_filtered()
    }

    /// Puts the base token on the token1 side. Only ever swaps once.
    pub fn normalize(&mut self, bases: &BaseTokens) {
        if self.tokens_reversed {
            return;
        }
        if bases.is_base(&self.token0.address) && !bases.is_base(&self.token1.address) {
            std::mem::swap(&mut self.token0, &mut self.token1);
            std::mem::swap(&mut self.init_reserve0, &mut self.init_reserve1);
            self.tokens_reversed = true;
        }
    }

    /// Sets initial reserves given in on-chain token order.
    pub fn set_init_reserves_wire(&mut self, reserve0: U256, reserve1: U256) {
        if self.tokens_reversed {
            self.init_reserve0 = reserve1;
            self.init_reserve1 = reserve0;
        } else {
            self.init_reserve0 = reserve0;
            self.init_reserve1 = reserve1;
        }
    }

    /// The side that is not a base token, defaulting to token0.
    pub fn non_base_token(&self, bases: &BaseTokens) -> Address {
        if bases.is_base(&self.token0.address) && !bases.is_base(&self.token1.address) {
            self.token1.address
        } else {
            self.token0.address
        }
    }

    pub fn name(&self) -> String {
        format!(
            "{}/{}",
            truncate_chars(&self.token0.symbol, MAX_PAIR_SYMBOL0),
            truncate_chars(&self.token1.symbol, MAX_PAIR_SYMBOL1)
        )
    }
}
