//! DEX 事件定义
//!
//! One variant per decoded log kind. Capabilities are answered per variant,
//! and trade rows / pool updates are derived on demand from the event plus the
//! resolved pair; events themselves are never mutated after decoding.

use alloy_primitives::{Address, B256, I256, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::amounts::{calc_amount_and_price, parse_amounts_by_pair, parse_signed_amounts_by_pair};
use super::rows::{fmt_address, fmt_hash, TxRow};
use super::types::{BaseTokens, Pair, ProtocolId, Token};
use crate::rpc::Log;

pub const BUY: &str = "buy";
pub const SELL: &str = "sell";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub block_number: u64,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub log_index: u64,
    /// Emitting contract.
    pub address: Address,
    /// Protocols that may have emitted this topic, in verification order.
    pub protocols: SmallVec<[ProtocolId; 2]>,
}

impl EventMetadata {
    pub fn from_log(log: &Log, protocols: &[ProtocolId]) -> Self {
        Self {
            block_number: log.block_number,
            tx_hash: log.transaction_hash,
            tx_index: log.transaction_index,
            log_index: log.log_index,
            address: log.address,
            protocols: SmallVec::from_slice(protocols),
        }
    }
}

/// Net reserve change (or absolute reserves, for `Sync`) in logical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolUpdate {
    pub log_index: u64,
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub amount0: Decimal,
    pub amount1: Decimal,
}

// ====================== 事件结构 ======================

/// Launch pool creation; carries the pair and token it implies.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEvent {
    pub metadata: EventMetadata,
    pub pool: Address,
    pub creator: Address,
    pub token: Address,
    pub base_init: U256,
    pub token_init: U256,
    pub name: String,
    pub symbol: String,
    pub url: String,
    pub description: String,
    pub pair: Pair,
}

impl CreatedEvent {
    pub fn new_token(&self, block_time: DateTime<Utc>) -> Token {
        Token {
            address: self.token,
            creator: self.creator,
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.pair.token0.decimals,
            total_supply: Decimal::ZERO,
            block: self.metadata.block_number,
            block_time: Some(block_time),
            program: ProtocolId::XLaunch.name().to_string(),
            filtered: false,
            url: self.url.clone(),
            description: self.description.clone(),
        }
    }
}

/// AMM factory pair/pool creation. `pair` is normalized and may already be
/// filtered by the base-token policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PairCreatedEvent {
    pub metadata: EventMetadata,
    pub protocol: ProtocolId,
    pub pair: Pair,
    pub fee: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MintEvent {
    pub metadata: EventMetadata,
    pub sender: Address,
    pub amount0: U256,
    pub amount1: U256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BurnEvent {
    pub metadata: EventMetadata,
    pub sender: Address,
    pub amount0: U256,
    pub amount1: U256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    pub metadata: EventMetadata,
    pub reserve0: U256,
    pub reserve1: U256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapV2Event {
    pub metadata: EventMetadata,
    pub sender: Address,
    pub to: Address,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapV3Event {
    pub metadata: EventMetadata,
    pub sender: Address,
    pub recipient: Address,
    /// Signed pool deltas: positive flows into the pool.
    pub amount0: I256,
    pub amount1: I256,
    pub sqrt_price_x96: U256,
    pub liquidity: U256,
    pub tick: I256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuyEvent {
    pub metadata: EventMetadata,
    pub buyer: Address,
    pub native_amount: U256,
    pub token_amount: U256,
    pub native_raised: U256,
    pub tokens_sold: U256,
    pub fee: U256,
    pub migrated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SellEvent {
    pub metadata: EventMetadata,
    pub seller: Address,
    pub native_amount: U256,
    pub token_amount: U256,
    pub native_raised: U256,
    pub tokens_sold: U256,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DexEvent {
    Created(CreatedEvent),
    PairCreated(PairCreatedEvent),
    Mint(MintEvent),
    Burn(BurnEvent),
    Sync(SyncEvent),
    SwapV2(SwapV2Event),
    SwapV3(SwapV3Event),
    Buy(BuyEvent),
    Sell(SellEvent),
}

impl DexEvent {
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            DexEvent::Created(e) => &e.metadata,
            DexEvent::PairCreated(e) => &e.metadata,
            DexEvent::Mint(e) => &e.metadata,
            DexEvent::Burn(e) => &e.metadata,
            DexEvent::Sync(e) => &e.metadata,
            DexEvent::SwapV2(e) => &e.metadata,
            DexEvent::SwapV3(e) => &e.metadata,
            DexEvent::Buy(e) => &e.metadata,
            DexEvent::Sell(e) => &e.metadata,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DexEvent::Created(_) => "Created",
            DexEvent::PairCreated(_) => "PairCreated",
            DexEvent::Mint(_) => "Mint",
            DexEvent::Burn(_) => "Burn",
            DexEvent::Sync(_) => "Sync",
            DexEvent::SwapV2(_) | DexEvent::SwapV3(_) => "Swap",
            DexEvent::Buy(_) => "Buy",
            DexEvent::Sell(_) => "Sell",
        }
    }

    /// Pool the event belongs to: the created pair for creations, the emitter otherwise.
    pub fn pair_address(&self) -> Address {
        match self {
            DexEvent::Created(e) => e.pool,
            DexEvent::PairCreated(e) => e.pair.address,
            other => other.metadata().address,
        }
    }

    pub fn possible_protocols(&self) -> &[ProtocolId] {
        &self.metadata().protocols
    }

    pub fn can_produce_pair(&self) -> bool {
        match self {
            DexEvent::Created(_) | DexEvent::PairCreated(_) => true,
            DexEvent::Mint(_)
            | DexEvent::Burn(_)
            | DexEvent::Sync(_)
            | DexEvent::SwapV2(_)
            | DexEvent::SwapV3(_)
            | DexEvent::Buy(_)
            | DexEvent::Sell(_) => false,
        }
    }

    pub fn can_produce_trade(&self) -> bool {
        match self {
            DexEvent::SwapV2(_) | DexEvent::SwapV3(_) | DexEvent::Buy(_) | DexEvent::Sell(_) => true,
            DexEvent::Created(_) | DexEvent::PairCreated(_) | DexEvent::Mint(_) | DexEvent::Burn(_) | DexEvent::Sync(_) => false,
        }
    }

    pub fn can_produce_pool_update(&self) -> bool {
        match self {
            DexEvent::PairCreated(_) => false,
            DexEvent::Created(_)
            | DexEvent::Mint(_)
            | DexEvent::Burn(_)
            | DexEvent::Sync(_)
            | DexEvent::SwapV2(_)
            | DexEvent::SwapV3(_)
            | DexEvent::Buy(_)
            | DexEvent::Sell(_) => true,
        }
    }

    pub fn is_pair_creation(&self) -> bool {
        self.can_produce_pair()
    }

    /// A buy that completed the bonding curve.
    pub fn is_migration(&self) -> bool {
        matches!(self, DexEvent::Buy(e) if e.migrated)
    }

    /// Trade row against a resolved pair. `maker` is the tx sender; launch
    /// events use their own buyer/seller instead.
    pub fn trade(&self, pair: &Pair, maker: Address, block_time: DateTime<Utc>, native_price: Decimal, bases: &BaseTokens) -> Option<TxRow> {
        let (event, maker, t0, t1, protocol) = match self {
            DexEvent::SwapV2(e) => {
                let (event, t0, t1) = swap_v2_direction(e, pair)?;
                (event, maker, t0, t1, pair.protocol.unwrap_or(ProtocolId::UniswapV2))
            }
            DexEvent::SwapV3(e) => {
                let (event, t0, t1) = swap_v3_direction(e, pair);
                (event, maker, t0, t1, pair.protocol.unwrap_or(ProtocolId::UniswapV3))
            }
            DexEvent::Buy(e) => {
                let (t0, t1) = parse_amounts_by_pair(e.token_amount, e.native_amount, pair);
                (BUY, e.buyer, t0, t1, ProtocolId::XLaunch)
            }
            DexEvent::Sell(e) => {
                let (t0, t1) = parse_amounts_by_pair(e.token_amount, e.native_amount, pair);
                (SELL, e.seller, t0, t1, ProtocolId::XLaunch)
            }
            _ => return None,
        };
        let (amount_usd, price_usd) = calc_amount_and_price(native_price, t0, t1, pair, bases);
        let meta = self.metadata();
        Some(TxRow {
            tx_hash: fmt_hash(&meta.tx_hash),
            event: event.to_string(),
            token0_amount: t0,
            token1_amount: t1,
            maker: fmt_address(&maker),
            token0_address: fmt_address(&pair.token0.address),
            token1_address: fmt_address(&pair.token1.address),
            amount_usd,
            price_usd,
            block: meta.block_number,
            block_at: block_time,
            block_index: meta.log_index,
            tx_index: meta.tx_index,
            pair_address: fmt_address(&pair.address),
            program: protocol.name().to_string(),
        })
    }

    pub fn pool_update(&self, pair: &Pair) -> Option<PoolUpdate> {
        let (amount0, amount1) = match self {
            DexEvent::Created(e) => parse_amounts_by_pair(e.token_init, e.base_init, pair),
            DexEvent::Mint(e) => parse_amounts_by_pair(e.amount0, e.amount1, pair),
            DexEvent::Burn(e) => {
                let (a0, a1) = parse_amounts_by_pair(e.amount0, e.amount1, pair);
                (-a0, -a1)
            }
            DexEvent::Sync(e) => parse_amounts_by_pair(e.reserve0, e.reserve1, pair),
            DexEvent::SwapV2(e) => {
                let (in0, in1) = parse_amounts_by_pair(e.amount0_in, e.amount1_in, pair);
                let (out0, out1) = parse_amounts_by_pair(e.amount0_out, e.amount1_out, pair);
                (in0 - out0, in1 - out1)
            }
            DexEvent::SwapV3(e) => parse_signed_amounts_by_pair(e.amount0, e.amount1, pair),
            DexEvent::Buy(e) => parse_amounts_by_pair(e.tokens_sold, e.native_raised, pair),
            DexEvent::Sell(e) => parse_amounts_by_pair(e.tokens_sold, e.native_raised, pair),
            DexEvent::PairCreated(_) => return None,
        };
        Some(PoolUpdate {
            log_index: self.metadata().log_index,
            address: pair.address,
            token0: pair.token0.address,
            token1: pair.token1.address,
            amount0,
            amount1,
        })
    }
}

/// Direction and logical amounts of a V2 swap.
///
/// `amount0In > 0` means token0 (wire order) went in: a sell of token0, or a
/// buy once the pair is reversed. `amount1In > 0` is the mirror case.
fn swap_v2_direction(e: &SwapV2Event, pair: &Pair) -> Option<(&'static str, Decimal, Decimal)> {
    let (event, raw0, raw1) = if !e.amount0_in.is_zero() {
        (if pair.tokens_reversed { BUY } else { SELL }, e.amount0_in, e.amount1_out)
    } else if !e.amount1_in.is_zero() {
        (if pair.tokens_reversed { SELL } else { BUY }, e.amount0_out, e.amount1_in)
    } else {
        return None;
    };
    let (t0, t1) = parse_amounts_by_pair(raw0, raw1, pair);
    Some((event, t0, t1))
}

/// V3 amounts are signed pool deltas in logical order after parsing: token0
/// leaving the pool is a buy, token1 leaving is a sell.
fn swap_v3_direction(e: &SwapV3Event, pair: &Pair) -> (&'static str, Decimal, Decimal) {
    let (t0, t1) = parse_signed_amounts_by_pair(e.amount0, e.amount1, pair);
    if t0.is_sign_negative() {
        (BUY, -t0, t1)
    } else if t1.is_sign_negative() {
        (SELL, t0, -t1)
    } else {
        (SELL, t0, t1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TokenCore;
    use alloy_primitives::address;
    use std::str::FromStr;

    const WETH: Address = address!("4200000000000000000000000000000000000006");
    const MEME: Address = address!("00000000000000000000000000000000000000a1");
    const POOL: Address = address!("00000000000000000000000000000000000000f1");

    fn bases() -> BaseTokens {
        BaseTokens { wrapped_native: WETH, stablecoins: vec![], native_symbol: "ETH".into(), native_decimals: 18 }
    }

    fn meta() -> EventMetadata {
        EventMetadata {
            block_number: 100,
            tx_hash: B256::repeat_byte(0xab),
            tx_index: 3,
            log_index: 9,
            address: POOL,
            protocols: SmallVec::from_slice(&[ProtocolId::UniswapV2]),
        }
    }

    /// MEME/WETH in logical order, both 18 decimals.
    fn pair(reversed: bool) -> Pair {
        Pair {
            address: POOL,
            token0: TokenCore { address: MEME, symbol: "MEME".into(), decimals: 18 },
            token1: TokenCore { address: WETH, symbol: "WETH".into(), decimals: 18 },
            tokens_reversed: reversed,
            protocol: Some(ProtocolId::UniswapV2),
            ..Pair::default()
        }
    }

    fn e18(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn swap(a0_in: U256, a1_in: U256, a0_out: U256, a1_out: U256) -> DexEvent {
        DexEvent::SwapV2(SwapV2Event {
            metadata: meta(),
            sender: Address::ZERO,
            to: Address::ZERO,
            amount0_in: a0_in,
            amount1_in: a1_in,
            amount0_out: a0_out,
            amount1_out: a1_out,
        })
    }

    #[test]
    fn test_swap_v2_token0_in_is_sell() {
        let ev = swap(e18(100), U256::ZERO, U256::ZERO, e18(2));
        let row = ev.trade(&pair(false), MEME, Utc::now(), dec("1000"), &bases()).unwrap();
        assert_eq!(row.event, SELL);
        assert_eq!(row.token0_amount, dec("100"));
        assert_eq!(row.token1_amount, dec("2"));
        assert_eq!(row.amount_usd, dec("2000"));
        assert_eq!(row.price_usd, dec("20"));
        assert_eq!(row.block_index, 9);
        assert_eq!(row.tx_index, 3);
    }

    #[test]
    fn test_swap_v2_reversed_flips_direction() {
        // wire token0 = WETH in, wire token1 = MEME out
        let ev = swap(e18(2), U256::ZERO, U256::ZERO, e18(100));
        let row = ev.trade(&pair(true), MEME, Utc::now(), dec("1000"), &bases()).unwrap();
        assert_eq!(row.event, BUY);
        assert_eq!(row.token0_amount, dec("100"));
        assert_eq!(row.token1_amount, dec("2"));

        let ev = swap(U256::ZERO, e18(100), e18(2), U256::ZERO);
        let row = ev.trade(&pair(true), MEME, Utc::now(), dec("1000"), &bases()).unwrap();
        assert_eq!(row.event, SELL);
    }

    #[test]
    fn test_swap_v2_pool_update_is_net_delta() {
        let ev = swap(e18(100), U256::ZERO, U256::ZERO, e18(2));
        let update = ev.pool_update(&pair(false)).unwrap();
        assert_eq!(update.amount0, dec("100"));
        assert_eq!(update.amount1, dec("-2"));
        assert_eq!(update.log_index, 9);
    }

    #[test]
    fn test_swap_v3_direction() {
        let neg = |n: u64| -I256::from_raw(e18(n));
        let pos = |n: u64| I256::from_raw(e18(n));
        let buy = DexEvent::SwapV3(SwapV3Event {
            metadata: meta(),
            sender: Address::ZERO,
            recipient: Address::ZERO,
            amount0: neg(50),
            amount1: pos(1),
            sqrt_price_x96: U256::ZERO,
            liquidity: U256::ZERO,
            tick: I256::ZERO,
        });
        let row = buy.trade(&pair(false), MEME, Utc::now(), dec("2000"), &bases()).unwrap();
        assert_eq!(row.event, BUY);
        assert_eq!(row.token0_amount, dec("50"));
        assert_eq!(row.token1_amount, dec("1"));
        assert_eq!(row.program, "UniswapV2");

        let DexEvent::SwapV3(mut sell) = buy.clone() else { unreachable!() };
        sell.amount0 = pos(50);
        sell.amount1 = neg(1);
        let row = DexEvent::SwapV3(sell).trade(&pair(false), MEME, Utc::now(), dec("2000"), &bases()).unwrap();
        assert_eq!(row.event, SELL);
        assert_eq!(row.token1_amount, dec("1"));
    }

    #[test]
    fn test_burn_negates_mint() {
        let burn = DexEvent::Burn(BurnEvent { metadata: meta(), sender: Address::ZERO, amount0: e18(3), amount1: e18(1) });
        let update = burn.pool_update(&pair(false)).unwrap();
        assert_eq!((update.amount0, update.amount1), (dec("-3"), dec("-1")));
        assert!(!burn.can_produce_trade());
        assert!(burn.trade(&pair(false), MEME, Utc::now(), Decimal::ONE, &bases()).is_none());
    }

    #[test]
    fn test_capabilities() {
        let buy = DexEvent::Buy(BuyEvent {
            metadata: meta(),
            buyer: MEME,
            native_amount: e18(1),
            token_amount: e18(10),
            native_raised: e18(5),
            tokens_sold: e18(50),
            fee: U256::ZERO,
            migrated: true,
        });
        assert!(buy.can_produce_trade());
        assert!(buy.can_produce_pool_update());
        assert!(!buy.can_produce_pair());
        assert!(buy.is_migration());

        let pc = DexEvent::PairCreated(PairCreatedEvent { metadata: meta(), protocol: ProtocolId::UniswapV2, pair: pair(false), fee: None });
        assert!(pc.is_pair_creation());
        assert!(!pc.can_produce_trade());
        assert!(pc.pool_update(&pair(false)).is_none());
    }

    #[test]
    fn test_buy_uses_buyer_as_maker() {
        let buy = DexEvent::Buy(BuyEvent {
            metadata: meta(),
            buyer: MEME,
            native_amount: e18(1),
            token_amount: e18(10),
            native_raised: e18(5),
            tokens_sold: e18(50),
            fee: U256::ZERO,
            migrated: false,
        });
        let row = buy.trade(&pair(false), WETH, Utc::now(), dec("3000"), &bases()).unwrap();
        assert_eq!(row.maker, fmt_address(&MEME));
        assert_eq!(row.event, BUY);
        assert_eq!(row.program, "XLaunch");
        let update = buy.pool_update(&pair(false)).unwrap();
        assert_eq!((update.amount0, update.amount1), (dec("50"), dec("5")));
    }
}
