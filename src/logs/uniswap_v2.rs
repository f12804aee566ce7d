//! Uniswap V2 style factories and pairs.

use super::topic_registry::{event_spec, DecodeInput, EventSpec};
use super::{created_pair, DecodeError};
use crate::core::events::{BurnEvent, DexEvent, MintEvent, PairCreatedEvent, SwapV2Event, SyncEvent};

pub mod signatures {
    pub const PAIR_CREATED: &str = "PairCreated(address,address,address,uint256)";
    pub const SWAP: &str = "Swap(address,uint256,uint256,uint256,uint256,address)";
    pub const MINT: &str = "Mint(address,uint256,uint256)";
    pub const BURN: &str = "Burn(address,uint256,uint256,address)";
    pub const SYNC: &str = "Sync(uint112,uint112)";
}

pub const EVENTS: &[EventSpec] = &[
    // PairCreated(token0 indexed, token1 indexed, pair, allPairsLength)
    event_spec!("PairCreated", signatures::PAIR_CREATED, Factory, 3, [Address, Uint], parse_pair_created),
    // Swap(sender indexed, amount0In, amount1In, amount0Out, amount1Out, to indexed)
    event_spec!("Swap", signatures::SWAP, Pool, 3, [Uint, Uint, Uint, Uint], parse_swap),
    event_spec!("Mint", signatures::MINT, Pool, 2, [Uint, Uint], parse_mint),
    // Burn(sender indexed, amount0, amount1, to indexed)
    event_spec!("Burn", signatures::BURN, Pool, 3, [Uint, Uint], parse_burn),
    event_spec!("Sync", signatures::SYNC, Pool, 1, [Uint, Uint], parse_sync),
];

pub fn parse_pair_created(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    let (metadata, protocol) = input.factory_metadata()?;
    let token0 = input.topic_address(1)?;
    let token1 = input.topic_address(2)?;
    let address = input.address(0)?;
    Ok(DexEvent::PairCreated(PairCreatedEvent {
        pair: created_pair(input, protocol, address, token0, token1),
        metadata,
        protocol,
        fee: None,
    }))
}

pub fn parse_swap(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    let event = SwapV2Event {
        metadata: input.metadata(),
        sender: input.topic_address(1)?,
        to: input.topic_address(2)?,
        amount0_in: input.u256(0)?,
        amount1_in: input.u256(1)?,
        amount0_out: input.u256(2)?,
        amount1_out: input.u256(3)?,
    };
    if event.amount0_in.is_zero() && event.amount1_in.is_zero() {
        return Err(DecodeError::AmountInZero);
    }
    if event.amount0_out.is_zero() && event.amount1_out.is_zero() {
        return Err(DecodeError::AmountOutZero);
    }
    Ok(DexEvent::SwapV2(event))
}

pub fn parse_mint(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    Ok(DexEvent::Mint(MintEvent {
        metadata: input.metadata(),
        sender: input.topic_address(1)?,
        amount0: input.u256(0)?,
        amount1: input.u256(1)?,
    }))
}

pub fn parse_burn(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    Ok(DexEvent::Burn(BurnEvent {
        metadata: input.metadata(),
        sender: input.topic_address(1)?,
        amount0: input.u256(0)?,
        amount1: input.u256(1)?,
    }))
}

pub fn parse_sync(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    Ok(DexEvent::Sync(SyncEvent {
        metadata: input.metadata(),
        reserve0: input.u256(0)?,
        reserve1: input.u256(1)?,
    }))
}
