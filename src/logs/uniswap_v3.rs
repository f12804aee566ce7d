//! Uniswap V3 style factories and pools.

use super::topic_registry::{event_spec, DecodeInput, EventSpec};
use super::{created_pair, DecodeError};
use crate::core::events::{BurnEvent, DexEvent, MintEvent, PairCreatedEvent, SwapV3Event};

pub mod signatures {
    pub const POOL_CREATED: &str = "PoolCreated(address,address,uint24,int24,address)";
    pub const SWAP: &str = "Swap(address,address,int256,int256,uint160,uint128,int24)";
    pub const MINT: &str = "Mint(address,address,int24,int24,uint128,uint256,uint256)";
    pub const BURN: &str = "Burn(address,int24,int24,uint128,uint256,uint256)";
}

pub const EVENTS: &[EventSpec] = &[
    // PoolCreated(token0 indexed, token1 indexed, fee indexed, tickSpacing, pool)
    event_spec!("PoolCreated", signatures::POOL_CREATED, Factory, 4, [Int, Address], parse_pool_created),
    // Swap(sender indexed, recipient indexed, amount0, amount1, sqrtPriceX96, liquidity, tick)
    event_spec!("Swap", signatures::SWAP, Pool, 3, [Int, Int, Uint, Uint, Int], parse_swap),
    // Mint(sender, owner indexed, tickLower indexed, tickUpper indexed, amount, amount0, amount1)
    event_spec!("Mint", signatures::MINT, Pool, 4, [Address, Uint, Uint, Uint], parse_mint),
    // Burn(owner indexed, tickLower indexed, tickUpper indexed, amount, amount0, amount1)
    event_spec!("Burn", signatures::BURN, Pool, 4, [Uint, Uint, Uint], parse_burn),
];

pub fn parse_pool_created(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    let (metadata, protocol) = input.factory_metadata()?;
    let token0 = input.topic_address(1)?;
    let token1 = input.topic_address(2)?;
    let fee = input.topic_u256(3)?.saturating_to::<u32>();
    let address = input.address(1)?;
    Ok(DexEvent::PairCreated(PairCreatedEvent {
        pair: created_pair(input, protocol, address, token0, token1),
        metadata,
        protocol,
        fee: Some(fee),
    }))
}

pub fn parse_swap(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    let event = SwapV3Event {
        metadata: input.metadata(),
        sender: input.topic_address(1)?,
        recipient: input.topic_address(2)?,
        amount0: input.i256(0)?,
        amount1: input.i256(1)?,
        sqrt_price_x96: input.u256(2)?,
        liquidity: input.u256(3)?,
        tick: input.i256(4)?,
    };
    if event.amount0.is_zero() {
        return Err(DecodeError::Amount0Zero);
    }
    if event.amount1.is_zero() {
        return Err(DecodeError::Amount1Zero);
    }
    Ok(DexEvent::SwapV3(event))
}

pub fn parse_mint(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    Ok(DexEvent::Mint(MintEvent {
        metadata: input.metadata(),
        sender: input.address(0)?,
        amount0: input.u256(2)?,
        amount1: input.u256(3)?,
    }))
}

pub fn parse_burn(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    Ok(DexEvent::Burn(BurnEvent {
        metadata: input.metadata(),
        sender: input.topic_address(1)?,
        amount0: input.u256(1)?,
        amount1: input.u256(2)?,
    }))
}
