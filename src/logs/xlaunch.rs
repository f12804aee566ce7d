//! XLaunch bonding-curve launchpad. Every pool pairs a fresh 18-decimal token
//! with the native coin; a buy that fills the curve migrates liquidity to an AMM.

use alloy_primitives::Address;

use super::topic_registry::{event_spec, DecodeInput, EventSpec};
use super::{created_pair, DecodeError};
use crate::common::truncate_chars;
use crate::core::events::{BuyEvent, CreatedEvent, DexEvent, SellEvent};

pub const TOKEN_DECIMALS: u8 = 18;
const MAX_TEXT: usize = 256;
const MAX_DESCRIPTION: usize = 512;

pub mod signatures {
    pub const CREATED: &str = "Created(address,address,address,uint256,uint256,string,string,string,string)";
    pub const BUY: &str = "Buy(address,uint256,uint256,uint256,uint256,uint256,bool)";
    pub const SELL: &str = "Sell(address,uint256,uint256,uint256,uint256,uint256)";
}

pub const EVENTS: &[EventSpec] = &[
    // Created(pool indexed, creator indexed, token indexed, baseInit, tokenInit, name, symbol, url, description)
    event_spec!("Created", signatures::CREATED, Factory, 4, [Uint, Uint, String, String, String, String], parse_created),
    // Buy(buyer indexed, nativeAmount, tokenAmount, nativeRaised, tokensSold, fee, migrated)
    event_spec!("Buy", signatures::BUY, Pool, 2, [Uint, Uint, Uint, Uint, Uint, Bool], parse_buy),
    // Sell(seller indexed, nativeAmount, tokenAmount, nativeRaised, tokensSold, fee)
    event_spec!("Sell", signatures::SELL, Pool, 2, [Uint, Uint, Uint, Uint, Uint], parse_sell),
];

pub fn parse_created(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    let (metadata, protocol) = input.factory_metadata()?;
    let pool = input.topic_address(1)?;
    let creator = input.topic_address(2)?;
    let token = input.topic_address(3)?;
    let base_init = input.u256(0)?;
    let token_init = input.u256(1)?;
    let symbol = truncate_chars(&input.string(3)?, MAX_TEXT);

    let mut pair = created_pair(input, protocol, pool, token, Address::ZERO);
    pair.token0.symbol = symbol.clone();
    pair.token0.decimals = TOKEN_DECIMALS;
    pair.token1 = input.bases.native_core();
    pair.set_init_reserves_wire(token_init, base_init);

    Ok(DexEvent::Created(CreatedEvent {
        metadata,
        pool,
        creator,
        token,
        base_init,
        token_init,
        name: truncate_chars(&input.string(2)?, MAX_TEXT),
        symbol,
        url: truncate_chars(&input.string(4)?, MAX_TEXT),
        description: truncate_chars(&input.string(5)?, MAX_DESCRIPTION),
        pair,
    }))
}

pub fn parse_buy(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    Ok(DexEvent::Buy(BuyEvent {
        metadata: input.metadata(),
        buyer: input.topic_address(1)?,
        native_amount: input.u256(0)?,
        token_amount: input.u256(1)?,
        native_raised: input.u256(2)?,
        tokens_sold: input.u256(3)?,
        fee: input.u256(4)?,
        migrated: input.boolean(5)?,
    }))
}

pub fn parse_sell(input: &DecodeInput<'_>) -> Result<DexEvent, DecodeError> {
    Ok(DexEvent::Sell(SellEvent {
        metadata: input.metadata(),
        seller: input.topic_address(1)?,
        native_amount: input.u256(0)?,
        token_amount: input.u256(1)?,
        native_raised: input.u256(2)?,
        tokens_sold: input.u256(3)?,
    }))
}
