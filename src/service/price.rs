//! Native coin USD price per block.

use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;

use super::contract_caller::ContractCaller;
use super::ServiceError;
use crate::core::amounts::wei_to_decimal;
use crate::sinks::Cache;

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_price(&self, height: u64) -> Result<Decimal, ServiceError>;
}

/// Constant price, for replays and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedPriceSource(pub Decimal);

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn get_price(&self, _height: u64) -> Result<Decimal, ServiceError> {
        Ok(self.0)
    }
}

/// Reads a native/stable V2 pair's reserves at each height, cached per height.
pub struct ReservePriceSource {
    caller: ContractCaller,
    cache: Arc<dyn Cache>,
    pair: Address,
    native_is_token0: bool,
    native_decimals: u8,
    stable_decimals: u8,
}

impl ReservePriceSource {
    pub fn new(
        caller: ContractCaller,
        cache: Arc<dyn Cache>,
        pair: Address,
        native_is_token0: bool,
        native_decimals: u8,
        stable_decimals: u8,
    ) -> Self {
        Self { caller, cache, pair, native_is_token0, native_decimals, stable_decimals }
    }
}

#[async_trait]
impl PriceSource for ReservePriceSource {
    async fn get_price(&self, height: u64) -> Result<Decimal, ServiceError> {
        if let Some(price) = self.cache.get_price(height) {
            return Ok(price);
        }
        let (r0, r1) = self.caller.call_get_reserves(self.pair, height).await?;
        let (native, stable) = if self.native_is_token0 { (r0, r1) } else { (r1, r0) };
        let native = wei_to_decimal(native, self.native_decimals);
        let stable = wei_to_decimal(stable, self.stable_decimals);
        let price = stable.checked_div(native).ok_or(ServiceError::ZeroReserves(self.pair))?;
        self.cache.set_price(height, price);
        Ok(price)
    }
}
