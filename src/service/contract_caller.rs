//! Typed `eth_call` wrappers for the ERC-20, pair, pool and factory methods
//! resolution needs.

use std::sync::Arc;

use alloy_primitives::aliases::U24;
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};

use super::ServiceError;
use crate::common::{clean_string, retry_async, RetryError, RetryParams};
use crate::logs::utils::WORD;
use crate::rpc::{ChainClient, RpcError};

sol! {
    /// `name`/`symbol` come back as raw bytes so both `string` and legacy
    /// `bytes32` tokens decode; the selector is the same either way.
    interface IErc20 {
        function name() external view returns (bytes memory);
        function symbol() external view returns (bytes memory);
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
    }

    interface IPair {
        function token0() external view returns (address);
        function token1() external view returns (address);
        function fee() external view returns (uint24);
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }

    interface ILaunchPool {
        function token() external view returns (address);
    }

    interface IFactory {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
        /// Only the leading word of the launch record is read.
        function getLaunchByAddress(address pool) external view returns (uint256 id);
    }
}

/// Method signatures, one per binding above.
pub mod methods {
    pub const NAME: &str = "name()";
    pub const SYMBOL: &str = "symbol()";
    pub const DECIMALS: &str = "decimals()";
    pub const TOTAL_SUPPLY: &str = "totalSupply()";
    pub const TOKEN0: &str = "token0()";
    pub const TOKEN1: &str = "token1()";
    pub const TOKEN: &str = "token()";
    pub const FEE: &str = "fee()";
    pub const GET_RESERVES: &str = "getReserves()";
    pub const GET_PAIR: &str = "getPair(address,address)";
    pub const GET_POOL: &str = "getPool(address,address,uint24)";
    pub const GET_LAUNCH_BY_ADDRESS: &str = "getLaunchByAddress(address)";
}

/// Either an ABI `string` or a legacy right-padded `bytes32`.
fn decode_string(output: &[u8]) -> Option<String> {
    if output.len() == WORD {
        return Some(clean_string(output));
    }
    IErc20::nameCall::abi_decode_returns(output, false).ok().map(|r| clean_string(&r._0))
}

#[derive(Clone)]
pub struct ContractCaller {
    client: Arc<dyn ChainClient>,
    retry: RetryParams,
}

impl ContractCaller {
    pub fn new(client: Arc<dyn ChainClient>, retry: RetryParams) -> Self {
        Self { client, retry }
    }

    /// Raw call with retry. A non-retryable failure (revert, out of gas)
    /// yields empty output rather than an error.
    pub async fn call_contract(&self, to: Address, data: Bytes, at: Option<u64>) -> Result<Bytes, ServiceError> {
        let result = retry_async(&self.retry, RpcError::is_retryable, || {
            self.client.call_contract(to, data.clone(), at)
        })
        .await;
        match result {
            Ok(out) => Ok(out),
            Err(RetryError::Unrecoverable(e)) => {
                log::debug!("call to {to} not retryable: {e}");
                Ok(Bytes::new())
            }
            Err(RetryError::Exhausted { last, .. }) => Err(ServiceError::Rpc(last)),
            Err(RetryError::Timeout(_)) => Err(ServiceError::Timeout),
        }
    }

    /// Encodes `call`, runs it and decodes the returns. Empty output is
    /// `OutputEmpty`, undecodable output `WrongOutput`.
    async fn query<C: SolCall>(&self, to: Address, call: C, at: Option<u64>, strict: bool) -> Result<C::Return, ServiceError> {
        let out = self.call_contract(to, Bytes::from(call.abi_encode()), at).await?;
        if out.is_empty() {
            return Err(ServiceError::OutputEmpty(to));
        }
        C::abi_decode_returns(&out, strict).map_err(|e| {
            log::debug!("{} from {to}: {e}", C::SIGNATURE);
            ServiceError::WrongOutput(to)
        })
    }

    pub async fn call_name(&self, token: Address) -> Result<String, ServiceError> {
        let out = self.call_contract(token, Bytes::from(IErc20::nameCall {}.abi_encode()), None).await?;
        if out.is_empty() {
            return Err(ServiceError::OutputEmpty(token));
        }
        decode_string(&out).ok_or(ServiceError::WrongOutput(token))
    }

    pub async fn call_symbol(&self, token: Address) -> Result<String, ServiceError> {
        let out = self.call_contract(token, Bytes::from(IErc20::symbolCall {}.abi_encode()), None).await?;
        if out.is_empty() {
            return Err(ServiceError::OutputEmpty(token));
        }
        decode_string(&out).ok_or(ServiceError::WrongOutput(token))
    }

    pub async fn call_decimals(&self, token: Address) -> Result<u8, ServiceError> {
        Ok(self.query(token, IErc20::decimalsCall {}, None, true).await?._0)
    }

    pub async fn call_total_supply(&self, token: Address) -> Result<U256, ServiceError> {
        Ok(self.query(token, IErc20::totalSupplyCall {}, None, true).await?._0)
    }

    pub async fn call_token0(&self, pair: Address) -> Result<Address, ServiceError> {
        Ok(self.query(pair, IPair::token0Call {}, None, true).await?._0)
    }

    pub async fn call_token1(&self, pair: Address) -> Result<Address, ServiceError> {
        Ok(self.query(pair, IPair::token1Call {}, None, true).await?._0)
    }

    /// Launch pools expose a single `token()`.
    pub async fn call_token(&self, pool: Address) -> Result<Address, ServiceError> {
        Ok(self.query(pool, ILaunchPool::tokenCall {}, None, true).await?._0)
    }

    pub async fn call_fee(&self, pool: Address) -> Result<u32, ServiceError> {
        Ok(self.query(pool, IPair::feeCall {}, None, true).await?._0.to::<u32>())
    }

    pub async fn call_get_pair(&self, factory: Address, token0: Address, token1: Address) -> Result<Address, ServiceError> {
        let call = IFactory::getPairCall { tokenA: token0, tokenB: token1 };
        Ok(self.query(factory, call, None, true).await?.pair)
    }

    pub async fn call_get_pool(&self, factory: Address, token0: Address, token1: Address, fee: u32) -> Result<Address, ServiceError> {
        if fee > 0x00ff_ffff {
            return Err(ServiceError::WrongOutput(factory));
        }
        let call = IFactory::getPoolCall { tokenA: token0, tokenB: token1, fee: U24::from(fee) };
        Ok(self.query(factory, call, None, true).await?.pool)
    }

    /// True when the launch factory knows `pool`; the first output word is
    /// non-zero for registered launches.
    pub async fn call_get_launch_by_address(&self, factory: Address, pool: Address) -> Result<bool, ServiceError> {
        let ret = self.query(factory, IFactory::getLaunchByAddressCall { pool }, None, false).await?;
        Ok(!ret.id.is_zero())
    }

    /// `(reserve0, reserve1)` at `height`.
    pub async fn call_get_reserves(&self, pair: Address, height: u64) -> Result<(U256, U256), ServiceError> {
        let ret = self.query(pair, IPair::getReservesCall {}, Some(height), true).await?;
        Ok((U256::from(ret.reserve0), U256::from(ret.reserve1)))
    }
}
