//! 配置：链参数、RPC、区块获取、解析与定价
//!
//! Loaded from a JSON file; every section and field has a default, so a
//! config only needs to name what differs.

use std::path::Path;
use std::time::Duration;

use alloy_primitives::{address, Address};
use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::RetryParams;
use crate::core::types::{BaseTokens, ProtocolId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConf {
    pub attempts: u32,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 = no overall deadline
    pub timeout_ms: u64,
}

impl Default for RetryConf {
    fn default() -> Self {
        Self { attempts: 5, delay_ms: 200, max_delay_ms: 2000, timeout_ms: 30_000 }
    }
}

impl RetryConf {
    pub fn params(&self) -> RetryParams {
        RetryParams {
            attempts: self.attempts,
            delay: Duration::from_millis(self.delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

/// Factory addresses per protocol. A protocol with no factory is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deployments {
    pub uniswap_v2: Vec<Address>,
    pub uniswap_v3: Vec<Address>,
    pub xlaunch: Vec<Address>,
}

impl Deployments {
    pub fn factories(&self, protocol: ProtocolId) -> &[Address] {
        match protocol {
            ProtocolId::UniswapV2 => &self.uniswap_v2,
            ProtocolId::UniswapV3 => &self.uniswap_v3,
            ProtocolId::XLaunch => &self.xlaunch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub chain_id: u64,
    pub native_symbol: String,
    pub native_decimals: u8,
    pub wrapped_native: Address,
    pub stablecoins: Vec<Address>,
    pub deployments: Deployments,
}

impl Default for ChainParams {
    // Base mainnet
    fn default() -> Self {
        Self {
            chain_id: 8453,
            native_symbol: "ETH".to_string(),
            native_decimals: 18,
            wrapped_native: address!("4200000000000000000000000000000000000006"),
            stablecoins: vec![address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913")],
            deployments: Deployments {
                uniswap_v2: vec![address!("8909dc15e40173ff4699343b6eb8132c65e18ec6")],
                uniswap_v3: vec![address!("33128a8fc17869897dce68ed026d694621f6fdfd")],
                xlaunch: Vec::new(),
            },
        }
    }
}

impl ChainParams {
    pub fn base_tokens(&self) -> BaseTokens {
        BaseTokens {
            wrapped_native: self.wrapped_native,
            stablecoins: self.stablecoins.clone(),
            native_symbol: self.native_symbol.clone(),
            native_decimals: self.native_decimals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConf {
    pub http_url: String,
    pub ws_url: Option<String>,
    pub pool_size: usize,
    pub request_timeout_ms: u64,
    pub check_interval_secs: u64,
    pub check_timeout_secs: u64,
    pub reconnect_delay_ms: u64,
    /// Retry policy for `eth_call`.
    pub call_retry: RetryConf,
}

impl Default for RpcConf {
    fn default() -> Self {
        Self {
            http_url: "http://127.0.0.1:8545".to_string(),
            ws_url: None,
            pool_size: 4,
            request_timeout_ms: 15_000,
            check_interval_secs: 10,
            check_timeout_secs: 300,
            reconnect_delay_ms: 2000,
            call_retry: RetryConf::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockGetterConf {
    /// 0 = resume from the finished watermark, or start at the chain head.
    pub start_height: u64,
    pub pool_size: usize,
    pub queue_size: usize,
    /// Follow `newHeads` instead of polling `eth_blockNumber`.
    pub subscribe_heads: bool,
    pub poll_interval_ms: u64,
    pub stall_timeout_secs: u64,
    pub ordered: bool,
    pub retry: RetryConf,
}

impl Default for BlockGetterConf {
    fn default() -> Self {
        Self {
            start_height: 0,
            pool_size: 8,
            queue_size: 64,
            subscribe_heads: false,
            poll_interval_ms: 100,
            stall_timeout_secs: 10,
            ordered: true,
            retry: RetryConf { attempts: 10, delay_ms: 500, max_delay_ms: 5000, timeout_ms: 120_000 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockParserConf {
    pub pool_size: usize,
    pub queue_size: usize,
    pub ordered: bool,
    /// Only index AMM pairs whose non-base token came from the launchpad.
    pub launch_tokens_only: bool,
}

impl Default for BlockParserConf {
    fn default() -> Self {
        Self { pool_size: 4, queue_size: 32, ordered: true, launch_tokens_only: false }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConf {
    /// Constant native price; takes precedence over `reserve_pair`.
    pub fixed: Option<Decimal>,
    /// Native/stable V2 pair read with `getReserves` at each height.
    pub reserve_pair: Option<Address>,
    pub native_is_token0: bool,
    pub stable_decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConf {
    /// env_logger filter, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LogConf {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Downstream writes; disable both for dry runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConf {
    pub store: bool,
    pub bus: bool,
}

impl Default for SinkConf {
    fn default() -> Self {
        Self { store: true, bus: true }
    }
}

/// In-process cache bounds and the watermark file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConf {
    /// Pairs, tokens and migration markers expire this long after insertion.
    pub ttl_secs: u64,
    pub max_entries: u64,
    /// Per-height native prices only live until their block commits.
    pub price_ttl_secs: u64,
    pub max_prices: u64,
    /// Keeps the finished-block watermark across restarts. `None` keeps it in
    /// memory only.
    pub watermark_path: Option<String>,
}

impl Default for CacheConf {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 3600,
            max_entries: 2_000_000,
            price_ttl_secs: 600,
            max_prices: 10_000,
            watermark_path: None,
        }
    }
}

impl CacheConf {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chain: ChainParams,
    pub rpc: RpcConf,
    pub block_getter: BlockGetterConf,
    pub block_parser: BlockParserConf,
    pub price: PriceConf,
    pub sinks: SinkConf,
    pub cache: CacheConf,
    pub log: LogConf,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.rpc.http_url.is_empty(), "rpc.http_url is empty");
        anyhow::ensure!(self.block_getter.pool_size > 0, "block_getter.pool_size must be > 0");
        anyhow::ensure!(self.block_parser.pool_size > 0, "block_parser.pool_size must be > 0");
        anyhow::ensure!(self.cache.ttl_secs > 0 && self.cache.price_ttl_secs > 0, "cache ttls must be > 0");
        anyhow::ensure!(
            !self.block_getter.subscribe_heads || self.rpc.ws_url.is_some(),
            "block_getter.subscribe_heads requires rpc.ws_url"
        );
        anyhow::ensure!(
            self.price.fixed.is_some() || self.price.reserve_pair.is_some(),
            "price: either fixed or reserve_pair must be set"
        );
        Ok(())
    }

    /// Follow the head closely: subscription, small pools, fast give-up.
    pub fn realtime() -> Self {
        let mut c = Self::default();
        c.block_getter.subscribe_heads = true;
        c.block_getter.pool_size = 4;
        c.block_getter.queue_size = 16;
        c.block_parser.pool_size = 2;
        c.rpc.call_retry = RetryConf { attempts: 3, delay_ms: 100, max_delay_ms: 500, timeout_ms: 10_000 };
        c
    }

    /// Catch up from `start_height`: polling, wide pools, patient retries.
    pub fn backfill(start_height: u64) -> Self {
        let mut c = Self::default();
        c.block_getter.start_height = start_height;
        c.block_getter.pool_size = 32;
        c.block_getter.queue_size = 256;
        c.block_parser.pool_size = 16;
        c.block_parser.queue_size = 128;
        c.rpc.pool_size = 8;
        c.rpc.call_retry = RetryConf { attempts: 8, delay_ms: 500, max_delay_ms: 5000, timeout_ms: 60_000 };
        c
    }
}
