//! Test fixtures: well-known addresses, log builders and a scripted chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{address, Address, Bytes, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Deployments;
use crate::core::types::BaseTokens;
use crate::logs::utils::{encode_address, encode_u256, event_topic, selector, WORD};
use crate::logs::xlaunch;
use crate::rpc::{Block, ChainClient, HeadStream, Log, Receipt, RpcError, Transaction};
use crate::service::contract_caller::methods;

pub const WETH: Address = address!("4200000000000000000000000000000000000006");
pub const USDC: Address = address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913");
pub const MEME: Address = address!("00000000000000000000000000000000000000a1");
pub const OTHER: Address = address!("00000000000000000000000000000000000000b2");
pub const POOL: Address = address!("00000000000000000000000000000000000000c3");
pub const V2_FACTORY: Address = address!("0000000000000000000000000000000000000f02");
pub const V3_FACTORY: Address = address!("0000000000000000000000000000000000000f03");
pub const LAUNCH_FACTORY: Address = address!("0000000000000000000000000000000000000f04");

pub fn test_bases() -> BaseTokens {
    BaseTokens { wrapped_native: WETH, stablecoins: vec![USDC], native_symbol: "ETH".into(), native_decimals: 18 }
}

pub fn test_deployments() -> Deployments {
    Deployments { uniswap_v2: vec![V2_FACTORY], uniswap_v3: vec![V3_FACTORY], xlaunch: vec![LAUNCH_FACTORY] }
}

/// 1e9 whole tokens at 18 decimals.
pub fn billion_supply() -> U256 {
    U256::from(1_000_000_000u64) * U256::from(10u64).pow(U256::from(18u8))
}

pub fn addr_topic(a: Address) -> B256 {
    B256::from(encode_address(&a))
}

pub fn data_words(words: &[U256]) -> Bytes {
    let mut out = Vec::with_capacity(words.len() * WORD);
    for w in words {
        out.extend_from_slice(&encode_u256(*w));
    }
    Bytes::from(out)
}

pub fn test_log(address: Address, topics: Vec<B256>, data: Bytes) -> Log {
    Log { address, topics, data, ..Log::default() }
}

/// ABI tail for one dynamic string: length word plus right-padded bytes.
fn string_tail(s: &str) -> Vec<u8> {
    let mut out = encode_u256(U256::from(s.len())).to_vec();
    out.extend_from_slice(s.as_bytes());
    out.resize(WORD + s.len().div_ceil(WORD) * WORD, 0);
    out
}

/// Static words followed by dynamic strings, standard head/tail layout.
pub fn encode_with_strings(words: &[U256], strings: &[&str]) -> Vec<u8> {
    let head_len = (words.len() + strings.len()) * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for w in words {
        head.extend_from_slice(&encode_u256(*w));
    }
    for s in strings {
        head.extend_from_slice(&encode_u256(U256::from(head_len + tail.len())));
        tail.extend_from_slice(&string_tail(s));
    }
    head.extend_from_slice(&tail);
    head
}

/// `eth_call` output of a function returning `string`.
pub fn string_output(s: &str) -> Vec<u8> {
    encode_with_strings(&[], &[s])
}

pub fn created_log(factory: Address, pool: Address, creator: Address, token: Address, name: &str, symbol: &str) -> Log {
    let base_init = U256::from(1_000_000_000_000_000_000u64);
    let token_init = U256::from(800_000_000u64) * U256::from(1_000_000_000_000_000_000u64);
    let data = encode_with_strings(&[base_init, token_init], &[name, symbol, "https://x.test", "launch"]);
    test_log(
        factory,
        vec![event_topic(xlaunch::signatures::CREATED), addr_topic(pool), addr_topic(creator), addr_topic(token)],
        Bytes::from(data),
    )
}

/// Selector plus pre-encoded argument words.
pub fn calldata(method: &str, args: &[[u8; WORD]]) -> Bytes {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(method));
    for a in args {
        data.extend_from_slice(a);
    }
    Bytes::from(data)
}

/// Deterministic tx hash for (height, index).
pub fn tx_hash(height: u64, index: u64) -> B256 {
    let mut h = [0u8; 32];
    h[..8].copy_from_slice(&height.to_be_bytes());
    h[24..].copy_from_slice(&index.to_be_bytes());
    B256::from(h)
}

/// Block `height` with one tx per receipt. Logs get block-wide log indexes in
/// order and their tx coordinates filled in.
pub fn block_fixture(height: u64, timestamp: u64, txs: Vec<(Address, Vec<Log>)>) -> (Block, Vec<Receipt>) {
    let mut transactions = Vec::new();
    let mut receipts = Vec::new();
    let mut log_index = 0;
    for (i, (from, logs)) in txs.into_iter().enumerate() {
        let index = i as u64;
        let hash = tx_hash(height, index);
        transactions.push(Transaction { hash, from, to: None, transaction_index: Some(index) });
        let logs = logs
            .into_iter()
            .map(|mut l| {
                l.block_number = height;
                l.transaction_hash = hash;
                l.transaction_index = index;
                l.log_index = log_index;
                log_index += 1;
                l
            })
            .collect();
        receipts.push(Receipt { transaction_hash: hash, transaction_index: index, status: Some(1), logs });
    }
    let block = Block { number: height, hash: tx_hash(height, u64::MAX), timestamp, transactions };
    (block, receipts)
}

type CallKey = (Address, Bytes);

/// Scripted chain. Calls are answered by exact calldata first, then by
/// selector; anything unscripted returns empty output like an EOA would.
pub struct MockChain {
    healthy: AtomicBool,
    head: AtomicU64,
    blocks: Mutex<HashMap<u64, (Block, Vec<Receipt>)>>,
    block_failures: Mutex<HashMap<u64, u32>>,
    block_fetches: Mutex<HashMap<u64, u32>>,
    calls: Mutex<HashMap<CallKey, Result<Bytes, RpcError>>>,
    call_counts: Mutex<HashMap<(Address, [u8; 4]), usize>>,
    call_delay: Mutex<Duration>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            head: AtomicU64::new(0),
            blocks: Mutex::new(HashMap::new()),
            block_failures: Mutex::new(HashMap::new()),
            block_fetches: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            call_counts: Mutex::new(HashMap::new()),
            call_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_head(&self, height: u64) {
        self.head.store(height, Ordering::SeqCst);
    }

    pub fn add_block(&self, block: Block, receipts: Vec<Receipt>) {
        self.blocks.lock().insert(block.number, (block, receipts));
    }

    /// The next `times` fetches of `height` fail with a transport error.
    pub fn fail_block(&self, height: u64, times: u32) {
        self.block_failures.lock().insert(height, times);
    }

    pub fn block_fetches(&self, height: u64) -> u32 {
        self.block_fetches.lock().get(&height).copied().unwrap_or(0)
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock() = delay;
    }

    pub fn set_call(&self, to: Address, method: &str, args: &[[u8; WORD]], output: Vec<u8>) {
        self.calls.lock().insert((to, calldata(method, args)), Ok(Bytes::from(output)));
    }

    pub fn revert_call(&self, to: Address, method: &str) {
        let err = RpcError::Rpc { code: 3, message: "execution reverted".into() };
        self.calls.lock().insert((to, Bytes::copy_from_slice(&selector(method))), Err(err));
    }

    pub fn fail_call(&self, to: Address, method: &str, err: RpcError) {
        self.calls.lock().insert((to, Bytes::copy_from_slice(&selector(method))), Err(err));
    }

    pub fn call_count(&self, to: Address, method: &str) -> usize {
        self.call_counts.lock().get(&(to, selector(method))).copied().unwrap_or(0)
    }

    pub fn set_erc20(&self, token: Address, name: &str, symbol: &str, decimals: u8, supply: U256) {
        self.set_call(token, methods::NAME, &[], string_output(name));
        self.set_call(token, methods::SYMBOL, &[], string_output(symbol));
        self.set_call(token, methods::DECIMALS, &[], encode_u256(U256::from(decimals)).to_vec());
        self.set_call(token, methods::TOTAL_SUPPLY, &[], encode_u256(supply).to_vec());
    }

    pub fn set_pair_tokens(&self, pair: Address, token0: Address, token1: Address) {
        self.set_call(pair, methods::TOKEN0, &[], encode_address(&token0).to_vec());
        self.set_call(pair, methods::TOKEN1, &[], encode_address(&token1).to_vec());
    }

    pub fn set_get_pair(&self, factory: Address, token0: Address, token1: Address, pair: Address) {
        self.set_call(factory, methods::GET_PAIR, &[encode_address(&token0), encode_address(&token1)], encode_address(&pair).to_vec());
    }

    pub fn set_get_pool(&self, factory: Address, token0: Address, token1: Address, fee: u32, pool: Address) {
        let args = [encode_address(&token0), encode_address(&token1), encode_u256(U256::from(fee))];
        self.set_call(factory, methods::GET_POOL, &args, encode_address(&pool).to_vec());
        self.set_call(pool, methods::FEE, &[], encode_u256(U256::from(fee)).to_vec());
    }

    pub fn set_launch(&self, factory: Address, pool: Address, known: bool) {
        let word = if known { encode_address(&pool) } else { [0u8; WORD] };
        let mut out = word.to_vec();
        out.extend_from_slice(&[0u8; WORD]);
        self.set_call(factory, methods::GET_LAUNCH_BY_ADDRESS, &[encode_address(&pool)], out);
    }

    pub fn set_reserves(&self, pair: Address, reserve0: U256, reserve1: U256) {
        let mut out = encode_u256(reserve0).to_vec();
        out.extend_from_slice(&encode_u256(reserve1));
        out.extend_from_slice(&[0u8; WORD]);
        self.set_call(pair, methods::GET_RESERVES, &[], out);
    }

    fn check_health(&self) -> Result<(), RpcError> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(RpcError::Transport("connection refused".into()))
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.check_health()?;
        Ok(56)
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.check_health()?;
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn block_by_number(&self, height: u64) -> Result<Block, RpcError> {
        self.check_health()?;
        *self.block_fetches.lock().entry(height).or_insert(0) += 1;
        {
            let mut failures = self.block_failures.lock();
            if let Some(n) = failures.get_mut(&height) {
                if *n > 0 {
                    *n -= 1;
                    return Err(RpcError::Transport("stream reset".into()));
                }
            }
        }
        self.blocks.lock().get(&height).map(|(b, _)| b.clone()).ok_or(RpcError::BlockNotFound(height))
    }

    async fn block_receipts(&self, height: u64) -> Result<Vec<Receipt>, RpcError> {
        self.check_health()?;
        self.blocks.lock().get(&height).map(|(_, r)| r.clone()).ok_or(RpcError::BlockNotFound(height))
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, RpcError> {
        Err(RpcError::Subscription("mock chain has no websocket".into()))
    }

    async fn call_contract(&self, to: Address, data: Bytes, _at: Option<u64>) -> Result<Bytes, RpcError> {
        self.check_health()?;
        let mut sel = [0u8; 4];
        if data.len() >= 4 {
            sel.copy_from_slice(&data[..4]);
        }
        *self.call_counts.lock().entry((to, sel)).or_insert(0) += 1;

        let delay = *self.call_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let calls = self.calls.lock();
        if let Some(r) = calls.get(&(to, data.clone())) {
            return r.clone();
        }
        if let Some(r) = calls.get(&(to, Bytes::copy_from_slice(&sel))) {
            return r.clone();
        }
        Ok(Bytes::new())
    }
}
