//! In-process cache and store.
//!
//! Cache entries expire on a TTL and are capped by count (moka), the
//! finished-block watermark optionally survives restarts in a
//! [`WatermarkFile`].

use std::collections::BTreeMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use moka::sync::Cache as TtlCache;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::watermark::WatermarkFile;
use super::{Cache, SinkError, Store};
use crate::config::CacheConf;
use crate::core::rows::{ActionRow, PairRow, TokenRow, TxRow};
use crate::core::types::{Pair, Token};

pub struct MemoryCache {
    pairs: TtlCache<Address, Pair>,
    tokens: TtlCache<Address, Token>,
    prices: TtlCache<u64, Decimal>,
    migrate_tokens: TtlCache<Address, ()>,
    finished_block: AtomicU64,
    watermark: Option<WatermarkFile>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_conf(&CacheConf::default(), None)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the height stored in `watermark`, if any.
    pub fn open(conf: &CacheConf) -> Result<Self, SinkError> {
        let watermark = conf.watermark_path.as_ref().map(WatermarkFile::new);
        let cache = Self::with_conf(conf, watermark);
        if let Some(file) = &cache.watermark {
            let height = file.load()?;
            cache.finished_block.store(height, Ordering::Release);
            log::info!("watermark {}: finished block {height}", file.path().display());
        }
        Ok(cache)
    }

    fn with_conf(conf: &CacheConf, watermark: Option<WatermarkFile>) -> Self {
        Self {
            pairs: bounded(conf.max_entries, conf.ttl()),
            tokens: bounded(conf.max_entries, conf.ttl()),
            migrate_tokens: bounded(conf.max_entries, conf.ttl()),
            prices: bounded(conf.max_prices, conf.price_ttl()),
            finished_block: AtomicU64::new(0),
            watermark,
        }
    }

    /// Approximate; moka counts lazily.
    pub fn pair_count(&self) -> u64 {
        self.pairs.run_pending_tasks();
        self.pairs.entry_count()
    }
}

fn bounded<K, V>(capacity: u64, ttl: Duration) -> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    TtlCache::builder().max_capacity(capacity).time_to_live(ttl).build()
}

impl Cache for MemoryCache {
    fn get_pair(&self, address: &Address) -> Option<Pair> {
        self.pairs.get(address)
    }

    fn set_pair(&self, pair: Pair) {
        self.pairs.insert(pair.address, pair);
    }

    fn pair_exists(&self, address: &Address) -> bool {
        self.pairs.contains_key(address)
    }

    fn del_pair(&self, address: &Address) {
        self.pairs.invalidate(address);
    }

    fn get_token(&self, address: &Address) -> Option<Token> {
        self.tokens.get(address)
    }

    fn set_token(&self, token: Token) {
        self.tokens.insert(token.address, token);
    }

    fn get_price(&self, height: u64) -> Option<Decimal> {
        self.prices.get(&height)
    }

    fn set_price(&self, height: u64, price: Decimal) {
        self.prices.insert(height, price);
    }

    fn get_finished_block(&self) -> u64 {
        self.finished_block.load(Ordering::Acquire)
    }

    fn set_finished_block(&self, height: u64) {
        self.finished_block.store(height, Ordering::Release);
        self.prices.invalidate(&height);
        if let Some(file) = &self.watermark {
            if let Err(e) = file.save(height) {
                log::warn!("persist finished block {height}: {e}");
            }
        }
    }

    fn migrate_token_exists(&self, token: &Address) -> bool {
        self.migrate_tokens.contains_key(token)
    }

    fn set_migrate_token(&self, token: &Address) {
        self.migrate_tokens.insert(*token, ());
    }

    fn del_migrate_token(&self, token: &Address) {
        self.migrate_tokens.invalidate(token);
    }
}

/// Natural-key upserts so a replayed block writes nothing new.
#[derive(Default)]
struct Tables {
    tokens: BTreeMap<String, TokenRow>,
    pairs: BTreeMap<String, PairRow>,
    /// (tx hash, log index)
    txs: BTreeMap<(String, u64), TxRow>,
    /// (tx hash, pair, action)
    actions: BTreeMap<(String, String, String), ActionRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> Vec<TokenRow> {
        self.tables.lock().tokens.values().cloned().collect()
    }

    pub fn pairs(&self) -> Vec<PairRow> {
        self.tables.lock().pairs.values().cloned().collect()
    }

    pub fn txs(&self) -> Vec<TxRow> {
        self.tables.lock().txs.values().cloned().collect()
    }

    pub fn actions(&self) -> Vec<ActionRow> {
        self.tables.lock().actions.values().cloned().collect()
    }

    pub fn token(&self, address: &str) -> Option<TokenRow> {
        self.tables.lock().tokens.get(address).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add_tokens(&self, rows: &[TokenRow]) -> Result<(), SinkError> {
        let mut t = self.tables.lock();
        for row in rows {
            t.tokens.entry(row.address.clone()).or_insert_with(|| row.clone());
        }
        Ok(())
    }

    async fn add_pairs(&self, rows: &[PairRow]) -> Result<(), SinkError> {
        let mut t = self.tables.lock();
        for row in rows {
            t.pairs.insert(row.address.clone(), row.clone());
        }
        Ok(())
    }

    async fn add_txs(&self, rows: &[TxRow]) -> Result<(), SinkError> {
        let mut t = self.tables.lock();
        for row in rows {
            t.txs.insert((row.tx_hash.clone(), row.block_index), row.clone());
        }
        Ok(())
    }

    async fn add_actions(&self, rows: &[ActionRow]) -> Result<(), SinkError> {
        let mut t = self.tables.lock();
        for row in rows {
            t.actions.insert((row.tx_hash.clone(), row.pair.clone(), row.action.clone()), row.clone());
        }
        Ok(())
    }

    async fn update_token_main_pair(&self, token: &str, pair: &str) -> Result<(), SinkError> {
        match self.tables.lock().tokens.get_mut(token) {
            Some(row) => row.main_pair = pair.to_string(),
            // 起始高度之前创建的代币
            None => log::debug!("main pair {pair}: token {token} has no row"),
        }
        Ok(())
    }
}
