//! Block parsing and the ordered commit stage.
//!
//! Workers turn fetched blocks into [`BlockResult`]s: every successful tx's
//! logs go through the topic registry, pairs are resolved through the pair
//! service, and trades, pool updates and migration bookkeeping accumulate per
//! tx. Results pass a second ordering gate into a single commit task that
//! writes tokens, pairs, trades and actions, publishes the block message, and
//! only then advances the finished-block watermark.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::{BlockContext, PipelineError, PipelineStats, StatsSnapshot};
use crate::common::{fatal, retry_async, RetryError, RetryParams};
use crate::config::BlockParserConf;
use crate::core::events::{DexEvent, EventMetadata};
use crate::core::results::{migration_action, BlockMessage, BlockResult, MintRecord, PairCreation, TxResult};
use crate::core::rows::{fmt_address, MigratedPool};
use crate::core::types::{BaseTokens, FilterCode, Pair, PoolFamily, ProtocolId};
use crate::logs::TopicRegistry;
use crate::sequencer::{ChannelCommitter, Sequencer};
use crate::service::{PairService, PairWrap, PriceSource};
use crate::sinks::{Cache, MessageBus, SinkError, Store};

const PRICE_RETRY: Duration = Duration::from_secs(1);
const MAIN_PAIR_RETRY: RetryParams = RetryParams {
    attempts: 20,
    delay: Duration::from_millis(100),
    max_delay: Duration::from_secs(2),
    timeout: Duration::ZERO,
};

/// Collaborators of the parser. `store` and `bus` are optional so replays
/// can run without side effects.
#[derive(Clone)]
pub struct ParserDeps {
    pub registry: Arc<TopicRegistry>,
    pub pairs: Arc<PairService>,
    pub cache: Arc<dyn Cache>,
    pub store: Option<Arc<dyn Store>>,
    pub bus: Option<Arc<dyn MessageBus>>,
    pub price: Arc<dyn PriceSource>,
    pub chain_id: u64,
}

struct Inner {
    deps: ParserDeps,
    conf: BlockParserConf,
    gate: Sequencer,
    stats: PipelineStats,
}

pub struct BlockParser {
    inner: Arc<Inner>,
    input: Mutex<Option<mpsc::Sender<BlockContext>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl BlockParser {
    pub fn new(deps: ParserDeps, conf: BlockParserConf) -> Self {
        let gate = Sequencer::new(conf.ordered);
        Self {
            inner: Arc::new(Inner { deps, conf, gate, stats: PipelineStats::default() }),
            input: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawns the parse workers and the commit task; `first` is the first
    /// height that will be submitted.
    pub fn start(&self, first: u64) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted);
        }
        self.inner.gate.init(first)?;

        let queue_size = self.inner.conf.queue_size.max(1);
        let (input_tx, input_rx) = mpsc::channel::<BlockContext>(queue_size);
        let input_rx = Arc::new(AsyncMutex::new(input_rx));
        let (commit_tx, mut commit_rx) = mpsc::channel::<BlockResult>(queue_size);

        let mut tasks = Vec::with_capacity(self.inner.conf.pool_size + 1);
        for _ in 0..self.inner.conf.pool_size {
            let inner = Arc::clone(&self.inner);
            let input = Arc::clone(&input_rx);
            let committer = ChannelCommitter::new(commit_tx.clone());
            tasks.push(tokio::spawn(async move {
                loop {
                    let next = input.lock().await.recv().await;
                    let Some(ctx) = next else { break };
                    let result = inner.parse_block(&ctx).await;
                    if let Err(e) = inner.gate.commit_with_sequence(result, &committer).await {
                        fatal("block parser gate", &e);
                    }
                }
            }));
        }
        drop(commit_tx);

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            while let Some(block) = commit_rx.recv().await {
                inner.commit_block(&block).await;
            }
        }));

        *self.tasks.lock() = tasks;
        *self.input.lock() = Some(input_tx);
        log::info!("block parser started at {first}: {} workers", self.inner.conf.pool_size);
        Ok(())
    }

    /// Queues a block for parsing; waits while the queue is full.
    pub async fn parse_block_async(&self, ctx: BlockContext) -> Result<(), PipelineError> {
        let input = self.input.lock().clone().ok_or(PipelineError::Stopped)?;
        input.send(ctx).await.map_err(|_| PipelineError::Stopped)
    }

    /// Parses one block in place, without committing it.
    pub async fn parse_block(&self, ctx: &BlockContext) -> BlockResult {
        self.inner.parse_block(ctx).await
    }

    /// Closes the input. Queued blocks are still parsed and committed.
    pub fn stop(&self) {
        if self.input.lock().take().is_some() {
            log::info!("block parser stopping");
        }
    }

    /// Waits for workers and the commit task to drain.
    pub async fn wait(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("block parser task failed: {e}");
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl Inner {
    fn bases(&self) -> &BaseTokens {
        self.deps.registry.bases()
    }

    async fn wait_price(&self, height: u64) -> Decimal {
        loop {
            match self.deps.price.get_price(height).await {
                Ok(price) => return price,
                Err(e) => {
                    log::warn!("native price at {height}: {e}, retrying");
                    tokio::time::sleep(PRICE_RETRY).await;
                }
            }
        }
    }

    async fn parse_block(&self, ctx: &BlockContext) -> BlockResult {
        let started = Instant::now();
        let height = ctx.height();
        let price = self.wait_price(height).await;
        let mut result = BlockResult::new(height, ctx.timestamp(), ctx.block_time(), price);

        for receipt in &ctx.receipts {
            if !receipt.succeeded() || receipt.logs.is_empty() {
                continue;
            }
            let sender = match ctx.sender(receipt.transaction_index) {
                Ok(sender) => sender,
                Err(e) => fatal(&format!("block {height}"), &e),
            };
            let mut tx = TxResult::new(sender);
            for log in &receipt.logs {
                if log.removed {
                    continue;
                }
                match self.deps.registry.parse(log) {
                    Ok(event) => self.apply_event(ctx, &mut tx, &event, price).await,
                    Err(e) if e.is_unknown_topic() => {}
                    Err(e) => log::debug!("block {height} log {}: {e}", log.log_index),
                }
            }
            for pair in tx.link_pair_creations() {
                self.deps.pairs.set_pair(pair);
            }
            if !tx.is_empty() {
                result.add_tx_result(tx);
            }
        }

        log::debug!("block {height} parsed in {:?}", started.elapsed());
        result
    }

    async fn apply_event(&self, ctx: &BlockContext, tx: &mut TxResult, event: &DexEvent, price: Decimal) {
        match event {
            DexEvent::Created(e) => {
                let block_time = ctx.block_time();
                let mut pair = e.pair.clone();
                pair.block_time = Some(block_time);
                let token = e.new_token(block_time);
                self.deps.pairs.set_pair(pair.clone());
                self.deps.cache.set_token(token.clone());
                tx.add_token(token);
                tx.add_pair(pair.clone());
                self.record_creation(ctx, tx, &pair, ProtocolId::XLaunch, &e.metadata);
                if let Some(update) = event.pool_update(&pair) {
                    tx.add_pool_update(update);
                }
            }
            DexEvent::PairCreated(e) => {
                let mut pair = e.pair.clone();
                if !pair.is_filtered() && self.conf.launch_tokens_only && !self.is_launch_token(&pair) {
                    pair.filter = Some(FilterCode::NoXLaunchToken);
                }
                if pair.is_filtered() {
                    log::debug!("pair {} filtered: {:?}", pair.address, pair.filter);
                    self.deps.pairs.set_pair(pair);
                    return;
                }
                pair.block_time = Some(ctx.block_time());
                let wrap = match self.deps.pairs.get_pair_tokens(pair).await {
                    Ok(wrap) => wrap,
                    Err(e) => {
                        log::warn!("pair {}: tokens unavailable: {e}", event.pair_address());
                        return;
                    }
                };
                if let Some(pair) = self.record_resolved(ctx, tx, wrap) {
                    self.record_creation(ctx, tx, &pair, e.protocol, &e.metadata);
                }
            }
            _ => self.apply_pool_event(ctx, tx, event, price).await,
        }
    }

    async fn apply_pool_event(&self, ctx: &BlockContext, tx: &mut TxResult, event: &DexEvent, price: Decimal) {
        let address = event.pair_address();
        let wrap = match self.deps.pairs.get_pair(address, event.possible_protocols()).await {
            Ok(wrap) => wrap,
            Err(e) => {
                log::warn!("pair {address} unresolved: {e}");
                return;
            }
        };
        let Some(pair) = self.record_resolved(ctx, tx, wrap) else { return };

        if let DexEvent::Mint(m) = event {
            tx.mints.push(MintRecord { pair: pair.address, protocol: pair.protocol, amount0: m.amount0, amount1: m.amount1 });
        }
        if event.can_produce_trade() {
            if let Some(row) = event.trade(&pair, tx.sender, ctx.block_time(), price, self.bases()) {
                tx.add_trade(row);
            }
        }
        if event.can_produce_pool_update() {
            if let Some(update) = event.pool_update(&pair) {
                tx.add_pool_update(update);
            }
        }
        if event.is_migration() {
            let token = pair.non_base_token(self.bases());
            log::info!("launch pool {} migrated, token {token}", pair.address);
            self.deps.cache.set_migrate_token(&token);
            tx.migrated_pools.push(MigratedPool { pool: fmt_address(&pair.address), token: fmt_address(&token) });
        }
    }

    fn is_launch_token(&self, pair: &Pair) -> bool {
        let token = pair.non_base_token(self.bases());
        self.deps
            .cache
            .get_token(&token)
            .is_some_and(|t| t.program == ProtocolId::XLaunch.name())
    }

    /// Stamps a freshly resolved pair and its new tokens with this block, and
    /// files them on the tx. Filtered pairs yield `None`.
    fn record_resolved(&self, ctx: &BlockContext, tx: &mut TxResult, wrap: PairWrap) -> Option<Pair> {
        if wrap.pair.is_filtered() {
            return None;
        }
        let mut pair = wrap.pair;
        if !wrap.new_pair {
            return Some(pair);
        }

        let block_time = ctx.block_time();
        if pair.block == 0 {
            pair.block = ctx.height();
        }
        pair.block_time.get_or_insert(block_time);
        self.deps.pairs.set_pair(pair.clone());

        let program = pair.protocol.map(|p| p.name()).unwrap_or_default();
        for mut token in wrap.new_tokens {
            token.block = ctx.height();
            token.block_time = Some(block_time);
            if token.program.is_empty() {
                token.program = program.to_string();
            }
            self.deps.cache.set_token(token.clone());
            tx.add_token(token);
        }
        tx.add_pair(pair.clone());
        Some(pair)
    }

    /// Records a pair creation. An AMM pair for a token whose launch pool
    /// migrated consumes the marker and emits the linking action.
    fn record_creation(&self, ctx: &BlockContext, tx: &mut TxResult, pair: &Pair, protocol: ProtocolId, meta: &EventMetadata) {
        let token = pair.non_base_token(self.bases());
        let creation = PairCreation { pair: pair.address, protocol, token, tx_hash: meta.tx_hash, log_index: meta.log_index };
        if protocol.family() == PoolFamily::Amm && self.deps.cache.migrate_token_exists(&token) {
            self.deps.cache.del_migrate_token(&token);
            log::info!("token {token} moved to {} pair {}", protocol.name(), pair.address);
            tx.actions.push(migration_action(&creation, tx.sender, ctx.height(), ctx.block_time()));
        }
        tx.pair_creations.push(creation);
    }

    async fn commit_block(&self, block: &BlockResult) {
        let message = block.to_message(self.deps.chain_id);
        if let Some(store) = &self.deps.store {
            if let Err(e) = store_block(store.as_ref(), &message).await {
                fatal(&format!("store block {}", block.height), &e);
            }
        }
        if let Some(bus) = &self.deps.bus {
            if let Err(e) = bus.send(&message).await {
                fatal(&format!("publish block {}", block.height), &e);
            }
        }
        self.deps.cache.set_finished_block(block.height);
        self.stats.record(&message);

        if message.useful_info() {
            log::info!(
                "block {}: {} txs, {} pairs, {} tokens, {} actions, {} migrated, price {}",
                message.height,
                message.txs.len(),
                message.new_pairs.len(),
                message.new_tokens.len(),
                message.actions.len(),
                message.migrated_pools.len(),
                message.native_token_price
            );
        }
    }
}

/// Tokens, pairs, trades, actions, then main-pair links, in that order.
async fn store_block(store: &dyn Store, message: &BlockMessage) -> Result<(), SinkError> {
    if !message.new_tokens.is_empty() {
        store.add_tokens(&message.new_tokens).await?;
    }
    if !message.new_pairs.is_empty() {
        store.add_pairs(&message.new_pairs).await?;
    }
    if !message.txs.is_empty() {
        store.add_txs(&message.txs).await?;
    }
    if !message.actions.is_empty() {
        store.add_actions(&message.actions).await?;
    }
    for action in message.actions.iter().filter(|a| !a.pair.is_empty()) {
        retry_async(&MAIN_PAIR_RETRY, SinkError::is_transient, || async move {
            let result = store.update_token_main_pair(&action.token, &action.pair).await;
            if let Err(e) = &result {
                log::warn!("main pair of {}: {e}", action.token);
            }
            result
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { last, .. } | RetryError::Unrecoverable(last) => last,
            RetryError::Timeout(d) => SinkError::Store(format!("main pair of {} timed out after {d:?}", action.token)),
        })?;
    }
    Ok(())
}
