//! Indexer daemon
//!
//! Wires the client pool, block getter and block parser together and runs
//! until SIGINT/SIGTERM, then drains in-flight blocks before exiting.
//!
//! ```text
//! indexer -c config.json
//! indexer -c config.json --start 12000000 --preset backfill
//! indexer --config=config.json --watermark=/var/lib/indexer/finished.json
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use evm_dex_indexer::config::Config;
use evm_dex_indexer::rpc::{ChainClient, ClientPool, JsonRpcFactory, PoolConfig};
use evm_dex_indexer::service::{ContractCaller, FixedPriceSource, PriceSource, ReservePriceSource};
use evm_dex_indexer::sinks::{Cache, LogBus, MemoryCache, MemoryStore, MessageBus, Store};
use evm_dex_indexer::{BlockGetter, BlockParser, PairService, ParserDeps, TopicRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Preset {
    /// newHeads subscription, small pools, fast give-up
    Realtime,
    /// polling, wide pools, patient retries
    Backfill,
}

/// Ordered EVM block indexer for Uniswap V2/V3 and XLaunch pools.
#[derive(Parser, Debug)]
#[command(name = "indexer", version, about)]
struct Cli {
    /// JSON config file.
    #[arg(short, long, env = "INDEXER_CONFIG", default_value = "config.json")]
    config: String,

    /// First height to index; overrides the watermark and the config.
    #[arg(long)]
    start: Option<u64>,

    /// Pool and retry tuning applied over the config file.
    #[arg(long, value_enum)]
    preset: Option<Preset>,

    /// File keeping the finished-block watermark across restarts.
    #[arg(long, env = "INDEXER_WATERMARK")]
    watermark: Option<String>,
}

/// File config, then the preset's pool and retry tuning, then flags.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(&cli.config)?;
    if let Some(preset) = cli.preset {
        let tuned = match preset {
            Preset::Realtime => Config::realtime(),
            Preset::Backfill => Config::backfill(0),
        };
        config.block_getter.pool_size = tuned.block_getter.pool_size;
        config.block_getter.queue_size = tuned.block_getter.queue_size;
        config.block_getter.subscribe_heads = tuned.block_getter.subscribe_heads && config.rpc.ws_url.is_some();
        config.block_parser.pool_size = tuned.block_parser.pool_size;
        config.block_parser.queue_size = tuned.block_parser.queue_size;
        config.rpc.call_retry = tuned.rpc.call_retry;
    }
    if let Some(start) = cli.start {
        config.block_getter.start_height = start;
    }
    if let Some(path) = &cli.watermark {
        config.cache.watermark_path = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(&Cli::parse())?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log.level.as_str())).init();

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let factory = JsonRpcFactory {
        url: config.rpc.http_url.clone(),
        ws_url: config.rpc.ws_url.clone(),
        timeout: Duration::from_millis(config.rpc.request_timeout_ms),
    };
    let pool = ClientPool::connect(
        Arc::new(factory),
        PoolConfig {
            size: config.rpc.pool_size,
            check_interval: Duration::from_secs(config.rpc.check_interval_secs),
            check_timeout: Duration::from_secs(config.rpc.check_timeout_secs),
            reconnect_delay: Duration::from_millis(config.rpc.reconnect_delay_ms),
            ..PoolConfig::default()
        },
    )
    .await?;
    let client: Arc<dyn ChainClient> = pool.clone();

    let chain_id = client.chain_id().await.context("query chain id")?;
    if chain_id != config.chain.chain_id {
        log::warn!("node reports chain {chain_id}, config says {}", config.chain.chain_id);
    }

    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::open(&config.cache).context("open cache")?);
    let registry = Arc::new(TopicRegistry::new(&config.chain.deployments, config.chain.base_tokens()));
    log::info!("{} event topics registered", registry.len());

    let caller = ContractCaller::new(client.clone(), config.rpc.call_retry.params());
    let price: Arc<dyn PriceSource> = match (config.price.fixed, config.price.reserve_pair) {
        (Some(fixed), _) => Arc::new(FixedPriceSource(fixed)),
        (None, Some(pair)) => Arc::new(ReservePriceSource::new(
            caller.clone(),
            cache.clone(),
            pair,
            config.price.native_is_token0,
            config.chain.native_decimals,
            config.price.stable_decimals,
        )),
        (None, None) => bail!("no price source configured"),
    };

    let deps = ParserDeps {
        registry: registry.clone(),
        pairs: PairService::new(caller, cache.clone(), registry),
        cache: cache.clone(),
        store: config.sinks.store.then(|| Arc::new(MemoryStore::new()) as Arc<dyn Store>),
        bus: config.sinks.bus.then(|| Arc::new(LogBus) as Arc<dyn MessageBus>),
        price,
        chain_id,
    };
    let parser = BlockParser::new(deps, config.block_parser.clone());
    let getter = BlockGetter::new(client, cache, config.block_getter.clone());

    let start = getter.start_height().await?;
    parser.start(start)?;
    getter.start(start)?;

    let stopper = getter.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("shutdown requested");
        stopper.stop();
    });

    while let Some(ctx) = getter.next().await {
        parser.parse_block_async(ctx).await?;
    }
    getter.wait().await;
    parser.stop();
    parser.wait().await;
    pool.close().await;

    let stats = parser.stats();
    log::info!(
        "stopped at {}: {} blocks, {} txs, {} pairs, {} tokens, {} actions",
        stats.last_height,
        stats.blocks,
        stats.txs,
        stats.pairs,
        stats.tokens,
        stats.actions
    );
    if let Some(gap) = getter.unresolved().first() {
        log::warn!("height {gap} was never fetched; resume with --start {gap}");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
