//! Block acquisition
//!
//! A head tracker publishes the highest observed height. A dispatcher feeds
//! every height from the start up to that head into a bounded queue. A fixed
//! pool of workers fetches body and receipts concurrently, retries the pair,
//! and emits through the ordering gate into a small output buffer.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::{BlockContext, PipelineError};
use crate::common::{fatal, retry_async, RetryError, RetryParams};
use crate::config::BlockGetterConf;
use crate::rpc::{ChainClient, RpcError};
use crate::sequencer::{ChannelCommitter, Sequencer};
use crate::sinks::Cache;

const OUTPUT_BUFFER: usize = 10;
const RESUBSCRIBE_BASE: Duration = Duration::from_millis(500);
const RESUBSCRIBE_CAP: Duration = Duration::from_secs(10);
const STALL_CHECK: Duration = Duration::from_millis(50);

type HeightQueue = Arc<AsyncMutex<mpsc::Receiver<u64>>>;

pub struct BlockGetter {
    client: Arc<dyn ChainClient>,
    cache: Arc<dyn Cache>,
    conf: BlockGetterConf,
    gate: Sequencer,
    /// Highest head seen; only ever increases.
    head: watch::Sender<u64>,
    stop: watch::Sender<bool>,
    /// Releases workers stuck behind a height that was dropped.
    abort: watch::Sender<bool>,
    output: AsyncMutex<mpsc::Receiver<BlockContext>>,
    output_tx: Mutex<Option<mpsc::Sender<BlockContext>>>,
    next_height: AtomicU64,
    unresolved: Mutex<BTreeSet<u64>>,
    live_workers: AtomicUsize,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BlockGetter {
    pub fn new(client: Arc<dyn ChainClient>, cache: Arc<dyn Cache>, conf: BlockGetterConf) -> Arc<Self> {
        let (output_tx, output) = mpsc::channel(OUTPUT_BUFFER);
        Arc::new(Self {
            client,
            cache,
            gate: Sequencer::new(conf.ordered),
            conf,
            head: watch::channel(0).0,
            stop: watch::channel(false).0,
            abort: watch::channel(false).0,
            output: AsyncMutex::new(output),
            output_tx: Mutex::new(Some(output_tx)),
            next_height: AtomicU64::new(0),
            unresolved: Mutex::new(BTreeSet::new()),
            live_workers: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Explicit start height, else one past the finished watermark, else the
    /// current chain head.
    pub async fn start_height(&self) -> Result<u64, PipelineError> {
        if self.conf.start_height > 0 {
            return Ok(self.conf.start_height);
        }
        let finished = self.cache.get_finished_block();
        if finished > 0 {
            return Ok(finished + 1);
        }
        Ok(self.client.block_number().await?)
    }

    pub fn start(self: &Arc<Self>, start: u64) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted);
        }
        self.gate.init(start)?;
        let output_tx = self.output_tx.lock().take().ok_or(PipelineError::AlreadyStarted)?;
        self.next_height.store(start, Ordering::Release);

        let (queue_tx, queue_rx) = mpsc::channel::<u64>(self.conf.queue_size.max(1));
        let queue: HeightQueue = Arc::new(AsyncMutex::new(queue_rx));

        let mut tasks = Vec::with_capacity(self.conf.pool_size + 2);
        tasks.push(tokio::spawn(Arc::clone(self).track_heads()));
        let dispatcher = tokio::spawn(Arc::clone(self).dispatch(start, queue_tx));
        for id in 0..self.conf.pool_size {
            self.live_workers.fetch_add(1, Ordering::AcqRel);
            let committer = ChannelCommitter::new(output_tx.clone());
            tasks.push(tokio::spawn(Arc::clone(self).work(id, queue.clone(), committer)));
        }
        drop(output_tx);
        tasks.push(tokio::spawn(Arc::clone(self).watch_stall(dispatcher)));
        *self.tasks.lock() = tasks;

        log::info!(
            "block getter started at {start}: {} workers, queue {}, {}",
            self.conf.pool_size,
            self.conf.queue_size,
            if self.conf.subscribe_heads { "newHeads subscription" } else { "head polling" }
        );
        Ok(())
    }

    /// Start at [`start_height`](Self::start_height).
    pub async fn start_dispatch(self: &Arc<Self>) -> Result<u64, PipelineError> {
        let start = self.start_height().await?;
        self.start(start)?;
        Ok(start)
    }

    /// Next block in ascending height order; `None` once stopped and drained.
    pub async fn next(&self) -> Option<BlockContext> {
        self.output.lock().await.recv().await
    }

    /// Stops dispatching new heights. In-flight heights still complete.
    pub fn stop(&self) {
        if !self.stop.send_replace(true) {
            log::info!("block getter stopping, next height {}", self.next_height());
        }
    }

    /// Waits for every background task to finish.
    pub async fn wait(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("block getter task failed: {e}");
            }
        }
    }

    /// First height not yet handed to a worker.
    pub fn next_height(&self) -> u64 {
        self.next_height.load(Ordering::Acquire)
    }

    pub fn observed_head(&self) -> u64 {
        *self.head.borrow()
    }

    /// Heights dropped after exhausting retries.
    pub fn unresolved(&self) -> Vec<u64> {
        self.unresolved.lock().iter().copied().collect()
    }

    fn publish_head(&self, height: u64) {
        self.head.send_if_modified(|head| {
            if height > *head {
                *head = height;
                true
            } else {
                false
            }
        });
    }

    async fn track_heads(self: Arc<Self>) {
        if self.conf.subscribe_heads {
            self.subscribe_heads().await
        } else {
            self.poll_heads().await
        }
    }

    async fn poll_heads(&self) {
        let mut stop = self.stop.subscribe();
        let interval = Duration::from_millis(self.conf.poll_interval_ms.max(1));
        loop {
            match self.client.block_number().await {
                Ok(height) => self.publish_head(height),
                Err(e) => log::warn!("poll head: {e}"),
            }
            tokio::select! {
                _ = stop.wait_for(|s| *s) => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn subscribe_heads(&self) {
        let mut stop = self.stop.subscribe();
        let stall = Duration::from_secs(self.conf.stall_timeout_secs.max(1));
        let mut backoff = RESUBSCRIBE_BASE;

        'outer: loop {
            if *stop.borrow() {
                break;
            }
            // 订阅前先同步一次当前高度
            if let Ok(height) = self.client.block_number().await {
                self.publish_head(height);
            }

            match self.client.subscribe_new_heads().await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        _ = stop.wait_for(|s| *s) => break 'outer,
                        item = tokio::time::timeout(stall, stream.next()) => match item {
                            Ok(Some(Ok(height))) => {
                                backoff = RESUBSCRIBE_BASE;
                                self.publish_head(height);
                            }
                            Ok(Some(Err(e))) => {
                                log::warn!("head stream: {e}");
                                break;
                            }
                            Ok(None) => {
                                log::warn!("head stream ended");
                                break;
                            }
                            Err(_) => {
                                log::warn!("no new head for {stall:?}, resubscribing");
                                break;
                            }
                        },
                    }
                },
                Err(e) => log::warn!("subscribe newHeads: {e}"),
            }

            tokio::select! {
                _ = stop.wait_for(|s| *s) => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RESUBSCRIBE_CAP);
        }
    }

    async fn dispatch(self: Arc<Self>, start: u64, queue: mpsc::Sender<u64>) {
        let mut stop = self.stop.subscribe();
        let mut head = self.head.subscribe();
        let mut cursor = start;

        'outer: loop {
            let observed = *head.borrow_and_update();
            while cursor <= observed {
                tokio::select! {
                    biased;
                    _ = stop.wait_for(|s| *s) => break 'outer,
                    sent = queue.send(cursor) => {
                        if sent.is_err() {
                            break 'outer;
                        }
                    }
                }
                cursor += 1;
                self.next_height.store(cursor, Ordering::Release);
            }
            tokio::select! {
                biased;
                _ = stop.wait_for(|s| *s) => break,
                changed = head.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        log::info!("dispatcher stopped, next height {cursor}");
    }

    async fn work(self: Arc<Self>, id: usize, queue: HeightQueue, committer: ChannelCommitter<BlockContext>) {
        let retry = self.conf.retry.params();
        let mut abort = self.abort.subscribe();
        loop {
            let next = queue.lock().await.recv().await;
            let Some(height) = next else { break };

            let ctx = match self.fetch(height, &retry).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    log::error!("block {height}: fetch failed, dropped: {e}");
                    self.unresolved.lock().insert(height);
                    continue;
                }
            };

            tokio::select! {
                committed = self.gate.commit_with_sequence(ctx, &committer) => {
                    if let Err(e) = committed {
                        fatal("block getter gate", &e);
                    }
                }
                _ = abort.wait_for(|a| *a) => {
                    log::warn!("worker {id}: block {height} abandoned behind an unresolved height");
                    break;
                }
            }
        }
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Body and receipts, fetched together and retried together.
    async fn fetch(&self, height: u64, retry: &RetryParams) -> Result<BlockContext, RetryError<RpcError>> {
        #[cfg(feature = "perf-stats")]
        let started = std::time::Instant::now();

        let ctx = retry_async(retry, |_: &RpcError| true, || async move {
            let (block, receipts) = tokio::join!(self.client.block_by_number(height), self.client.block_receipts(height));
            let block = block?;
            if block.number != height {
                return Err(RpcError::Decode(format!("asked for block {height}, got {}", block.number)));
            }
            Ok(BlockContext::new(block, receipts?))
        })
        .await?;

        #[cfg(feature = "perf-stats")]
        log::debug!("block {height} fetched in {:?}", started.elapsed());
        Ok(ctx)
    }

    /// Once dispatch has ended, releases workers that can never commit
    /// because an earlier height was dropped. Unordered workers never wait
    /// on a gap, so they are left to drain.
    async fn watch_stall(self: Arc<Self>, dispatcher: JoinHandle<()>) {
        if let Err(e) = dispatcher.await {
            log::error!("dispatcher failed: {e}");
        }
        if !self.conf.ordered {
            return;
        }
        let mut tick = tokio::time::interval(STALL_CHECK);
        loop {
            tick.tick().await;
            if self.live_workers.load(Ordering::Acquire) == 0 {
                break;
            }
            let gap = self.unresolved.lock().first().copied();
            let Some(gap) = gap else { continue };
            if self.gate.next_sequence().map_or(true, |next| next >= gap) {
                log::warn!("block {gap} unresolved, releasing workers waiting behind it");
                self.abort.send_replace(true);
                break;
            }
        }
    }
}
