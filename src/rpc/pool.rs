//! Client pool
//!
//! Several client connections behind one `ChainClient`. Callers get a healthy
//! slot by round-robin; a background loop probes every slot and redials the
//! ones that fail, swapping the handle in place so readers never see a
//! half-replaced client.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::types::{Block, Receipt};
use super::{ChainClient, HeadStream, RpcError};
use crate::common::{retry_async, RetryParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SlotState {
    Connecting = 0,
    Healthy = 1,
    Checking = 2,
    CheckFailed = 3,
    Stopping = 4,
    Stopped = 5,
}

/// Dials a fresh client for slot `index`.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, index: usize) -> Result<Arc<dyn ChainClient>, RpcError>;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub check_interval: Duration,
    pub check_timeout: Duration,
    /// First redial backoff; doubles per failed attempt.
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Pause after a full cycle finds no healthy slot.
    pub spin_interval: Duration,
    /// Upper bound on how long `get` keeps cycling.
    pub get_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            check_interval: Duration::from_secs(10),
            check_timeout: Duration::from_secs(300),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(10),
            spin_interval: Duration::from_millis(5),
            get_timeout: Duration::from_secs(60),
        }
    }
}

struct Slot {
    state: AtomicU8,
    client: RwLock<Option<Arc<dyn ChainClient>>>,
}

impl Slot {
    fn state(&self) -> SlotState {
        SlotState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(SlotState::Stopped)
    }

    fn set_state(&self, state: SlotState) {
        self.state.store(state.into(), Ordering::Release);
    }

    fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from.into(), to.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct ClientPool {
    slots: Vec<Slot>,
    factory: Arc<dyn ClientFactory>,
    config: PoolConfig,
    next: AtomicUsize,
    stopped: AtomicBool,
    shutdown: Notify,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientPool {
    /// Dials every slot once and starts the health loop. Slots that fail the
    /// first dial are left to the health loop to repair.
    pub async fn connect(factory: Arc<dyn ClientFactory>, config: PoolConfig) -> Result<Arc<Self>, RpcError> {
        let size = config.size.max(1);
        let slots = (0..size)
            .map(|_| Slot { state: AtomicU8::new(SlotState::Connecting.into()), client: RwLock::new(None) })
            .collect();
        let pool = Arc::new(Self {
            slots,
            factory,
            config,
            next: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
            health_task: Mutex::new(None),
        });

        let dials = (0..size).map(|i| pool.factory.connect(i));
        let mut connected = 0;
        for (i, result) in futures::future::join_all(dials).await.into_iter().enumerate() {
            match result {
                Ok(client) => {
                    *pool.slots[i].client.write() = Some(client);
                    pool.slots[i].set_state(SlotState::Healthy);
                    connected += 1;
                }
                Err(e) => {
                    log::warn!("client pool: slot {i} initial dial failed: {e}");
                    pool.slots[i].set_state(SlotState::CheckFailed);
                }
            }
        }
        log::info!("client pool: {connected}/{size} slots connected");

        let this = pool.clone();
        *pool.health_task.lock() = Some(tokio::spawn(async move { this.health_loop().await }));
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(Slot::state)
    }

    pub fn healthy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state() == SlotState::Healthy).count()
    }

    /// A healthy client by round-robin. Cycles until one is available, the
    /// pool closes, or `get_timeout` passes.
    pub async fn get(&self) -> Result<Arc<dyn ChainClient>, RpcError> {
        self.get_with_index().await.map(|(_, client)| client)
    }

    pub async fn get_with_index(&self) -> Result<(usize, Arc<dyn ChainClient>), RpcError> {
        let n = self.slots.len();
        let deadline = Instant::now() + self.config.get_timeout;
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Err(RpcError::PoolClosed);
            }
            for _ in 0..n {
                let idx = self.next.fetch_add(1, Ordering::Relaxed) % n;
                let slot = &self.slots[idx];
                if slot.state() != SlotState::Healthy {
                    continue;
                }
                if let Some(client) = slot.client.read().clone() {
                    return Ok((idx, client));
                }
            }
            if Instant::now() >= deadline {
                return Err(RpcError::NoHealthyClient);
            }
            tokio::time::sleep(self.config.spin_interval).await;
        }
    }

    async fn health_loop(self: Arc<Self>) {
        // 首次修复初始拨号失败的槽位
        self.check_all().await;
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.notified() => break,
            }
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            self.check_all().await;
        }
        log::debug!("client pool: health loop exited");
    }

    async fn check_all(self: &Arc<Self>) {
        futures::future::join_all((0..self.slots.len()).map(|i| self.check_slot(i))).await;
    }

    async fn check_slot(self: &Arc<Self>, index: usize) {
        let slot = &self.slots[index];
        if slot.transition(SlotState::Healthy, SlotState::Checking) {
            let client = slot.client.read().clone();
            let probe = match client {
                Some(client) => tokio::time::timeout(self.config.check_timeout, client.chain_id())
                    .await
                    .unwrap_or(Err(RpcError::Timeout)),
                None => Err(RpcError::NoHealthyClient),
            };
            match probe {
                Ok(_) => {
                    slot.transition(SlotState::Checking, SlotState::Healthy);
                    return;
                }
                Err(e) => {
                    log::warn!("client pool: slot {index} health check failed: {e}");
                    if !slot.transition(SlotState::Checking, SlotState::CheckFailed) {
                        return;
                    }
                }
            }
        }
        if slot.state() == SlotState::CheckFailed {
            let this = self.clone();
            tokio::spawn(async move { this.reconnect(index).await });
        }
    }

    async fn reconnect(&self, index: usize) {
        let slot = &self.slots[index];
        if !slot.transition(SlotState::CheckFailed, SlotState::Connecting) {
            return;
        }
        let backoff = RetryParams {
            attempts: u32::MAX,
            delay: self.config.reconnect_delay,
            max_delay: self.config.max_reconnect_delay,
            timeout: Duration::ZERO,
        };
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let dial = retry_async(&backoff, |_: &RpcError| !self.stopped.load(Ordering::Acquire), || async move {
            let attempt = counter.fetch_add(1, Ordering::AcqRel) + 1;
            let result = self.factory.connect(index).await;
            if let Err(e) = &result {
                log::warn!("client pool: slot {index} reconnect attempt {attempt} failed: {e}");
            }
            result
        });

        tokio::select! {
            dialed = dial => match dialed {
                Ok(client) if !self.stopped.load(Ordering::Acquire) => {
                    *slot.client.write() = Some(client);
                    slot.transition(SlotState::Connecting, SlotState::Healthy);
                    log::info!(
                        "client pool: slot {index} reconnected after {} attempt(s)",
                        attempts.load(Ordering::Acquire)
                    );
                }
                Ok(_) => {}
                Err(e) => log::debug!("client pool: slot {index} reconnect abandoned: {e}"),
            },
            _ = self.shutdown.notified() => {}
        }
    }

    pub async fn close(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.notify_waiters();
        let task = self.health_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        for slot in &self.slots {
            slot.set_state(SlotState::Stopping);
            slot.client.write().take();
            slot.set_state(SlotState::Stopped);
        }
        log::info!("client pool: closed");
    }
}

#[async_trait]
impl ChainClient for ClientPool {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.get().await?.chain_id().await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.get().await?.block_number().await
    }

    async fn block_by_number(&self, height: u64) -> Result<Block, RpcError> {
        self.get().await?.block_by_number(height).await
    }

    async fn block_receipts(&self, height: u64) -> Result<Vec<Receipt>, RpcError> {
        self.get().await?.block_receipts(height).await
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, RpcError> {
        self.get().await?.subscribe_new_heads().await
    }

    async fn call_contract(&self, to: Address, data: Bytes, at: Option<u64>) -> Result<Bytes, RpcError> {
        self.get().await?.call_contract(to, data, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;
    use std::sync::atomic::AtomicUsize;

    struct MockFactory {
        chains: Vec<Arc<MockChain>>,
        dials: AtomicUsize,
        fail_first: usize,
        dialed_at: Mutex<Vec<Instant>>,
    }

    fn mock_factory(chains: Vec<Arc<MockChain>>, fail_first: usize) -> Arc<MockFactory> {
        Arc::new(MockFactory { chains, dials: AtomicUsize::new(0), fail_first, dialed_at: Mutex::new(Vec::new()) })
    }

    #[async_trait]
    impl ClientFactory for MockFactory {
        async fn connect(&self, index: usize) -> Result<Arc<dyn ChainClient>, RpcError> {
            self.dialed_at.lock().push(Instant::now());
            let n = self.dials.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first || !self.chains[index].is_healthy() {
                return Err(RpcError::Transport("dial refused".into()));
            }
            Ok(self.chains[index].clone())
        }
    }

    fn config(size: usize) -> PoolConfig {
        PoolConfig {
            size,
            check_interval: Duration::from_millis(50),
            check_timeout: Duration::from_millis(50),
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(100),
            spin_interval: Duration::from_millis(1),
            get_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_round_robin_over_healthy_slots() {
        let chains: Vec<_> = (0..3).map(|_| Arc::new(MockChain::new())).collect();
        let factory = mock_factory(chains, 0);
        let pool = ClientPool::connect(factory, config(3)).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(pool.get_with_index().await.unwrap().0);
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_failed_slot_is_skipped_then_repaired() {
        let chains: Vec<_> = (0..2).map(|_| Arc::new(MockChain::new())).collect();
        let factory = mock_factory(chains.clone(), 0);
        let pool = ClientPool::connect(factory.clone(), config(2)).await.unwrap();

        chains[1].set_healthy(false);
        for _ in 0..100 {
            if pool.slot_state(1) != Some(SlotState::Healthy) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for _ in 0..4 {
            let (idx, _) = pool.get_with_index().await.unwrap();
            assert_eq!(idx, 0);
        }

        // 重连成功后恢复
        chains[1].set_healthy(true);
        for _ in 0..200 {
            if pool.healthy_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.healthy_count(), 2);
        assert!(factory.dials.load(Ordering::SeqCst) > 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_initial_dial_failure_recovers() {
        let chains: Vec<_> = (0..2).map(|_| Arc::new(MockChain::new())).collect();
        let factory = mock_factory(chains, 2);
        let pool = ClientPool::connect(factory, config(2)).await.unwrap();
        assert_eq!(pool.healthy_count(), 0);

        // get 会一直等到健康检查修复某个槽位
        let client = pool.get().await.unwrap();
        assert_eq!(client.chain_id().await.unwrap(), 56);
        pool.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backs_off_exponentially() {
        let chains = vec![Arc::new(MockChain::new())];
        let factory = mock_factory(chains, 6);
        let pool = ClientPool::connect(factory.clone(), config(1)).await.unwrap();

        for _ in 0..500 {
            if pool.healthy_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.healthy_count(), 1);

        // 0 is the initial dial; 1.. are redials of one reconnect run
        let at = factory.dialed_at.lock().clone();
        assert_eq!(at.len(), 7);
        let gaps: Vec<Duration> = at[1..].windows(2).map(|w| w[1] - w[0]).collect();
        let floors = [10u64, 20, 40, 80, 100];
        for (gap, floor) in gaps.iter().zip(floors) {
            assert!(*gap >= Duration::from_millis(floor), "{gaps:?}");
        }
        // 上限 100ms 加抖动
        assert!(gaps.iter().all(|g| *g <= Duration::from_millis(150)), "{gaps:?}");
        pool.close().await;
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_get() {
        let chains = vec![Arc::new(MockChain::new())];
        let factory = mock_factory(chains, 0);
        let pool = ClientPool::connect(factory, config(1)).await.unwrap();
        pool.close().await;
        assert_eq!(pool.get().await.err(), Some(RpcError::PoolClosed));
        assert_eq!(pool.slot_state(0), Some(SlotState::Stopped));
    }
}
