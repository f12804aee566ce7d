//! Pair and token resolution.
//!
//! A cache miss runs, once per address no matter how many callers wait:
//! identity (`token0`/`token1`, or `token()` for launch pools), base-token
//! filter, protocol verification against the factories, normalization, then
//! token metadata. Every outcome is cached, filtered ones included.

use std::sync::Arc;

use alloy_primitives::Address;
use smallvec::SmallVec;

use super::contract_caller::ContractCaller;
use super::singleflight::SingleFlight;
use super::ServiceError;
use crate::core::amounts::wei_to_decimal;
use crate::core::types::{BaseTokens, FilterCode, Pair, PoolFamily, ProtocolId, Token};
use crate::logs::TopicRegistry;
use crate::sinks::Cache;

/// A resolved pair plus what this resolution saw for the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct PairWrap {
    pub pair: Pair,
    /// Resolved now rather than read from the cache.
    pub new_pair: bool,
    pub new_tokens: Vec<Token>,
}

impl PairWrap {
    fn cached(pair: Pair) -> Self {
        Self { pair, new_pair: false, new_tokens: Vec::new() }
    }

    fn filtered(pair: Pair) -> Self {
        Self { pair, new_pair: true, new_tokens: Vec::new() }
    }
}

pub struct PairService {
    caller: ContractCaller,
    cache: Arc<dyn Cache>,
    registry: Arc<TopicRegistry>,
    pair_group: SingleFlight<Result<PairWrap, ServiceError>>,
    token_group: SingleFlight<Result<(Token, bool), ServiceError>>,
}

impl PairService {
    pub fn new(caller: ContractCaller, cache: Arc<dyn Cache>, registry: Arc<TopicRegistry>) -> Arc<Self> {
        Arc::new(Self {
            caller,
            cache,
            registry,
            pair_group: SingleFlight::new(),
            token_group: SingleFlight::new(),
        })
    }

    pub fn bases(&self) -> &BaseTokens {
        self.registry.bases()
    }

    /// Cached pair, or a full on-chain resolution trying `protocols` in order.
    pub async fn get_pair(self: &Arc<Self>, address: Address, protocols: &[ProtocolId]) -> Result<PairWrap, ServiceError> {
        if let Some(pair) = self.cache.get_pair(&address) {
            return Ok(PairWrap::cached(pair));
        }
        let this = Arc::clone(self);
        let protocols: SmallVec<[ProtocolId; 2]> = SmallVec::from_slice(protocols);
        self.pair_group
            .work(&format!("{address}gp"), async move {
                // 上一轮刚写入缓存
                if let Some(pair) = this.cache.get_pair(&address) {
                    return Ok(PairWrap::cached(pair));
                }
                this.resolve_pair(address, &protocols).await
            })
            .await
    }

    /// Token metadata for a pair whose identity and protocol are already
    /// known, e.g. from a whitelisted factory event.
    pub async fn get_pair_tokens(self: &Arc<Self>, pair: Pair) -> Result<PairWrap, ServiceError> {
        if let Some(cached) = self.cache.get_pair(&pair.address) {
            return Ok(PairWrap::cached(cached));
        }
        let this = Arc::clone(self);
        let key = format!("{}gpt", pair.address);
        self.pair_group
            .work(&key, async move {
                if let Some(cached) = this.cache.get_pair(&pair.address) {
                    return Ok(PairWrap::cached(cached));
                }
                let wrap = this.fill_tokens(pair).await?;
                this.cache.set_pair(wrap.pair.clone());
                Ok(wrap)
            })
            .await
    }

    /// Unconditional write-through.
    pub fn set_pair(&self, pair: Pair) {
        self.cache.set_pair(pair);
    }

    async fn resolve_pair(self: Arc<Self>, address: Address, protocols: &[ProtocolId]) -> Result<PairWrap, ServiceError> {
        let Some((token0, token1)) = self.identify(address, protocols).await? else {
            log::debug!("pair {address}: token identity unavailable");
            return Ok(self.cache_filtered(Pair::filtered(address, FilterCode::GetToken)));
        };

        let mut pair = Pair::new(address, token0, token1);
        if pair.apply_base_token_filter(self.bases()) {
            return Ok(self.cache_filtered(pair));
        }

        let mut verified = None;
        for protocol in protocols {
            if self.verify(&pair, *protocol).await? {
                verified = Some(*protocol);
                break;
            }
        }
        let Some(protocol) = verified else {
            log::debug!("pair {address}: no protocol in {protocols:?} verifies it");
            pair.filter = Some(FilterCode::VerifyFailed);
            return Ok(self.cache_filtered(pair));
        };
        pair.protocol = Some(protocol);
        pair.normalize(self.bases());

        let wrap = self.fill_tokens(pair).await?;
        self.cache.set_pair(wrap.pair.clone());
        Ok(wrap)
    }

    /// On-chain token order. `None` when the contract does not answer like a
    /// pool of any candidate family.
    async fn identify(&self, address: Address, protocols: &[ProtocolId]) -> Result<Option<(Address, Address)>, ServiceError> {
        let launch_only = !protocols.is_empty() && protocols.iter().all(|p| p.family() == PoolFamily::Launch);
        if launch_only {
            return match self.caller.call_token(address).await {
                Ok(token) => Ok(Some((token, Address::ZERO))),
                Err(e) => definite_failure(e).map(|_| None),
            };
        }

        let (t0, t1) = tokio::join!(self.caller.call_token0(address), self.caller.call_token1(address));
        match (t0, t1) {
            (Ok(t0), Ok(t1)) => Ok(Some((t0, t1))),
            (Err(e), _) | (_, Err(e)) => definite_failure(e).map(|_| None),
        }
    }

    async fn verify(&self, pair: &Pair, protocol: ProtocolId) -> Result<bool, ServiceError> {
        let (t0, t1) = (pair.token0.address, pair.token1.address);
        for factory in self.registry.protocol_factories(protocol) {
            let result = match protocol {
                ProtocolId::UniswapV2 => self.caller.call_get_pair(factory, t0, t1).await.map(|a| a == pair.address),
                ProtocolId::UniswapV3 => match self.caller.call_fee(pair.address).await {
                    Ok(fee) => self.caller.call_get_pool(factory, t0, t1, fee).await.map(|a| a == pair.address),
                    Err(e) => Err(e),
                },
                ProtocolId::XLaunch => self.caller.call_get_launch_by_address(factory, pair.address).await,
            };
            match result {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => definite_failure(e)?,
            }
        }
        Ok(false)
    }

    /// Resolves both sides. A token that cannot be read filters the pair.
    async fn fill_tokens(self: &Arc<Self>, mut pair: Pair) -> Result<PairWrap, ServiceError> {
        let (r0, r1) = tokio::join!(self.get_token(pair.token0.address), self.get_token(pair.token1.address));
        let ((token0, new0), (token1, new1)) = (r0?, r1?);

        if token0.filtered || token1.filtered {
            log::debug!("pair {}: token metadata unavailable", pair.address);
            pair.filter = Some(FilterCode::GetToken);
            return Ok(PairWrap::filtered(pair));
        }

        pair.token0 = token0.core();
        pair.token1 = token1.core();
        let mut new_tokens = Vec::new();
        if new0 {
            new_tokens.push(token0);
        }
        if new1 {
            new_tokens.push(token1);
        }
        Ok(PairWrap { pair, new_pair: true, new_tokens })
    }

    /// Cached or freshly read token; the flag is true for a fresh read.
    pub async fn get_token(self: &Arc<Self>, address: Address) -> Result<(Token, bool), ServiceError> {
        if address.is_zero() {
            return Ok((self.bases().native_token(), false));
        }
        if let Some(token) = self.cache.get_token(&address) {
            return Ok((token, false));
        }
        let this = Arc::clone(self);
        self.token_group
            .work(&format!("{address}gt"), async move {
                if let Some(token) = this.cache.get_token(&address) {
                    return Ok((token, false));
                }
                this.resolve_token(address).await
            })
            .await
    }

    async fn resolve_token(&self, address: Address) -> Result<(Token, bool), ServiceError> {
        let (name, symbol, decimals, supply) = tokio::join!(
            self.caller.call_name(address),
            self.caller.call_symbol(address),
            self.caller.call_decimals(address),
            self.caller.call_total_supply(address),
        );

        let token = match decimals {
            Ok(decimals) => Token {
                address,
                name: optional(name)?,
                symbol: optional(symbol)?,
                decimals,
                total_supply: wei_to_decimal(optional(supply)?, decimals),
                ..Token::default()
            },
            Err(e) => {
                definite_failure(e)?;
                log::debug!("token {address}: decimals unavailable, filtered");
                Token { address, filtered: true, ..Token::default() }
            }
        };
        self.cache.set_token(token.clone());
        Ok((token, true))
    }

    fn cache_filtered(&self, pair: Pair) -> PairWrap {
        self.cache.set_pair(pair.clone());
        PairWrap::filtered(pair)
    }
}

/// `Ok` for a definite answer from the chain (revert, empty, malformed),
/// `Err` for transport trouble that should not be cached.
fn definite_failure(e: ServiceError) -> Result<(), ServiceError> {
    match e {
        ServiceError::OutputEmpty(_) | ServiceError::WrongOutput(_) => Ok(()),
        other => Err(other),
    }
}

fn optional<T: Default>(r: Result<T, ServiceError>) -> Result<T, ServiceError> {
    match r {
        Ok(v) => Ok(v),
        Err(e) => definite_failure(e).map(|_| T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RetryParams;
    use crate::core::types::TokenCore;
    use crate::service::contract_caller::methods;
    use crate::sinks::MemoryCache;
    use crate::testing::{billion_supply, test_bases, test_deployments, MockChain, MEME, OTHER, POOL, USDC, V2_FACTORY, V3_FACTORY, WETH};
    use rust_decimal::Decimal;
    use std::time::Duration;

    struct Fixture {
        chain: Arc<MockChain>,
        cache: Arc<MemoryCache>,
        service: Arc<PairService>,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(MockChain::new());
        let cache = Arc::new(MemoryCache::new());
        let registry = Arc::new(TopicRegistry::new(&test_deployments(), test_bases()));
        let caller = ContractCaller::new(chain.clone(), RetryParams::new(2, Duration::from_millis(1), Duration::ZERO));
        let service = PairService::new(caller, cache.clone(), registry);
        Fixture { chain, cache, service }
    }

    /// Misses the first pair lookup per address, like a caller that checked
    /// just before the leader's write landed.
    struct LateCache {
        inner: MemoryCache,
        missed: parking_lot::Mutex<std::collections::HashSet<Address>>,
    }

    impl Cache for LateCache {
        fn get_pair(&self, address: &Address) -> Option<Pair> {
            if self.missed.lock().insert(*address) {
                return None;
            }
            self.inner.get_pair(address)
        }
        fn set_pair(&self, pair: Pair) {
            self.inner.set_pair(pair)
        }
        fn pair_exists(&self, address: &Address) -> bool {
            self.inner.pair_exists(address)
        }
        fn del_pair(&self, address: &Address) {
            self.inner.del_pair(address)
        }
        fn get_token(&self, address: &Address) -> Option<Token> {
            self.inner.get_token(address)
        }
        fn set_token(&self, token: Token) {
            self.inner.set_token(token)
        }
        fn get_price(&self, height: u64) -> Option<Decimal> {
            self.inner.get_price(height)
        }
        fn set_price(&self, height: u64, price: Decimal) {
            self.inner.set_price(height, price)
        }
        fn get_finished_block(&self) -> u64 {
            self.inner.get_finished_block()
        }
        fn set_finished_block(&self, height: u64) {
            self.inner.set_finished_block(height)
        }
        fn migrate_token_exists(&self, token: &Address) -> bool {
            self.inner.migrate_token_exists(token)
        }
        fn set_migrate_token(&self, token: &Address) {
            self.inner.set_migrate_token(token)
        }
        fn del_migrate_token(&self, token: &Address) {
            self.inner.del_migrate_token(token)
        }
    }

    #[tokio::test]
    async fn test_pair_cached_after_first_check_is_not_resolved_again() {
        let chain = Arc::new(MockChain::new());
        script_v2_pair(&chain);
        let cache = Arc::new(LateCache { inner: MemoryCache::new(), missed: Default::default() });
        let mut pair = Pair::new(POOL, MEME, WETH);
        pair.protocol = Some(ProtocolId::UniswapV2);
        cache.inner.set_pair(pair);

        let registry = Arc::new(TopicRegistry::new(&test_deployments(), test_bases()));
        let caller = ContractCaller::new(chain.clone(), RetryParams::new(2, Duration::from_millis(1), Duration::ZERO));
        let service = PairService::new(caller, cache, registry);

        let wrap = service.get_pair(POOL, &[ProtocolId::UniswapV2]).await.unwrap();
        assert!(!wrap.new_pair);
        assert_eq!(chain.call_count(POOL, methods::TOKEN0), 0);
        assert_eq!(chain.call_count(V2_FACTORY, methods::GET_PAIR), 0);
    }

    fn script_v2_pair(chain: &MockChain) {
        chain.set_pair_tokens(POOL, WETH, MEME);
        chain.set_get_pair(V2_FACTORY, WETH, MEME, POOL);
        chain.set_erc20(WETH, "Wrapped Ether", "WETH", 18, billion_supply());
        chain.set_erc20(MEME, "Meme", "MEME", 9, billion_supply());
    }

    #[tokio::test]
    async fn test_resolves_verifies_and_normalizes() {
        let f = fixture();
        script_v2_pair(&f.chain);

        let wrap = f.service.get_pair(POOL, &[ProtocolId::UniswapV2]).await.unwrap();
        assert!(wrap.new_pair);
        assert!(!wrap.pair.is_filtered());
        assert_eq!(wrap.pair.protocol, Some(ProtocolId::UniswapV2));
        assert!(wrap.pair.tokens_reversed);
        assert_eq!(wrap.pair.token0, TokenCore { address: MEME, symbol: "MEME".into(), decimals: 9 });
        assert_eq!(wrap.pair.token1.address, WETH);
        assert_eq!(wrap.new_tokens.len(), 2);
        assert_eq!(wrap.new_tokens.iter().find(|t| t.address == MEME).unwrap().total_supply, Decimal::from(1_000_000_000_000_000_000u64));

        // 第二次走缓存
        let again = f.service.get_pair(POOL, &[ProtocolId::UniswapV2]).await.unwrap();
        assert!(!again.new_pair);
        assert_eq!(again.pair, wrap.pair);
        assert_eq!(f.chain.call_count(POOL, methods::TOKEN0), 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_resolve_once() {
        let f = fixture();
        script_v2_pair(&f.chain);
        f.chain.set_call_delay(Duration::from_millis(20));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = f.service.clone();
            handles.push(tokio::spawn(async move { service.get_pair(POOL, &[ProtocolId::UniswapV2]).await }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(f.chain.call_count(POOL, methods::TOKEN0), 1);
        assert_eq!(f.chain.call_count(V2_FACTORY, methods::GET_PAIR), 1);
        assert_eq!(f.chain.call_count(MEME, methods::DECIMALS), 1);
    }

    #[tokio::test]
    async fn test_no_base_token_filtered_without_verification() {
        let f = fixture();
        f.chain.set_pair_tokens(POOL, MEME, OTHER);
        let wrap = f.service.get_pair(POOL, &[ProtocolId::UniswapV2]).await.unwrap();
        assert_eq!(wrap.pair.filter, Some(FilterCode::NoBaseToken));
        assert_eq!(f.chain.call_count(V2_FACTORY, methods::GET_PAIR), 0);
        assert!(f.cache.get_pair(&POOL).unwrap().is_filtered());
    }

    #[tokio::test]
    async fn test_unverified_pair_filtered_and_cached() {
        let f = fixture();
        f.chain.set_pair_tokens(POOL, MEME, USDC);
        // factory knows a different pair for these tokens
        f.chain.set_get_pair(V2_FACTORY, MEME, USDC, OTHER);

        let wrap = f.service.get_pair(POOL, &[ProtocolId::UniswapV2, ProtocolId::UniswapV3]).await.unwrap();
        assert_eq!(wrap.pair.filter, Some(FilterCode::VerifyFailed));
        let again = f.service.get_pair(POOL, &[ProtocolId::UniswapV2]).await.unwrap();
        assert!(again.pair.is_filtered());
        assert_eq!(f.chain.call_count(POOL, methods::TOKEN0), 1);
    }

    #[tokio::test]
    async fn test_second_protocol_verifies() {
        let f = fixture();
        f.chain.set_pair_tokens(POOL, MEME, WETH);
        f.chain.set_get_pool(V3_FACTORY, MEME, WETH, 3000, POOL);
        f.chain.set_erc20(WETH, "Wrapped Ether", "WETH", 18, billion_supply());
        f.chain.set_erc20(MEME, "Meme", "MEME", 18, billion_supply());

        let wrap = f.service.get_pair(POOL, &[ProtocolId::UniswapV2, ProtocolId::UniswapV3]).await.unwrap();
        assert_eq!(wrap.pair.protocol, Some(ProtocolId::UniswapV3));
        assert!(!wrap.pair.tokens_reversed);
    }

    #[tokio::test]
    async fn test_identity_failure_filters_with_get_token() {
        let f = fixture();
        f.chain.revert_call(POOL, methods::TOKEN0);
        let wrap = f.service.get_pair(POOL, &[ProtocolId::UniswapV2]).await.unwrap();
        assert_eq!(wrap.pair.filter, Some(FilterCode::GetToken));
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_cached() {
        let f = fixture();
        f.chain.set_healthy(false);
        assert!(f.service.get_pair(POOL, &[ProtocolId::UniswapV2]).await.is_err());
        assert!(f.cache.get_pair(&POOL).is_none());
    }

    #[tokio::test]
    async fn test_token_without_decimals_is_filtered_and_cached() {
        let f = fixture();
        f.chain.set_erc20(MEME, "Meme", "MEME", 18, billion_supply());
        f.chain.revert_call(MEME, methods::DECIMALS);
        let (token, fresh) = f.service.get_token(MEME).await.unwrap();
        assert!(fresh && token.filtered);
        let (cached, fresh) = f.service.get_token(MEME).await.unwrap();
        assert!(!fresh && cached.filtered);
        assert_eq!(f.chain.call_count(MEME, methods::DECIMALS), 1);
    }

    #[tokio::test]
    async fn test_filtered_token_filters_pair() {
        let f = fixture();
        script_v2_pair(&f.chain);
        f.chain.revert_call(MEME, methods::DECIMALS);
        let wrap = f.service.get_pair(POOL, &[ProtocolId::UniswapV2]).await.unwrap();
        assert_eq!(wrap.pair.filter, Some(FilterCode::GetToken));
    }

    #[tokio::test]
    async fn test_pair_tokens_for_known_pair() {
        let f = fixture();
        f.chain.set_erc20(WETH, "Wrapped Ether", "WETH", 18, billion_supply());
        f.chain.set_erc20(MEME, "Meme", "MEME", 6, billion_supply());
        let mut pair = Pair::new(POOL, WETH, MEME);
        pair.protocol = Some(ProtocolId::UniswapV2);
        pair.normalize(&test_bases());

        let wrap = f.service.get_pair_tokens(pair).await.unwrap();
        assert_eq!(wrap.pair.token0.decimals, 6);
        assert_eq!(wrap.pair.token1.symbol, "WETH");
        assert!(f.cache.pair_exists(&POOL));
        assert_eq!(f.chain.call_count(POOL, methods::TOKEN0), 0);
    }

    #[tokio::test]
    async fn test_native_side_needs_no_calls() {
        let f = fixture();
        let (token, fresh) = f.service.get_token(Address::ZERO).await.unwrap();
        assert!(!fresh);
        assert_eq!(token.symbol, "ETH");
    }
}
