//! Per-transaction and per-block parse results, and the published block message.

use std::collections::{BTreeMap, HashMap, HashSet};

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::events::PoolUpdate;
use super::rows::{fmt_address, fmt_hash, ActionRow, MigratedPool, PairRow, TokenRow, TxRow};
use super::types::{Pair, ProtocolId, Token};
use crate::sequencer::Sequenced;

/// A pair created in this tx, in log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairCreation {
    pub pair: Address,
    pub protocol: ProtocolId,
    /// Non-base side of the pair.
    pub token: Address,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Mint amounts in wire order, kept for initial-reserve linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRecord {
    pub pair: Address,
    pub protocol: Option<ProtocolId>,
    pub amount0: U256,
    pub amount1: U256,
}

#[derive(Debug, Clone, Default)]
pub struct TxResult {
    pub sender: Address,
    pub trades: Vec<TxRow>,
    pub pool_updates: Vec<PoolUpdate>,
    pub pairs: Vec<Pair>,
    pub tokens: Vec<Token>,
    pub migrated_pools: Vec<MigratedPool>,
    pub actions: Vec<ActionRow>,
    pub pair_creations: Vec<PairCreation>,
    pub mints: Vec<MintRecord>,
}

impl TxResult {
    pub fn new(sender: Address) -> Self {
        Self { sender, ..Self::default() }
    }

    pub fn add_pair(&mut self, pair: Pair) {
        self.pairs.push(pair);
    }

    pub fn add_token(&mut self, token: Token) {
        self.tokens.push(token);
    }

    pub fn add_trade(&mut self, row: TxRow) {
        self.trades.push(row);
    }

    pub fn add_pool_update(&mut self, update: PoolUpdate) {
        self.pool_updates.push(update);
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
            && self.pool_updates.is_empty()
            && self.pairs.is_empty()
            && self.tokens.is_empty()
            && self.migrated_pools.is_empty()
            && self.actions.is_empty()
    }

    /// Seeds the initial reserves of each pair created in this tx from the
    /// Mint that followed it: the i-th creation of a (pair, protocol) takes
    /// the i-th Mint on that same (pair, protocol). Returns the pairs that
    /// changed.
    pub fn link_pair_creations(&mut self) -> Vec<Pair> {
        if self.mints.is_empty() || self.pair_creations.is_empty() {
            return Vec::new();
        }
        let mut mints: HashMap<(Address, Option<ProtocolId>), Vec<&MintRecord>> = HashMap::new();
        for m in &self.mints {
            mints.entry((m.pair, m.protocol)).or_default().push(m);
        }

        let mut seen: HashMap<(Address, Option<ProtocolId>), usize> = HashMap::new();
        let mut linked = Vec::new();
        for creation in &self.pair_creations {
            let key = (creation.pair, Some(creation.protocol));
            let i = seen.entry(key).or_insert(0);
            let Some(mint) = mints.get(&key).and_then(|v| v.get(*i)) else {
                continue;
            };
            *i += 1;
            if let Some(pair) = self.pairs.iter_mut().find(|p| p.address == creation.pair) {
                pair.set_init_reserves_wire(mint.amount0, mint.amount1);
                linked.push(pair.clone());
            }
        }
        linked
    }
}

/// Last update per pool wins (highest log index); output is ordered by address.
pub fn merge_pool_updates(updates: impl IntoIterator<Item = PoolUpdate>) -> Vec<PoolUpdate> {
    let mut latest: BTreeMap<Address, PoolUpdate> = BTreeMap::new();
    for u in updates {
        match latest.get(&u.address) {
            Some(existing) if existing.log_index >= u.log_index => {}
            _ => {
                latest.insert(u.address, u);
            }
        }
    }
    latest.into_values().collect()
}

#[derive(Debug, Clone)]
pub struct BlockResult {
    pub height: u64,
    pub timestamp: u64,
    pub block_time: DateTime<Utc>,
    pub native_price: Decimal,
    pub tx_results: Vec<TxResult>,
}

impl Sequenced for BlockResult {
    fn sequence(&self) -> u64 {
        self.height
    }
}

impl BlockResult {
    pub fn new(height: u64, timestamp: u64, block_time: DateTime<Utc>, native_price: Decimal) -> Self {
        Self { height, timestamp, block_time, native_price, tx_results: Vec::new() }
    }

    pub fn add_tx_result(&mut self, tx: TxResult) {
        self.tx_results.push(tx);
    }

    pub fn tx_count(&self) -> usize {
        self.tx_results.iter().map(|t| t.trades.len()).sum()
    }

    /// Flattens every tx result. New pairs and tokens are deduplicated by
    /// address, first occurrence kept.
    pub fn to_message(&self, chain_id: u64) -> BlockMessage {
        let mut txs = Vec::new();
        let mut migrated_pools = Vec::new();
        let mut actions = Vec::new();
        let mut new_tokens = Vec::new();
        let mut new_pairs = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut seen_pairs = HashSet::new();

        for tx in &self.tx_results {
            txs.extend(tx.trades.iter().cloned());
            migrated_pools.extend(tx.migrated_pools.iter().cloned());
            actions.extend(tx.actions.iter().cloned());
            for token in &tx.tokens {
                if seen_tokens.insert(token.address) {
                    new_tokens.push(TokenRow::from_token(token, chain_id));
                }
            }
            for pair in &tx.pairs {
                if seen_pairs.insert(pair.address) {
                    new_pairs.push(PairRow::from_pair(pair, chain_id));
                }
            }
        }

        let pool_updates = merge_pool_updates(self.tx_results.iter().flat_map(|tx| tx.pool_updates.iter().cloned()));
        BlockMessage {
            height: self.height,
            timestamp: self.timestamp,
            native_token_price: self.native_price.normalize().to_string(),
            txs,
            migrated_pools,
            actions,
            new_tokens,
            new_pairs,
            pool_updates,
        }
    }
}

/// What downstream consumers receive per committed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMessage {
    pub height: u64,
    pub timestamp: u64,
    pub native_token_price: String,
    pub txs: Vec<TxRow>,
    pub migrated_pools: Vec<MigratedPool>,
    pub actions: Vec<ActionRow>,
    pub new_tokens: Vec<TokenRow>,
    pub new_pairs: Vec<PairRow>,
    pub pool_updates: Vec<PoolUpdate>,
}

impl BlockMessage {
    /// Anything besides pool updates worth logging.
    pub fn useful_info(&self) -> bool {
        !self.txs.is_empty()
            || !self.migrated_pools.is_empty()
            || !self.actions.is_empty()
            || !self.new_tokens.is_empty()
            || !self.new_pairs.is_empty()
    }
}

pub fn migration_action(creation: &PairCreation, maker: Address, block: u64, block_at: DateTime<Utc>) -> ActionRow {
    ActionRow {
        maker: fmt_address(&maker),
        token: fmt_address(&creation.token),
        pair: fmt_address(&creation.pair),
        action: format!("on-{}", creation.protocol.slug()),
        tx_hash: fmt_hash(&creation.tx_hash),
        creator: fmt_address(&maker),
        block,
        block_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(addr: u8, log_index: u64, amount: i64) -> PoolUpdate {
        PoolUpdate {
            log_index,
            address: Address::repeat_byte(addr),
            token0: Address::ZERO,
            token1: Address::ZERO,
            amount0: Decimal::from(amount),
            amount1: Decimal::ZERO,
        }
    }

    #[test]
    fn test_merge_keeps_highest_log_index() {
        let merged = merge_pool_updates(vec![update(2, 5, 50), update(1, 3, 30), update(2, 1, 10), update(1, 7, 70)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].address, Address::repeat_byte(1));
        assert_eq!(merged[0].log_index, 7);
        assert_eq!(merged[1].log_index, 5);
        assert_eq!(merged[1].amount0, Decimal::from(50));
    }

    #[test]
    fn test_link_ith_creation_to_ith_mint() {
        let pair_addr = Address::repeat_byte(0x33);
        let mut tx = TxResult::new(Address::ZERO);
        let mut pair = Pair::new(pair_addr, Address::repeat_byte(1), Address::repeat_byte(2));
        pair.tokens_reversed = true;
        tx.add_pair(pair);
        tx.pair_creations.push(PairCreation {
            pair: pair_addr,
            protocol: ProtocolId::UniswapV2,
            token: Address::repeat_byte(2),
            tx_hash: B256::ZERO,
            log_index: 0,
        });
        // mint on another protocol must not link
        tx.mints.push(MintRecord { pair: pair_addr, protocol: Some(ProtocolId::UniswapV3), amount0: U256::from(9u8), amount1: U256::from(9u8) });
        tx.mints.push(MintRecord { pair: pair_addr, protocol: Some(ProtocolId::UniswapV2), amount0: U256::from(100u8), amount1: U256::from(7u8) });

        let linked = tx.link_pair_creations();
        assert_eq!(linked.len(), 1);
        assert_eq!(tx.pairs[0].init_reserve0, U256::from(7u8));
        assert_eq!(tx.pairs[0].init_reserve1, U256::from(100u8));
    }

    #[test]
    fn test_message_dedup_and_useful_info() {
        let mut block = BlockResult::new(10, 1_700_000_000, Utc::now(), Decimal::from(2000));
        let pool_only = {
            let mut tx = TxResult::new(Address::ZERO);
            tx.add_pool_update(update(1, 0, 1));
            tx
        };
        block.add_tx_result(pool_only);
        let msg = block.to_message(1);
        assert!(!msg.useful_info());
        assert_eq!(msg.native_token_price, "2000");

        let token = Token { address: Address::repeat_byte(4), symbol: "T".into(), ..Token::default() };
        for _ in 0..2 {
            let mut tx = TxResult::new(Address::ZERO);
            tx.add_token(token.clone());
            tx.add_pair(Pair::new(Address::repeat_byte(5), token.address, Address::ZERO));
            block.add_tx_result(tx);
        }
        let msg = block.to_message(1);
        assert!(msg.useful_info());
        assert_eq!(msg.new_tokens.len(), 1);
        assert_eq!(msg.new_pairs.len(), 1);
    }

    #[test]
    fn test_message_json_shape() {
        let block = BlockResult::new(7, 1, Utc::now(), Decimal::ONE);
        let json = serde_json::to_value(block.to_message(1)).unwrap();
        assert!(json.get("nativeTokenPrice").is_some());
        assert!(json.get("migratedPools").is_some());
        assert!(json.get("poolUpdates").is_some());
    }

    #[test]
    fn test_migration_action_name() {
        let creation = PairCreation {
            pair: Address::repeat_byte(1),
            protocol: ProtocolId::UniswapV2,
            token: Address::repeat_byte(2),
            tx_hash: B256::ZERO,
            log_index: 0,
        };
        let action = migration_action(&creation, Address::repeat_byte(3), 5, Utc::now());
        assert_eq!(action.action, "on-uniswap-v2");
        assert_eq!(action.maker, action.creator);
    }
}
