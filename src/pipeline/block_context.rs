use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;

use super::PipelineError;
use crate::rpc::{Block, Receipt};
use crate::sequencer::Sequenced;

/// One fetched block: body, receipts in tx order, and lazily resolved senders.
#[derive(Debug)]
pub struct BlockContext {
    pub block: Block,
    pub receipts: Vec<Receipt>,
    senders: Vec<OnceCell<Address>>,
}

impl BlockContext {
    pub fn new(block: Block, mut receipts: Vec<Receipt>) -> Self {
        receipts.sort_by_key(|r| r.transaction_index);
        let senders = (0..block.transactions.len()).map(|_| OnceCell::new()).collect();
        Self { block, receipts, senders }
    }

    pub fn height(&self) -> u64 {
        self.block.number
    }

    pub fn timestamp(&self) -> u64 {
        self.block.timestamp
    }

    pub fn block_time(&self) -> DateTime<Utc> {
        i64::try_from(self.block.timestamp)
            .ok()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_default()
    }

    pub fn tx_count(&self) -> usize {
        self.block.transactions.len()
    }

    /// Sender of the tx at `tx_index`, resolved once and cached.
    pub fn sender(&self, tx_index: u64) -> Result<Address, PipelineError> {
        let out_of_range = || PipelineError::TxIndexOutOfRange { index: tx_index, len: self.tx_count() };
        let i = usize::try_from(tx_index).map_err(|_| out_of_range())?;
        let cell = self.senders.get(i).ok_or_else(out_of_range)?;
        cell.get_or_try_init(|| {
            // 节点返回的交易一般按序排列，否则按 index 查找
            let txs = &self.block.transactions;
            match txs.get(i) {
                Some(tx) if tx.transaction_index.map_or(true, |idx| idx == tx_index) => Ok(tx.from),
                _ => txs
                    .iter()
                    .find(|tx| tx.transaction_index == Some(tx_index))
                    .map(|tx| tx.from)
                    .ok_or_else(out_of_range),
            }
        })
        .copied()
    }
}

impl Sequenced for BlockContext {
    fn sequence(&self) -> u64 {
        self.block.number
    }
}
