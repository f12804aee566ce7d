//! Schema-driven log unpacking: validates topic count and data layout, then
//! decodes the data words into typed values.

use alloy_primitives::{Address, I256, U256};
use smallvec::SmallVec;

use super::utils::{read_address, read_bool, read_dynamic_bytes, read_i256, read_u256, WORD};
use super::DecodeError;
use crate::common::clean_string;
use crate::rpc::Log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiKind {
    Address,
    Uint,
    Int,
    Bool,
    /// Dynamic string.
    String,
}

impl AbiKind {
    fn is_dynamic(self) -> bool {
        matches!(self, AbiKind::String)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Int(I256),
    Bool(bool),
    String(String),
}

impl AbiValue {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            AbiValue::Address(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_u256(&self) -> Option<U256> {
        match self {
            AbiValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i256(&self) -> Option<I256> {
        match self {
            AbiValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbiValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AbiValue::String(s) => Some(s),
            _ => None,
        }
    }
}

pub type Values = SmallVec<[AbiValue; 8]>;

/// Expected layout of one event: total topic count (signature included) and
/// the non-indexed fields in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogUnpacker {
    pub topic_len: usize,
    pub data: &'static [AbiKind],
}

impl LogUnpacker {
    pub const fn new(topic_len: usize, data: &'static [AbiKind]) -> Self {
        Self { topic_len, data }
    }

    pub fn unpack(&self, log: &Log) -> Result<Values, DecodeError> {
        if log.topics.len() != self.topic_len {
            return Err(DecodeError::WrongTopicLen { expected: self.topic_len, actual: log.topics.len() });
        }

        let data = log.data.as_ref();
        let head = self.data.len() * WORD;
        let dynamic = self.data.iter().any(|k| k.is_dynamic());
        if data.len() < head || (!dynamic && data.len() != head) {
            return Err(DecodeError::WrongDataLen { expected: head, actual: data.len() });
        }

        let mut values = Values::new();
        for (i, kind) in self.data.iter().enumerate() {
            let offset = i * WORD;
            let value = match kind {
                AbiKind::Address => read_address(data, offset).map(AbiValue::Address),
                AbiKind::Uint => read_u256(data, offset).map(AbiValue::Uint),
                AbiKind::Int => read_i256(data, offset).map(AbiValue::Int),
                AbiKind::Bool => read_bool(data, offset).map(AbiValue::Bool),
                AbiKind::String => read_dynamic_bytes(data, offset).map(|b| AbiValue::String(clean_string(b))),
            };
            values.push(value.ok_or(DecodeError::Abi { index: i, kind: *kind })?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::utils::{encode_u256, event_topic};
    use alloy_primitives::Bytes;

    const SYNC: LogUnpacker = LogUnpacker::new(1, &[AbiKind::Uint, AbiKind::Uint]);
    const NAMED: LogUnpacker = LogUnpacker::new(1, &[AbiKind::Uint, AbiKind::String]);

    fn log(topics: usize, data: Vec<u8>) -> Log {
        Log {
            topics: (0..topics).map(|_| event_topic("Sync(uint112,uint112)")).collect(),
            data: Bytes::from(data),
            ..Log::default()
        }
    }

    fn words(vals: &[u64]) -> Vec<u8> {
        vals.iter().flat_map(|v| encode_u256(U256::from(*v))).collect()
    }

    #[test]
    fn test_unpack_static() {
        let values = SYNC.unpack(&log(1, words(&[5, 6]))).unwrap();
        assert_eq!(values[0].as_u256(), Some(U256::from(5u8)));
        assert_eq!(values[1].as_u256(), Some(U256::from(6u8)));
        assert_eq!(values[1].as_address(), None);
    }

    #[test]
    fn test_wrong_topic_len() {
        let err = SYNC.unpack(&log(2, words(&[5, 6]))).unwrap_err();
        assert_eq!(err, DecodeError::WrongTopicLen { expected: 1, actual: 2 });
    }

    #[test]
    fn test_static_layout_requires_exact_length() {
        assert_eq!(SYNC.unpack(&log(1, words(&[5]))).unwrap_err(), DecodeError::WrongDataLen { expected: 64, actual: 32 });
        assert_eq!(SYNC.unpack(&log(1, words(&[5, 6, 7]))).unwrap_err(), DecodeError::WrongDataLen { expected: 64, actual: 96 });
    }

    #[test]
    fn test_unpack_dynamic_string() {
        let mut data = words(&[9, 64, 4]);
        let mut tail = [0u8; 32];
        tail[..4].copy_from_slice(b"MEME");
        data.extend_from_slice(&tail);
        let values = NAMED.unpack(&log(1, data)).unwrap();
        assert_eq!(values[1].as_str(), Some("MEME"));

        // 偏移指向数据之外
        let bad = words(&[9, 640]);
        assert!(matches!(NAMED.unpack(&log(1, bad)), Err(DecodeError::Abi { index: 1, .. })));
    }
}
