//! ABI 字节读取工具
//!
//! Offset-based readers over 32-byte ABI words. Every reader returns `None`
//! when the slice is too short instead of panicking.

use alloy_primitives::{keccak256, Address, B256, I256, U256};

pub const WORD: usize = 32;

/// keccak256 of an event signature, e.g. `Sync(uint112,uint112)`.
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// First four bytes of keccak256 of a method signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

#[inline]
pub fn read_word(data: &[u8], offset: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(WORD)?)
}

#[inline]
pub fn read_u256(data: &[u8], offset: usize) -> Option<U256> {
    read_word(data, offset).map(U256::from_be_slice)
}

#[inline]
pub fn read_i256(data: &[u8], offset: usize) -> Option<I256> {
    read_u256(data, offset).map(I256::from_raw)
}

/// Address right-aligned in a word. The upper 12 bytes are not checked.
#[inline]
pub fn read_address(data: &[u8], offset: usize) -> Option<Address> {
    read_word(data, offset).map(|w| Address::from_slice(&w[12..]))
}

/// Strict bool: only 0 or 1 is accepted.
#[inline]
pub fn read_bool(data: &[u8], offset: usize) -> Option<bool> {
    let v = read_u256(data, offset)?;
    if v.is_zero() {
        Some(false)
    } else if v == U256::from(1u8) {
        Some(true)
    } else {
        None
    }
}

fn read_usize(data: &[u8], offset: usize) -> Option<usize> {
    let v = read_u256(data, offset)?;
    if v > U256::from(u32::MAX) {
        return None;
    }
    Some(v.to::<u64>() as usize)
}

/// Dynamic `bytes`/`string` whose head word at `head` holds the tail offset.
pub fn read_dynamic_bytes(data: &[u8], head: usize) -> Option<&[u8]> {
    let offset = read_usize(data, head)?;
    let len = read_usize(data, offset)?;
    let start = offset.checked_add(WORD)?;
    data.get(start..start.checked_add(len)?)
}

#[inline]
pub fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

pub fn encode_address(a: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(a.as_slice());
    word
}

pub fn encode_u256(v: U256) -> [u8; WORD] {
    v.to_be_bytes::<WORD>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_topics() {
        assert_eq!(
            event_topic("Transfer(address,address,uint256)").to_string(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
        assert_eq!(
            event_topic("Sync(uint112,uint112)").to_string(),
            "0x1c411e9a96e071241c2f21f7726b17ae89e3cab4c78be50e062b03a9fffbbad1"
        );
    }

    #[test]
    fn test_selector() {
        assert_eq!(selector("decimals()"), [0x31, 0x3c, 0xe5, 0x67]);
        assert_eq!(selector("token0()"), [0x0d, 0xfe, 0x16, 0x81]);
    }

    #[test]
    fn test_readers() {
        let addr = Address::repeat_byte(0x42);
        let mut data = Vec::new();
        data.extend_from_slice(&encode_address(&addr));
        data.extend_from_slice(&encode_u256(U256::from(1u8)));
        data.extend_from_slice(&encode_u256(U256::from(2u8)));

        assert_eq!(read_address(&data, 0), Some(addr));
        assert_eq!(read_bool(&data, 32), Some(true));
        assert_eq!(read_bool(&data, 64), None);
        assert_eq!(read_u256(&data, 64), Some(U256::from(2u8)));
        assert_eq!(read_u256(&data, 65), None);
        assert_eq!(read_i256(&encode_u256(U256::MAX), 0), Some(I256::MINUS_ONE));
    }

    #[test]
    fn test_dynamic_bytes() {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_u256(U256::from(32u8)));
        data.extend_from_slice(&encode_u256(U256::from(3u8)));
        let mut tail = [0u8; WORD];
        tail[..3].copy_from_slice(b"abc");
        data.extend_from_slice(&tail);
        assert_eq!(read_dynamic_bytes(&data, 0), Some(&b"abc"[..]));

        // 越界偏移
        let bad = encode_u256(U256::from(4096u32));
        assert_eq!(read_dynamic_bytes(&bad, 0), None);
    }
}
