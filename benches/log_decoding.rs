//! Log decoding benchmarks
//!
//! - topic lookup, hit and miss
//! - full decode of a V2 swap and a V3 swap
//! - a receipt-sized batch of mixed logs
//!
//! Run with: cargo bench --bench log_decoding

use std::hint::black_box;

use alloy_primitives::{address, Address, Bytes, B256, U256};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use evm_dex_indexer::config::Deployments;
use evm_dex_indexer::core::BaseTokens;
use evm_dex_indexer::logs::utils::{encode_address, encode_u256, event_topic};
use evm_dex_indexer::logs::{uniswap_v2, uniswap_v3, TopicRegistry};
use evm_dex_indexer::rpc::Log;

const WETH: Address = address!("4200000000000000000000000000000000000006");
const POOL: Address = address!("00000000000000000000000000000000000000c3");
const TRADER: Address = address!("00000000000000000000000000000000000000d4");

fn registry() -> TopicRegistry {
    let deployments = Deployments {
        uniswap_v2: vec![address!("0000000000000000000000000000000000000f02")],
        uniswap_v3: vec![address!("0000000000000000000000000000000000000f03")],
        xlaunch: vec![address!("0000000000000000000000000000000000000f04")],
    };
    let bases = BaseTokens { wrapped_native: WETH, stablecoins: Vec::new(), native_symbol: "ETH".into(), native_decimals: 18 };
    TopicRegistry::new(&deployments, bases)
}

fn words(values: &[U256]) -> Bytes {
    values.iter().flat_map(|v| encode_u256(*v)).collect::<Vec<u8>>().into()
}

fn trader_topic() -> B256 {
    B256::from(encode_address(&TRADER))
}

fn v2_swap() -> Log {
    Log {
        address: POOL,
        topics: vec![event_topic(uniswap_v2::signatures::SWAP), trader_topic(), trader_topic()],
        data: words(&[U256::from(10u64).pow(U256::from(18u8)), U256::ZERO, U256::ZERO, U256::from(123_456_789u64)]),
        ..Log::default()
    }
}

fn v3_swap() -> Log {
    // 负数 = 池子流出
    let out = U256::MAX - U256::from(999u64);
    Log {
        address: POOL,
        topics: vec![event_topic(uniswap_v3::signatures::SWAP), trader_topic(), trader_topic()],
        data: words(&[U256::from(1000u64), out, U256::from(1u128 << 96), U256::from(1_000_000u64), U256::from(42u8)]),
        ..Log::default()
    }
}

fn v2_sync() -> Log {
    Log {
        address: POOL,
        topics: vec![event_topic(uniswap_v2::signatures::SYNC)],
        data: words(&[U256::from(5_000_000u64), U256::from(2_000u64)]),
        ..Log::default()
    }
}

fn transfer() -> Log {
    Log {
        address: POOL,
        topics: vec![event_topic("Transfer(address,address,uint256)"), trader_topic(), trader_topic()],
        data: words(&[U256::from(1u8)]),
        ..Log::default()
    }
}

fn bench_topic_lookup(c: &mut Criterion) {
    let registry = registry();
    let hit = event_topic(uniswap_v2::signatures::SWAP);
    let miss = event_topic("Transfer(address,address,uint256)");

    let mut group = c.benchmark_group("Topic Lookup");
    group.bench_function("hit", |b| b.iter(|| black_box(registry.lookup(black_box(&hit)).is_some())));
    group.bench_function("miss", |b| b.iter(|| black_box(registry.lookup(black_box(&miss)).is_none())));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("Decode");
    for (name, log) in [("v2_swap", v2_swap()), ("v3_swap", v3_swap()), ("v2_sync", v2_sync())] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &log, |b, log| {
            b.iter(|| black_box(registry.parse(black_box(log))))
        });
    }
    group.finish();
}

fn bench_receipt_batch(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("Receipt Batch");
    for size in [4usize, 16, 64] {
        let logs: Vec<Log> = (0..size)
            .map(|i| match i % 4 {
                0 => v2_swap(),
                1 => v2_sync(),
                2 => v3_swap(),
                _ => transfer(),
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("mixed", size), &logs, |b, logs| {
            b.iter(|| logs.iter().filter(|log| registry.parse(log).is_ok()).count())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_topic_lookup, bench_decode, bench_receipt_batch);
criterion_main!(benches);
