// Election and block-assembly benchmarks for the Kestrel protocol.
//
// Covers candidate ranking and the seeded shuffle, message-root hashing,
// and fee-ordered packaging out of a full mempool.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kestrel_protocol::consensus::election::{rank, shuffle, shuffle_seed};
use kestrel_protocol::consensus::Member;
use kestrel_protocol::crypto::{Address, KestrelKeypair, MAIN_TOKEN};
use kestrel_protocol::mempool::{ChainView, Mempool, MempoolConfig};
use kestrel_protocol::message::{Message, MessageBuilder};
use kestrel_protocol::storage::compute_msg_root;

struct FreshChain;

impl ChainView for FreshChain {
    fn nonce(&self, _address: &Address) -> Option<u64> {
        Some(0)
    }

    fn height(&self) -> u64 {
        0
    }
}

fn candidates(n: usize) -> Vec<Member> {
    (0..n)
        .map(|i| {
            let mut signer = [0u8; 32];
            signer[..8].copy_from_slice(&(i as u64).to_be_bytes());
            Member {
                signer: Address(signer),
                peer_id: format!("peer-{i}"),
                weight: (i as u64 * 7_919) % 1_000,
            }
        })
        .collect()
}

fn transfers(n: usize) -> Vec<Message> {
    (0..n)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[..8].copy_from_slice(&(i as u64).to_le_bytes());
            MessageBuilder::transfer(Address([0xAA; 32]), MAIN_TOKEN, 1)
                .nonce(1)
                .fee((i as u64 * 31) % 97)
                .sign(&KestrelKeypair::from_seed(&seed))
        })
        .collect()
}

fn bench_election(c: &mut Criterion) {
    let mut group = c.benchmark_group("election/rank_and_shuffle");
    for n in [21usize, 101, 1_001] {
        let members = candidates(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &members, |b, members| {
            b.iter(|| {
                let mut supers = rank(members.clone(), 21);
                shuffle(&mut supers, shuffle_seed(&[7u8; 32], 42));
                supers
            });
        });
    }
    group.finish();
}

fn bench_msg_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("block/msg_root");
    for n in [10usize, 100, 1_000] {
        let messages = transfers(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &messages, |b, msgs| {
            b.iter(|| compute_msg_root(msgs));
        });
    }
    group.finish();
}

fn bench_need_packaged(c: &mut Criterion) {
    let pool = Mempool::new(MempoolConfig::default());
    for msg in transfers(2_000) {
        let _ = pool.put(msg, &FreshChain);
    }

    c.bench_function("mempool/need_packaged_2000", |b| {
        b.iter(|| pool.need_packaged(1 << 20));
    });
}

criterion_group!(benches, bench_election, bench_msg_root, bench_need_packaged);
criterion_main!(benches);
