use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use kestrel_protocol::crypto::{Address, KestrelKeypair, MAIN_TOKEN};
use kestrel_protocol::mempool::{ChainView, Mempool, MempoolConfig, Queue};
use kestrel_protocol::message::{Message, MessageBuilder};

/// Every sender at nonce zero.
struct FreshChain;

impl ChainView for FreshChain {
    fn nonce(&self, _address: &Address) -> Option<u64> {
        Some(0)
    }

    fn height(&self) -> u64 {
        0
    }
}

fn message(seed: u8, nonce: u64, fee: u64) -> Message {
    MessageBuilder::transfer(Address([0xAA; 32]), MAIN_TOKEN, 1)
        .nonce(nonce)
        .fee(fee)
        .sign(&KestrelKeypair::from_seed(&[seed; 32]))
}

fn submissions() -> impl Strategy<Value = Vec<(u8, u64, u64)>> {
    prop::collection::vec((1u8..8, 1u64..4, 0u64..100), 1..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Packaging walks Ready in fee order and never repeats a sender.
    #[test]
    fn packaged_fees_never_increase(subs in submissions()) {
        let pool = Mempool::default();
        for (seed, nonce, fee) in subs {
            let _ = pool.put(message(seed, nonce, fee), &FreshChain);
        }

        let batch = pool.need_packaged(usize::MAX);
        prop_assert_eq!(batch.len(), pool.ready_len());
        for pair in batch.windows(2) {
            prop_assert!(pair[0].fee >= pair[1].fee);
        }
        let senders: HashSet<Address> = batch.iter().map(|m| m.from).collect();
        prop_assert_eq!(senders.len(), batch.len());
        prop_assert!(batch.iter().all(|m| m.nonce == 1));
    }

    /// Each queue holds at most one message per sender, and the pool never
    /// exceeds its configured size.
    #[test]
    fn one_slot_per_sender_per_queue(subs in submissions(), max_size in 1usize..12) {
        let pool = Mempool::new(MempoolConfig {
            max_size,
            ..MempoolConfig::default()
        });
        let mut sent = Vec::new();
        for (seed, nonce, fee) in subs {
            let msg = message(seed, nonce, fee);
            if pool.put(msg.clone(), &FreshChain).is_ok() {
                sent.push(msg);
            }
        }

        prop_assert!(pool.len() <= max_size);
        prop_assert_eq!(pool.len(), pool.ready_len() + pool.cache_len());

        let mut per_queue: HashMap<(Address, Queue), usize> = HashMap::new();
        for msg in &sent {
            if let Some(queue) = pool.queue_of(&msg.hash) {
                *per_queue.entry((msg.from, queue)).or_default() += 1;
            }
        }
        prop_assert!(per_queue.values().all(|&n| n == 1));
    }

    /// A byte budget only ever trims the fee-ordered batch.
    #[test]
    fn byte_budget_keeps_fee_order(subs in submissions(), budget in 0usize..4096) {
        let pool = Mempool::default();
        for (seed, nonce, fee) in subs {
            let _ = pool.put(message(seed, nonce, fee), &FreshChain);
        }

        let batch = pool.need_packaged(budget);
        let used: usize = batch.iter().map(|m| m.size_bytes()).sum();
        prop_assert!(used <= budget);
        for pair in batch.windows(2) {
            prop_assert!(pair[0].fee >= pair[1].fee);
        }
    }
}
