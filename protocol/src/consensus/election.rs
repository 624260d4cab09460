//! Cycle election: rank candidates by vote weight, keep the top
//! `super_size`, then shuffle with a seed every node derives from chain
//! history.
//!
//! ## Ranking
//!
//! Weight descending, then signer address ascending. The secondary key
//! keeps the order independent of how candidates happen to be enumerated.
//!
//! ## Shuffle
//!
//! ```text
//! seed = u32( u64_le(BLAKE3(pre_hash)[..8]) + cycle )
//! for i in (1..n).rev():
//!     j = u32_le(BLAKE3(seed_le || i_le)[..4]) mod (i + 1)
//!     swap(i, j)
//! ```

use std::collections::BTreeMap;

use crate::crypto::{blake3_hash, blake3_hash_multi, Address, Hash, MAIN_TOKEN};
use crate::status::{Member, Status, StatusResult};

/// Every registered candidate with its weight: the summed spendable
/// main-token balance of the accounts voting for it.
pub fn weigh_candidates(status: &Status, confirmed: u64) -> StatusResult<Vec<Member>> {
    let candidates = status.candidates()?;
    let mut weights: BTreeMap<Address, u64> = candidates.iter().map(|c| (c.signer, 0)).collect();

    for (voter, target) in status.votes()? {
        let Some(weight) = weights.get_mut(&target) else {
            continue;
        };
        let balance = status.spendable(&voter, &MAIN_TOKEN, confirmed)?;
        *weight = weight.saturating_add(balance);
    }

    Ok(candidates
        .into_iter()
        .map(|c| Member {
            weight: weights.get(&c.signer).copied().unwrap_or(0),
            signer: c.signer,
            peer_id: c.peer_id,
        })
        .collect())
}

/// Sort by weight descending, ties by signer ascending, and keep the first
/// `size`.
pub fn rank(mut members: Vec<Member>, size: usize) -> Vec<Member> {
    members.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.signer.cmp(&b.signer)));
    members.truncate(size);
    members
}

pub fn shuffle_seed(pre_hash: &Hash, cycle: u64) -> u32 {
    let digest = blake3_hash(pre_hash);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head).wrapping_add(cycle) as u32
}

/// Deterministic Fisher–Yates pass.
pub fn shuffle<T>(items: &mut [T], seed: u32) {
    let seed_bytes = seed.to_le_bytes();
    for i in (1..items.len()).rev() {
        let draw = blake3_hash_multi(&[&seed_bytes[..], &(i as u64).to_le_bytes()[..]]);
        let mut head = [0u8; 4];
        head.copy_from_slice(&draw[..4]);
        let j = u32::from_le_bytes(head) as usize % (i + 1);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(b: u8, weight: u64) -> Member {
        Member {
            signer: Address([b; 32]),
            peer_id: format!("peer-{b}"),
            weight,
        }
    }

    #[test]
    fn rank_orders_by_weight_then_address() {
        let ranked = rank(
            vec![member(3, 10), member(1, 10), member(2, 50), member(4, 0)],
            3,
        );
        let order: Vec<u8> = ranked.iter().map(|m| m.signer.0[0]).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn rank_ignores_input_order() {
        let a = rank(vec![member(1, 5), member(2, 5), member(3, 5)], 3);
        let b = rank(vec![member(3, 5), member(1, 5), member(2, 5)], 3);
        assert_eq!(a, b);
    }

    #[test]
    fn shuffle_is_a_deterministic_permutation() {
        let mut a: Vec<u32> = (0..9).collect();
        let mut b = a.clone();
        shuffle(&mut a, 1234);
        shuffle(&mut b, 1234);
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn seed_depends_on_cycle_and_hash() {
        let h = [7u8; 32];
        assert_eq!(shuffle_seed(&h, 3), shuffle_seed(&h, 3));
        assert_ne!(shuffle_seed(&h, 3), shuffle_seed(&h, 4));
        assert_ne!(shuffle_seed(&h, 3), shuffle_seed(&[8u8; 32], 3));
    }

    #[test]
    fn different_seeds_usually_reorder() {
        let base: Vec<u32> = (0..9).collect();
        let orders: std::collections::HashSet<Vec<u32>> = (0..16u32)
            .map(|seed| {
                let mut v = base.clone();
                shuffle(&mut v, seed);
                v
            })
            .collect();
        assert!(orders.len() > 1);
    }

    #[test]
    fn shuffle_handles_tiny_inputs() {
        let mut empty: Vec<u8> = Vec::new();
        shuffle(&mut empty, 1);
        let mut one = vec![42u8];
        shuffle(&mut one, 1);
        assert_eq!(one, vec![42]);
    }
}
