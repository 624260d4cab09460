//! Block reward schedule.
//!
//! Half of the reward is flat; the other half is weighted by the share of
//! work the producer reported in the previous cycle. With no reported work
//! at all the producer gets the full reward.

/// Reward for a producer that reported `producer` of `total` work units.
pub fn cal_coinbase(block_reward: u64, total: u64, producer: u64) -> u64 {
    if total == 0 {
        return block_reward;
    }
    let half = block_reward / 2;
    let share = (half as u128 * producer.min(total) as u128) / total as u128;
    // share <= half, so the sum fits.
    half + share as u64
}

/// Reward actually minted once the supply cap is applied.
pub fn minted(reward: u64, circulation: u64, total_circulation: u64) -> u64 {
    reward.min(total_circulation.saturating_sub(circulation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_work_pays_the_full_reward() {
        assert_eq!(cal_coinbase(1_000, 0, 0), 1_000);
        assert_eq!(cal_coinbase(1_000, 0, 50), 1_000);
    }

    #[test]
    fn reward_scales_with_work_share() {
        assert_eq!(cal_coinbase(1_000, 100, 0), 500);
        assert_eq!(cal_coinbase(1_000, 100, 50), 750);
        assert_eq!(cal_coinbase(1_000, 100, 100), 1_000);
    }

    #[test]
    fn large_values_do_not_overflow() {
        assert_eq!(cal_coinbase(u64::MAX, u64::MAX, u64::MAX), u64::MAX / 2 * 2);
        assert_eq!(cal_coinbase(u64::MAX, 3, 1), u64::MAX / 2 + u64::MAX / 2 / 3);
    }

    #[test]
    fn supply_cap_limits_minting() {
        assert_eq!(minted(100, 0, 1_000), 100);
        assert_eq!(minted(100, 950, 1_000), 50);
        assert_eq!(minted(100, 1_000, 1_000), 0);
    }
}
