//! Bucket layout planner.

use super::types::BankRange;
use log::debug;

/// Partitions the bucket index space into contiguous per-bank ranges,
/// proportional to each bank's member count.
///
/// The split is deterministic: the same inputs always produce the same
/// layout, which warm-restart parity depends on. Buckets left over after
/// the proportional floor split are spread one per bank, lowest-numbered
/// banks first.
///
/// Example: bank 0 with 6 members, bank 1 with 3, 30 buckets total gives
/// bank 0 buckets 0-19 and bank 1 buckets 20-29.
pub fn calculate_bank_hash_bucket_ranges(
    members_per_bank: &[u32],
    total_buckets: u32,
) -> Vec<BankRange> {
    let total_members: u32 = members_per_bank.iter().sum();
    if total_members == 0 {
        return Vec::new();
    }

    let num_banks = members_per_bank.len() as u32;
    let buckets_per_nexthop = total_buckets / total_members;
    let mut extra_buckets = total_buckets - buckets_per_nexthop * total_members;
    let split_extra_among_banks = extra_buckets / num_banks;
    extra_buckets -= split_extra_among_banks * num_banks;

    let mut ranges = Vec::with_capacity(members_per_bank.len());
    let mut cursor = 0u32;

    for (bank, &members) in members_per_bank.iter().enumerate() {
        let mut size = buckets_per_nexthop * members + split_extra_among_banks;
        if extra_buckets > 0 {
            size += 1;
            extra_buckets -= 1;
        }

        let range = BankRange::new(cursor, size);
        debug!(
            "bucket layout: bank {}, start {}, size {}",
            bank, range.start_index, range.size
        );
        ranges.push(range);
        cursor += size;
    }

    ranges
}
