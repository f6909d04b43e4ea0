//! 0/1 knapsack over quantized merge costs.
//!
//! Costs are divided into buckets of `unit` bytes so the table stays small.
//! Weights round *up* and capacity rounds *down*, so any selection that fits
//! the quantized capacity also fits the real budget. The price is that a
//! selection within a few units of the budget may be missed.

use fixedbitset::FixedBitSet;
use log::debug;

/// Upper bound on the selection table, in bits.
const MAX_KEEP_BITS: u64 = 1 << 28;

/// One candidate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnapsackItem {
    /// Extra bytes the merge costs.
    pub cost: u64,
    /// Draw calls saved.
    pub value: u64,
}

/// Bucket size and bucket count used for a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantization {
    pub unit: u64,
    pub capacity: u64,
}

impl Quantization {
    /// Pick the smallest unit that is at least the cheapest nonzero cost and
    /// keeps the table within `max_buckets` and the bit-table bound.
    pub fn new(items: &[KnapsackItem], budget: u64, max_buckets: usize) -> Self {
        let min_cost = items
            .iter()
            .map(|i| i.cost)
            .filter(|&c| c > 0)
            .min()
            .unwrap_or(1);
        let max_buckets = (max_buckets as u64).max(1);
        let per_item_buckets = (MAX_KEEP_BITS / (items.len() as u64).max(1)).max(1);
        let buckets = max_buckets.min(per_item_buckets);

        let unit = min_cost.max(budget.div_ceil(buckets)).max(1);
        Self {
            unit,
            capacity: budget / unit,
        }
    }

    /// Quantized weight of `cost`.
    pub fn weight(&self, cost: u64) -> u64 {
        cost.div_ceil(self.unit)
    }
}

/// Choose items maximizing total value with total cost within `budget`.
///
/// Returns one flag per item. Ties keep the earlier, lighter selection so
/// the result is deterministic for a given item order.
pub fn solve(items: &[KnapsackItem], budget: u64, max_buckets: usize) -> Vec<bool> {
    let mut selected = vec![false; items.len()];
    if items.is_empty() {
        return selected;
    }
    let total: u128 = items.iter().map(|i| i.cost as u128).sum();
    if total <= budget as u128 {
        selected.fill(true);
        return selected;
    }

    let q = Quantization::new(items, budget, max_buckets);
    let capacity = q.capacity as usize;
    let width = capacity + 1;

    let mut best = vec![0u64; width];
    let mut keep = FixedBitSet::with_capacity(items.len() * width);

    for (i, item) in items.iter().enumerate() {
        let weight = q.weight(item.cost);
        if weight > q.capacity || item.value == 0 {
            continue;
        }
        let weight = weight as usize;
        for c in (weight..=capacity).rev() {
            let candidate = best[c - weight] + item.value;
            if candidate > best[c] {
                best[c] = candidate;
                keep.insert(i * width + c);
            }
        }
    }

    let mut c = capacity;
    for i in (0..items.len()).rev() {
        if keep.contains(i * width + c) {
            selected[i] = true;
            c -= q.weight(items[i].cost) as usize;
        }
    }

    debug!(
        "knapsack: {} items, unit {} bytes, {} buckets, value {}",
        items.len(),
        q.unit,
        q.capacity,
        best[capacity]
    );

    selected
}
