//! Session-scoped GPU memory budget.

/// Byte counter decremented as merge decisions commit.
///
/// The counter may go negative while mandatory allocations are charged; the
/// planner turns that into [`crate::MergeError::PlannerInfeasible`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMemoryBudget {
    initial: u64,
    remaining: i64,
}

impl GpuMemoryBudget {
    pub fn new(bytes: u64) -> Self {
        Self {
            initial: bytes,
            remaining: i64::try_from(bytes).unwrap_or(i64::MAX),
        }
    }

    pub fn initial(&self) -> u64 {
        self.initial
    }

    /// Signed remaining bytes.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    /// Remaining bytes clamped at zero.
    pub fn available(&self) -> u64 {
        self.remaining.max(0) as u64
    }

    /// Bytes charged so far.
    pub fn spent(&self) -> u64 {
        (self.initial as i128 - self.remaining as i128).max(0) as u64
    }

    pub fn is_overdrawn(&self) -> bool {
        self.remaining < 0
    }

    pub fn charge(&mut self, bytes: u64) {
        self.remaining = self
            .remaining
            .saturating_sub(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    /// Split into static per-file slices proportional to `file_bytes`.
    ///
    /// Each slice is the floor of its proportional share; the rounding
    /// remainder goes to the largest file. With no mesh bytes at all the
    /// whole budget goes to file 0.
    pub fn split(&self, file_bytes: &[u64]) -> Vec<GpuMemoryBudget> {
        let total: u128 = file_bytes.iter().map(|&b| b as u128).sum();
        if file_bytes.is_empty() {
            return Vec::new();
        }
        if total == 0 {
            let mut slices = vec![GpuMemoryBudget::new(0); file_bytes.len()];
            slices[0] = GpuMemoryBudget::new(self.available());
            return slices;
        }

        let available = self.available() as u128;
        let mut shares: Vec<u64> = file_bytes
            .iter()
            .map(|&b| (available * b as u128 / total) as u64)
            .collect();

        let assigned: u64 = shares.iter().sum();
        let largest = file_bytes
            .iter()
            .enumerate()
            .max_by_key(|(i, b)| (**b, std::cmp::Reverse(*i)))
            .map_or(0, |(i, _)| i);
        shares[largest] += self.available() - assigned;

        shares.into_iter().map(GpuMemoryBudget::new).collect()
    }
}
