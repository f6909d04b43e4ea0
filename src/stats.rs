//! Counters collected while planning and assembling a load.

use log::info;

/// Summary of one load, or of one file in the parallel mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub nodes: u64,
    pub files: u64,
    /// One draw call per node without merging.
    pub draw_calls_before: u64,
    /// Drawables actually emitted.
    pub draw_calls_after: u64,
    pub chains: u64,
    pub cheap_merges: u64,
    pub knapsack_merges: u64,
    pub rejected_chains: u64,
    pub instanced_groups: u64,
    /// Nodes skipped because their indices failed to decode.
    pub dropped_nodes: u64,
    /// Bytes of every distinct mesh, unmerged.
    pub baseline_bytes: u64,
    /// Extra bytes spent on committed merges.
    pub merge_bytes: u64,
    pub budget_initial: u64,
    pub budget_remaining: i64,
    pub vertex_arena_bytes: u64,
    pub index_arena_bytes: u64,
}

impl MergeStats {
    /// Accumulate another file's counters.
    pub fn merge(&mut self, other: &MergeStats) {
        self.nodes += other.nodes;
        self.files += other.files;
        self.draw_calls_before += other.draw_calls_before;
        self.draw_calls_after += other.draw_calls_after;
        self.chains += other.chains;
        self.cheap_merges += other.cheap_merges;
        self.knapsack_merges += other.knapsack_merges;
        self.rejected_chains += other.rejected_chains;
        self.instanced_groups += other.instanced_groups;
        self.dropped_nodes += other.dropped_nodes;
        self.baseline_bytes += other.baseline_bytes;
        self.merge_bytes += other.merge_bytes;
        self.budget_initial += other.budget_initial;
        self.budget_remaining += other.budget_remaining;
        self.vertex_arena_bytes += other.vertex_arena_bytes;
        self.index_arena_bytes += other.index_arena_bytes;
    }

    /// Fold one file's assembly counters into planning counters.
    pub fn with_assembly(mut self, assembly: &MergeStats) -> Self {
        self.files += assembly.files;
        self.draw_calls_after = assembly.draw_calls_after;
        self.dropped_nodes += assembly.dropped_nodes;
        self.vertex_arena_bytes += assembly.vertex_arena_bytes;
        self.index_arena_bytes += assembly.index_arena_bytes;
        self
    }

    pub fn committed_merges(&self) -> u64 {
        self.cheap_merges + self.knapsack_merges
    }

    pub fn log_summary(&self) {
        info!(
            "merge: {} nodes in {} files, draw calls {} -> {}",
            self.nodes, self.files, self.draw_calls_before, self.draw_calls_after
        );
        info!(
            "merge: {} chains ({} cheap, {} knapsack, {} rejected, {} instanced), {} nodes dropped",
            self.chains,
            self.cheap_merges,
            self.knapsack_merges,
            self.rejected_chains,
            self.instanced_groups,
            self.dropped_nodes
        );
        info!(
            "merge: baseline {} bytes, merges +{} bytes, budget {} of {} left",
            self.baseline_bytes, self.merge_bytes, self.budget_remaining, self.budget_initial
        );
    }
}
