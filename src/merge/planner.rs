//! Budget-constrained choice of which chains merge.
//!
//! Planning runs in three passes over the grouping order:
//!
//! 1. Charge mandatory memory. Chains whose extra cost is below the cheap
//!    threshold commit immediately and charge their merged bytes. Every
//!    other chain, and every standalone node, charges the original bytes of
//!    meshes not charged yet. An overdrawn budget here is fatal.
//! 2. Solve a 0/1 knapsack over the remaining chains with whatever budget is
//!    left, unless everything fits anyway.
//! 3. Dissolve rejected chains back into standalone nodes, or keep them as
//!    instanced groups when instancing is on and they share one mesh.

use fixedbitset::FixedBitSet;
use log::debug;

use super::budget::GpuMemoryBudget;
use super::grouper::{GroupEntry, Grouping, MergeChain};
use super::knapsack::{self, KnapsackItem};
use super::node::NodeTable;
use crate::error::{MergeError, MergeResult};
use crate::scene::IndexWidth;
use crate::stats::MergeStats;
use crate::MergeConfig;

/// Outcome for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDecision {
    /// Awaiting the knapsack pass.
    Pending,
    /// Committed below the cheap threshold.
    Cheap,
    /// Committed by the knapsack.
    Knapsack,
    /// Dissolved into standalone nodes.
    Rejected,
    /// Rejected but drawn as instances of one shared mesh.
    Instanced,
}

impl ChainDecision {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Cheap | Self::Knapsack)
    }
}

/// Cost model and decision for one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPlan {
    pub head: u32,
    pub file_index: u16,
    pub length: u32,
    pub vertex_count: u64,
    pub merged_width: IndexWidth,
    /// Member vertex bytes plus indices at the merged width.
    pub merged_bytes: u64,
    /// Bytes of the distinct meshes the chain references.
    pub original_bytes: u64,
    /// `merged_bytes - original_bytes`, floored at zero.
    pub extra_cost: u64,
    pub benefit: u64,
    pub decision: ChainDecision,
    /// Distinct meshes, ascending.
    meshes: Vec<u32>,
}

impl ChainPlan {
    fn new(chain: &MergeChain, table: &NodeTable) -> Self {
        let merged_width = chain.merged_width();
        let mut meshes: Vec<u32> = table
            .chain(chain.head)
            .filter_map(|id| table.get(id).map(|r| r.mesh_index))
            .collect();
        meshes.sort_unstable();
        meshes.dedup();

        let original_bytes = meshes
            .iter()
            .filter_map(|&m| table.mesh(m))
            .map(|m| m.total_bytes())
            .sum();
        let merged_bytes = chain.vertex_bytes + chain.index_count * merged_width.bytes() as u64;

        Self {
            head: chain.head,
            file_index: chain.file_index,
            length: chain.length,
            vertex_count: chain.vertex_count,
            merged_width,
            merged_bytes,
            original_bytes,
            extra_cost: merged_bytes.saturating_sub(original_bytes),
            benefit: chain.benefit(),
            decision: ChainDecision::Pending,
            meshes,
        }
    }

    /// Whether every member draws the same mesh.
    pub fn single_mesh(&self) -> bool {
        self.meshes.len() == 1
    }
}

/// What the assembler emits for one position in planning order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Standalone { node: u32 },
    Merged { head: u32, index_width: IndexWidth },
    Instanced { head: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanItem {
    pub file_index: u16,
    pub kind: PlanKind,
}

/// Planner output, in merge-planning order.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub items: Vec<PlanItem>,
    pub chains: Vec<ChainPlan>,
    pub stats: MergeStats,
}

impl MergePlan {
    /// Items of one mesh-bin file, order preserved.
    pub fn items_for_file(&self, file_index: u16) -> Vec<PlanItem> {
        self.items
            .iter()
            .filter(|item| item.file_index == file_index)
            .copied()
            .collect()
    }

    /// Distinct file indices referenced, ascending.
    pub fn files(&self) -> Vec<u16> {
        let mut files: Vec<u16> = self.items.iter().map(|i| i.file_index).collect();
        files.sort_unstable();
        files.dedup();
        files
    }
}

/// Decides which chains of a [`Grouping`] merge under a budget.
pub struct MergePlanner<'a> {
    config: &'a MergeConfig,
}

impl<'a> MergePlanner<'a> {
    pub fn new(config: &'a MergeConfig) -> Self {
        Self { config }
    }

    fn is_cheap(&self, plan: &ChainPlan) -> bool {
        plan.extra_cost == 0 || plan.extra_cost < self.config.cheap_merge_threshold
    }

    /// Plan `grouping` against `budget`, mutating chain links in `table`.
    pub fn plan(
        &self,
        table: &mut NodeTable,
        grouping: &Grouping,
        budget: &mut GpuMemoryBudget,
    ) -> MergeResult<MergePlan> {
        let mut chains: Vec<ChainPlan> = grouping
            .chains
            .iter()
            .map(|c| ChainPlan::new(c, table))
            .collect();

        let mut stats = MergeStats {
            budget_initial: budget.initial(),
            chains: chains.len() as u64,
            ..Default::default()
        };

        // pass 1: mandatory charges
        let mut charged = FixedBitSet::with_capacity(table.meshes().len());
        let mut charge_mesh = |mesh: u32, budget: &mut GpuMemoryBudget, stats: &mut MergeStats| {
            if charged.put(mesh as usize) {
                return;
            }
            let bytes = table.mesh(mesh).map_or(0, |m| m.total_bytes());
            budget.charge(bytes);
            stats.baseline_bytes += bytes;
        };

        let mut pending = Vec::new();
        for entry in &grouping.order {
            match *entry {
                GroupEntry::Chain(i) => {
                    stats.nodes += chains[i].length as u64;
                    if self.is_cheap(&chains[i]) {
                        chains[i].decision = ChainDecision::Cheap;
                        budget.charge(chains[i].merged_bytes);
                        stats.cheap_merges += 1;
                        stats.merge_bytes += chains[i].extra_cost;
                    } else {
                        for &mesh in &chains[i].meshes {
                            charge_mesh(mesh, budget, &mut stats);
                        }
                        pending.push(i);
                    }
                }
                GroupEntry::Single(id) => {
                    stats.nodes += 1;
                    if let Some(record) = table.get(id) {
                        charge_mesh(record.mesh_index, budget, &mut stats);
                    }
                }
            }
        }
        stats.draw_calls_before = stats.nodes;

        if budget.is_overdrawn() {
            return Err(MergeError::PlannerInfeasible {
                budget: budget.initial(),
                required: budget.spent(),
            });
        }

        // pass 2: knapsack over what is left
        let items: Vec<KnapsackItem> = pending
            .iter()
            .map(|&i| KnapsackItem {
                cost: chains[i].extra_cost,
                value: chains[i].benefit,
            })
            .collect();
        let selected = knapsack::solve(&items, budget.available(), self.config.max_knapsack_buckets);

        for (&i, take) in pending.iter().zip(selected) {
            let chain = &mut chains[i];
            if take {
                chain.decision = ChainDecision::Knapsack;
                budget.charge(chain.extra_cost);
                stats.knapsack_merges += 1;
                stats.merge_bytes += chain.extra_cost;
            } else if self.config.instancing && chain.single_mesh() {
                chain.decision = ChainDecision::Instanced;
                stats.instanced_groups += 1;
            } else {
                chain.decision = ChainDecision::Rejected;
                stats.rejected_chains += 1;
            }
        }

        // pass 3: emit items, dissolving rejected chains
        let mut plan_items = Vec::with_capacity(grouping.order.len());
        for entry in &grouping.order {
            match *entry {
                GroupEntry::Chain(i) => {
                    let chain = &chains[i];
                    debug!(
                        "chain {} ({} nodes, {} vertices): +{} bytes -> {:?}",
                        chain.head, chain.length, chain.vertex_count, chain.extra_cost, chain.decision
                    );
                    let file_index = chain.file_index;
                    match chain.decision {
                        ChainDecision::Cheap | ChainDecision::Knapsack => plan_items.push(PlanItem {
                            file_index,
                            kind: PlanKind::Merged {
                                head: chain.head,
                                index_width: chain.merged_width,
                            },
                        }),
                        ChainDecision::Instanced => plan_items.push(PlanItem {
                            file_index,
                            kind: PlanKind::Instanced { head: chain.head },
                        }),
                        ChainDecision::Rejected | ChainDecision::Pending => {
                            for node in table.unlink(chain.head) {
                                plan_items.push(PlanItem {
                                    file_index,
                                    kind: PlanKind::Standalone { node },
                                });
                            }
                        }
                    }
                }
                GroupEntry::Single(node) => {
                    if let Some(record) = table.get(node) {
                        plan_items.push(PlanItem {
                            file_index: record.file_index,
                            kind: PlanKind::Standalone { node },
                        });
                    }
                }
            }
        }

        stats.draw_calls_after = plan_items.len() as u64;
        stats.budget_remaining = budget.remaining();

        Ok(MergePlan {
            items: plan_items,
            chains,
            stats,
        })
    }
}
