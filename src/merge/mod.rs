//! Node grouping and budget-constrained merge planning.

pub mod budget;
pub mod grouper;
pub mod knapsack;
pub mod node;
pub mod planner;

pub use budget::GpuMemoryBudget;
pub use grouper::{group_by_material, GroupEntry, Grouping, MergeChain};
pub use knapsack::{KnapsackItem, Quantization};
pub use node::{ChainIter, NodeRecord, NodeTable};
pub use planner::{ChainDecision, ChainPlan, MergePlan, MergePlanner, PlanItem, PlanKind};
