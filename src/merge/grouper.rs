//! Partition nodes into merge-candidate chains.

use log::debug;

use super::node::NodeTable;
use crate::scene::IndexWidth;

/// A run of nodes sharing file, material, attribute layout and encoded
/// index width, linked head to tail in the [`NodeTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeChain {
    pub head: u32,
    pub file_index: u16,
    pub material: u16,
    pub attribute: u8,
    /// Encoded width shared by every member.
    pub encoded_width: IndexWidth,
    pub length: u32,
    pub vertex_count: u64,
    pub index_count: u64,
    pub vertex_bytes: u64,
}

impl MergeChain {
    /// Index width of the merged buffer.
    pub fn merged_width(&self) -> IndexWidth {
        IndexWidth::for_vertex_count(self.vertex_count)
    }

    /// Draw calls saved by merging.
    pub fn benefit(&self) -> u64 {
        self.length.saturating_sub(1) as u64
    }
}

/// One position in planning order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEntry {
    /// Index into [`Grouping::chains`].
    Chain(usize),
    /// A node that stays standalone.
    Single(u32),
}

/// Output of [`group_by_material`].
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub chains: Vec<MergeChain>,
    /// Chains and singles in sorted order.
    pub order: Vec<GroupEntry>,
}

impl Grouping {
    pub fn singles(&self) -> impl Iterator<Item = u32> + '_ {
        self.order.iter().filter_map(|e| match e {
            GroupEntry::Single(id) => Some(*id),
            GroupEntry::Chain(_) => None,
        })
    }
}

/// Sort `nodes` by (file, material, attribute, encoded index width) and
/// split each run into chains of at most `max_vertices` vertices.
///
/// Billboards never merge. A node larger than `max_vertices` on its own
/// stays standalone. Non-head members end up `valid = false`.
pub fn group_by_material(table: &mut NodeTable, nodes: &[u32], max_vertices: u32) -> Grouping {
    let mut sorted: Vec<u32> = nodes
        .iter()
        .copied()
        .filter(|&id| table.get(id).is_some())
        .collect();
    // sort_by_key is stable
    sorted.sort_by_key(|&id| {
        let r = &table.records()[id as usize];
        (r.file_index, r.material, r.attribute, r.index_width)
    });

    let mut grouping = Grouping::default();
    let mut run: Vec<u32> = Vec::new();
    let mut run_vertices = 0u64;
    let mut run_key = None;

    for id in sorted {
        let record = &table.records()[id as usize];
        let key = (
            record.file_index,
            record.material,
            record.attribute,
            record.index_width,
        );
        let vertices = record.vertex_count as u64;

        if record.flags.billboard {
            grouping.order.push(GroupEntry::Single(id));
            continue;
        }

        if run_key != Some(key) || run_vertices + vertices > max_vertices as u64 {
            flush(table, &mut grouping, &mut run);
            run_key = Some(key);
            run_vertices = 0;
        }
        run.push(id);
        run_vertices += vertices;
    }
    flush(table, &mut grouping, &mut run);

    debug!(
        "grouped {} nodes into {} chains and {} singles",
        nodes.len(),
        grouping.chains.len(),
        grouping.singles().count()
    );

    grouping
}

fn flush(table: &mut NodeTable, grouping: &mut Grouping, run: &mut Vec<u32>) {
    match run.len() {
        0 => {}
        1 => grouping.order.push(GroupEntry::Single(run[0])),
        _ => {
            table.link(run);
            let mut chain = {
                let head = &table.records()[run[0] as usize];
                MergeChain {
                    head: head.id,
                    file_index: head.file_index,
                    material: head.material,
                    attribute: head.attribute,
                    encoded_width: head.index_width,
                    length: run.len() as u32,
                    vertex_count: 0,
                    index_count: 0,
                    vertex_bytes: 0,
                }
            };
            for &id in run.iter() {
                let r = &table.records()[id as usize];
                chain.vertex_count += r.vertex_count as u64;
                chain.index_count += r.index_count as u64;
                chain.vertex_bytes += r.vertex_bytes as u64;
            }
            grouping.order.push(GroupEntry::Chain(grouping.chains.len()));
            grouping.chains.push(chain);
        }
    }
    run.clear();
}
