//! The ancestry tree: a parent-pointer forest stored as an arena indexed
//! by lineage ID, with a free-list stack handing out the bounded ID space.
//!
//! Nodes only ever point *up*; a collapsed node therefore cannot reach its
//! descendants to retarget them, and instead leaves a sentinel generation
//! behind so that everyone holding a reference forwards through it on the
//! next pass.

use vob::Vob;

use crate::AHashSet;

use super::cell::TOMBSTONE;
use super::{AncestryId, DistributedMap};

/// Generation sentinel for a node that has been merged into its parent and
/// awaits reclamation.
pub const COLLAPSED: i32 = -111;

/// Back-reference from an ancestry node to one cell entry it owns.
#[derive(Clone, Copy, Debug)]
pub struct CellRef {
    pub x: u16,
    pub y: u16,
    /// Index of the entry within the cell, or -1 once the entry has been
    /// removed out from under us by a compaction.
    pub entry: i32,
}

/// One node of the ancestry tree.
#[derive(Clone, Debug)]
pub struct Ancestor {
    /// Equal to the node's own index while live; negative otherwise.
    pub id: i32,
    pub generation: i32,
    pub parent: Option<AncestryId>,
    /// Direct descendants: child nodes plus current particles sitting on
    /// this node.
    pub num_children: usize,
    /// Every cell entry this node has written, so the node can delete or
    /// forward its contribution without searching the grid.
    pub cell_refs: Vec<CellRef>,
}

impl Ancestor {
    fn idle() -> Self {
        Self {
            id: -1,
            generation: -1,
            parent: None,
            num_children: 0,
            cell_refs: Vec::new(),
        }
    }
}

pub struct AncestryArena {
    nodes: Vec<Ancestor>,
    /// Free IDs, popped from the back. The root never enters this list.
    free: Vec<AncestryId>,
    /// Scratch bits for the cache build's lineage walk.
    seen: Vob,
}

impl AncestryArena {
    pub fn new(id_limit: usize) -> Self {
        assert!(id_limit >= 2, "need at least a root and one working ID");
        let mut nodes: Vec<Ancestor> = (0..id_limit).map(|_| Ancestor::idle()).collect();
        let root = id_limit - 1;
        nodes[root].id = root as i32;
        nodes[root].generation = 0;
        nodes[root].num_children = 1;
        let mut seen = Vob::with_capacity(id_limit);
        for _ in 0..id_limit {
            seen.push(false);
        }
        Self {
            nodes,
            free: (0..id_limit - 1).collect(),
            seen,
        }
    }

    #[inline]
    pub fn id_limit(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn root(&self) -> AncestryId {
        self.nodes.len() - 1
    }

    #[inline]
    pub fn node(&self, id: AncestryId) -> &Ancestor {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: AncestryId) -> &mut Ancestor {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn is_live(&self, id: AncestryId) -> bool {
        self.nodes[id].id == id as i32
    }

    pub fn free_ids(&self) -> usize {
        self.free.len()
    }

    /// Take a fresh ID and attach it beneath `parent`. Exhaustion is not
    /// recoverable in any meaningful way; we diagnose, hand out ID 0 and
    /// keep running, accepting that lineage bookkeeping is lost from here.
    pub(crate) fn allocate_child(&mut self, parent: AncestryId, generation: i32) -> AncestryId {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                eprintln!(
                    "out of ancestry IDs ({} in use); lineage bookkeeping is no longer sound",
                    self.nodes.len()
                );
                0
            }
        };
        let node = &mut self.nodes[id];
        node.id = id as i32;
        node.generation = generation;
        node.parent = Some(parent);
        node.num_children = 0;
        node.cell_refs.clear();
        id
    }

    /// Return a node to the free list.
    pub(crate) fn release(&mut self, id: AncestryId, generation: i32) {
        let node = &mut self.nodes[id];
        node.id = -1;
        node.generation = generation;
        node.parent = None;
        node.num_children = 0;
        node.cell_refs.clear();
        self.free.push(id);
    }

    pub(crate) fn clear_seen(&mut self) {
        let marked: Vec<usize> = self.seen.iter_set_bits(..).collect();
        for id in marked {
            self.seen.set(id, false);
        }
    }

    #[inline]
    pub(crate) fn seen(&self, id: AncestryId) -> bool {
        self.seen.get(id) == Some(true)
    }

    #[inline]
    pub(crate) fn mark_seen(&mut self, id: AncestryId) {
        self.seen.set(id, true);
    }
}

impl DistributedMap {
    /// Walk upward from `start`, reclaiming every node left with no
    /// children: its cell entries are deleted, its ID returned, and the
    /// disappearance propagated to the parent (which may in turn die).
    pub fn prune_lineage(&mut self, start: AncestryId, generation: i32) {
        if !self.ancestry.is_live(start) {
            return;
        }
        let mut id = start;
        while self.ancestry.node(id).num_children == 0 {
            // The refs stay in the node while we walk them: deleting one
            // entry can compact its cell, which tombstones this node's
            // other refs in place so the later iterations skip them.
            let total = self.ancestry.node(id).cell_refs.len();
            for j in 0..total {
                let r = self.ancestry.node(id).cell_refs[j];
                self.delete_entry(r.x as usize, r.y as usize, r.entry);
            }
            self.ancestry.node_mut(id).cell_refs.clear();
            let parent = self.ancestry.node(id).parent;
            self.ancestry.release(id, generation);
            let parent = match parent {
                Some(p) => p,
                None => break,
            };
            self.ancestry.node_mut(parent).num_children -= 1;
            id = parent;
        }
    }

    /// Follow a chain of collapsed nodes up to the first survivor.
    pub fn forward_collapsed(&self, id: AncestryId) -> AncestryId {
        let mut id = id;
        while self.ancestry.node(id).generation == COLLAPSED {
            id = self
                .ancestry
                .node(id)
                .parent
                .expect("collapsed node with no parent");
        }
        id
    }

    /// Merge every only child into its parent. The child's entries are
    /// relabeled to the parent's ID in place; parent entries that the
    /// child had already superseded become tombstones, and cells that
    /// accumulated enough of those are compacted in a second pass (the
    /// relabeling of *all* duplicates has to finish first). Collapsed
    /// nodes keep a sentinel generation so that stale references can
    /// forward; the final pass below re-points every live node.
    pub fn collapse_branches(&mut self) {
        let id_limit = self.ancestry.id_limit();
        for id in 0..id_limit - 1 {
            if !self.ancestry.is_live(id) {
                continue;
            }
            let parent = match self.ancestry.node(id).parent {
                Some(p) => p,
                None => continue,
            };
            let parent = self.forward_collapsed(parent);
            self.ancestry.node_mut(id).parent = Some(parent);
            if self.ancestry.node(parent).num_children != 1 {
                continue;
            }

            let parent_gen = self.ancestry.node(parent).generation;
            let refs = std::mem::take(&mut self.ancestry.node_mut(id).cell_refs);

            for r in &refs {
                if r.entry < 0 {
                    continue;
                }
                let idx = self.index(r.x as usize, r.y as usize);
                let source = self.ancestry.node(parent).cell_refs.len();
                let cell = self.cells[idx]
                    .as_mut()
                    .expect("cell-ref of a live lineage into an absent cell");
                let entry = &mut cell.entries[r.entry as usize];
                entry.ancestor = parent;
                entry.source = source;
                if entry.parent_gen >= parent_gen {
                    // The child had already superseded a parent observation
                    // of this cell; the pair resolves at compaction.
                    entry.parent_gen = TOMBSTONE;
                    cell.dead += 1;
                }
                self.ancestry.node_mut(parent).cell_refs.push(*r);
            }

            // Shrinking has to wait until every duplicate in a cell has been
            // relabeled, hence the second pass.
            let touched: AHashSet<(u16, u16)> = refs.iter().map(|r| (r.x, r.y)).collect();
            for (x, y) in touched {
                let idx = self.index(x as usize, y as usize);
                if let Some(cell) = self.cells[idx].as_ref() {
                    if (((cell.entries.len() - cell.dead) as f64 * 2.5) as usize) < cell.size {
                        self.resize_cell(x as usize, y as usize, None);
                    }
                }
            }

            let children = self.ancestry.node(id).num_children;
            self.ancestry.node_mut(parent).num_children = children;
            self.ancestry.node_mut(id).generation = COLLAPSED;
        }

        // Re-point everything that still looks at a collapsed node.
        for id in 0..id_limit - 1 {
            if self.ancestry.is_live(id) {
                if let Some(parent) = self.ancestry.node(id).parent {
                    let parent = self.forward_collapsed(parent);
                    self.ancestry.node_mut(id).parent = Some(parent);
                }
            }
        }
    }

    /// Attach a surviving particle to the tree after a resample. A parent
    /// down to a single child is reused directly; a parent with several
    /// children gets a fresh node per child.
    pub fn adopt(&mut self, id: AncestryId, generation: i32) -> AncestryId {
        let id = self.forward_collapsed(id);
        if self.ancestry.node(id).num_children == 1 {
            let node = self.ancestry.node_mut(id);
            node.generation = generation;
            node.num_children = 0;
            id
        } else {
            self.ancestry.allocate_child(id, generation)
        }
    }

    /// Return every collapsed node's ID to the free list. Runs after the
    /// interval's map updates, when no stale reference can remain.
    pub fn reclaim_collapsed(&mut self) {
        for id in 0..self.ancestry.id_limit() - 1 {
            if self.ancestry.node(id).generation == COLLAPSED {
                self.ancestry.release(id, -1);
            }
        }
    }
}
