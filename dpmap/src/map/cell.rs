//! Per-cell storage for the sparse observation arrays.
//!
//! A cell exists only once some lineage has traced a beam through it. Its
//! entry array grows geometrically, carries a count of entries known to be
//! superseded (`dead`), and is compacted when the live fraction drops far
//! enough. Compaction is where duplicate entries for one lineage (a legacy
//! of branch collapses) are finally resolved.

use super::{AncestryId, DistributedMap};

/// `parent_gen` value marking an entry as superseded and awaiting
/// compaction.
pub const TOMBSTONE: i32 = -1;
/// `parent_gen` value for an entry whose lineage had no earlier
/// observation of the cell.
pub const NO_PREDECESSOR: i32 = -2;

/// One lineage's accumulated observation of one cell.
#[derive(Clone, Debug, PartialEq)]
pub struct MapEntry {
    /// Owning ancestry node.
    pub ancestor: AncestryId,
    /// Index of this entry's back-reference in the owner's `cell_refs`.
    pub source: usize,
    /// Generation of the ancestor entry this one superseded, or one of
    /// `TOMBSTONE` / `NO_PREDECESSOR`.
    pub parent_gen: i32,
    /// Accumulated stop count.
    pub hits: f64,
    /// Accumulated traced length through the cell, prior included.
    pub distance: f64,
}

/// A cell record. `size` is the capacity the growth policy has granted;
/// the vector's own capacity merely follows it.
#[derive(Clone, Debug)]
pub struct Cell {
    pub entries: Vec<MapEntry>,
    pub size: usize,
    pub dead: usize,
}

impl Cell {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::with_capacity(1),
            size: 1,
            dead: 0,
        }
    }
}

impl DistributedMap {
    /// Rebuild a cell's entry array, dropping every entry of `dead_id` (if
    /// given) and resolving duplicate entries per lineage. Of a duplicate
    /// pair the entry with the greater accumulated distance is canonical;
    /// the loser's predecessor generation is inherited. Every surviving
    /// entry's back-reference is rewritten so the two directions stay in
    /// sync.
    pub(crate) fn resize_cell(&mut self, x: usize, y: usize, dead_id: Option<AncestryId>) {
        let idx = self.index(x, y);
        let mut cell = match self.cells[idx].take() {
            Some(c) => c,
            None => return,
        };
        if dead_id.is_some() {
            cell.dead += 1;
        }

        // Dead entries do not count towards the new capacity.
        let live = cell.entries.len() - cell.dead;
        let size = ((live as f64) * 1.75).ceil() as usize;
        let size = size.max(1);
        let mut fresh: Vec<MapEntry> = Vec::with_capacity(size);
        // Per lineage: where its first surviving entry landed in `fresh`.
        let mut placed = vec![-1i32; self.ancestry.id_limit()];

        for i in 0..cell.entries.len() {
            let id = cell.entries[i].ancestor;

            if Some(id) == dead_id {
                // The whole lineage is mid-removal; mark its back-reference
                // so the pending per-ref deletes skip this entry.
                let source = cell.entries[i].source;
                self.ancestry.node_mut(id).cell_refs[source].entry = -1;
            } else if placed[id] == -1 {
                // First entry of this lineage: keep it.
                let entry = cell.entries[i].clone();
                let j = fresh.len();
                let refs = &mut self.ancestry.node_mut(id).cell_refs;
                if refs[entry.source].entry != i as i32 {
                    panic!(
                        "back-reference out of sync at ({}, {}): entry {} of lineage {} \
                         is not where source {} says it is",
                        x, y, i, id, entry.source
                    );
                }
                refs[entry.source].entry = j as i32;
                placed[id] = j as i32;
                fresh.push(entry);
            } else if cell.entries[i].distance > fresh[placed[id] as usize].distance {
                // The copy already placed is the older duplicate. Its
                // back-reference goes away and its slot takes over the
                // newer data, while its predecessor generation is kept.
                let kept = placed[id] as usize;
                let old_source = fresh[kept].source;
                self.drop_ref_mid_resize(&mut cell, &mut fresh, &placed, id, old_source, x, y, i, false);
                let newer = &cell.entries[i];
                fresh[kept].source = newer.source;
                fresh[kept].hits = newer.hits;
                fresh[kept].distance = newer.distance;
                self.ancestry.node_mut(id).cell_refs[newer.source].entry = kept as i32;
            } else {
                // The current entry is the older duplicate: drop it, handing
                // its predecessor generation to the survivor.
                if cell.entries[i].parent_gen != TOMBSTONE {
                    fresh[placed[id] as usize].parent_gen = cell.entries[i].parent_gen;
                }
                let old_source = cell.entries[i].source;
                self.drop_ref_mid_resize(&mut cell, &mut fresh, &placed, id, old_source, x, y, i, true);
            }
        }

        cell.dead = 0;
        cell.size = size;
        cell.entries = fresh;
        self.cells[idx] = Some(cell);
    }

    /// Swap-remove the back-reference at `source` from `id`'s list while a
    /// resize of cell `(x, y)` is in flight, repairing whatever entry the
    /// moved reference points at. `i` is the resize cursor; entries of this
    /// cell before it live in `fresh`, entries at or after it still live in
    /// `cell`.
    #[allow(clippy::too_many_arguments)]
    fn drop_ref_mid_resize(
        &mut self,
        cell: &mut Cell,
        fresh: &mut [MapEntry],
        placed: &[i32],
        id: AncestryId,
        source: usize,
        x: usize,
        y: usize,
        i: usize,
        inclusive: bool,
    ) {
        let refs = &mut self.ancestry.node_mut(id).cell_refs;
        refs.swap_remove(source);
        if source >= refs.len() {
            return;
        }
        let moved = refs[source];
        if moved.entry < 0 {
            return;
        }
        let cursor = if inclusive { moved.entry as usize <= i } else { (moved.entry as usize) < i };
        if moved.x as usize == x && moved.y as usize == y {
            if cursor {
                // Already carried over; the surviving copy of this lineage
                // is the one `placed` knows about.
                fresh[placed[id] as usize].source = source;
            } else {
                cell.entries[moved.entry as usize].source = source;
            }
        } else {
            let other = self.index(moved.x as usize, moved.y as usize);
            if let Some(other) = self.cells[other].as_mut() {
                other.entries[moved.entry as usize].source = source;
            }
        }
    }

    /// Remove the entry a cell-ref points at. Swap-remove with
    /// back-reference fix-up; shrinks the array once the live fraction
    /// falls to 40%, and frees the cell record when its last live entry
    /// goes.
    pub(crate) fn delete_entry(&mut self, x: usize, y: usize, entry: i32) {
        if entry < 0 {
            // Already removed while resizing the array.
            return;
        }
        let idx = self.index(x, y);
        let (len, dead, size) = match self.cells[idx].as_ref() {
            Some(c) => (c.entries.len(), c.dead, c.size),
            None => return,
        };
        let entry = entry as usize;
        if entry >= len {
            // A stale reference into a cell that has since been rebuilt;
            // nothing of ours is left here.
            return;
        }

        if len - dead == 1 {
            self.cells[idx] = None;
            return;
        }

        if ((len - 1 - dead) as f64 * 2.5) as usize <= size {
            // Let the compaction remove this entry, and every other entry
            // of the same lineage with it.
            let dead_id = self.cells[idx].as_ref().unwrap().entries[entry].ancestor;
            self.resize_cell(x, y, Some(dead_id));
            if let Some(c) = self.cells[idx].as_ref() {
                if c.entries.is_empty() {
                    self.cells[idx] = None;
                }
            }
            return;
        }

        let cell = self.cells[idx].as_mut().unwrap();
        cell.entries.swap_remove(entry);
        if entry < cell.entries.len() {
            let moved = cell.entries[entry].clone();
            self.ancestry.node_mut(moved.ancestor).cell_refs[moved.source].entry = entry as i32;
        }
    }
}
