//! The iteration-scoped observation cache.
//!
//! Scoring and committing both ask, many times per sub-step, "which entry
//! of cell (x, y) applies to lineage I?". The first query for a cell
//! resolves every live lineage at once by walking the ancestry upward and
//! leaves the answers in a row of the cache; later queries are a single
//! indexed load. A flag table remembers which cells hold a row this
//! iteration, and a log of touched cells lets the whole thing be torn down
//! in time proportional to what was actually used.

use super::{AncestryId, DistributedMap};

/// Flag value for a cell whose every resolvable entry has zero hits: the
/// cell can contribute no stop probability for any live lineage, so the
/// scorer short-circuits.
pub(crate) const NO_EVIDENCE: i32 = -2;

pub(crate) struct ObservationCache {
    /// 0 = cell not cached this iteration, > 0 = row index, NO_EVIDENCE =
    /// short-circuit.
    flags: Vec<i32>,
    /// Rows of resolved entry indices, indexed by flag value; -1 in a row
    /// means "nothing for this lineage anywhere up its ancestry".
    rows: Vec<Vec<i32>>,
    /// Cells claimed this iteration, in claim order.
    touched: Vec<(u16, u16)>,
    next_id: usize,
    width: usize,
    area: usize,
    /// Reusable scratch row for the build.
    scratch: Vec<i32>,
}

impl ObservationCache {
    pub(crate) fn new(area: usize, width: usize) -> Self {
        Self {
            flags: vec![0; area],
            rows: Vec::new(),
            touched: Vec::new(),
            next_id: 1,
            width,
            area,
            scratch: Vec::new(),
        }
    }

    /// Drop every cached row by clearing the flags we set this iteration.
    pub(crate) fn reset(&mut self) {
        while let Some((x, y)) = self.touched.pop() {
            self.flags[y as usize * self.width + x as usize] = 0;
        }
        self.next_id = 1;
    }

    #[inline]
    pub(crate) fn flag_at(&self, idx: usize) -> i32 {
        self.flags[idx]
    }

    pub(crate) fn set_no_evidence(&mut self, idx: usize) {
        self.flags[idx] = NO_EVIDENCE;
    }

    /// Claim a row for cell (x, y) and hand back its index. The row comes
    /// back filled with -1.
    pub(crate) fn claim(&mut self, x: usize, y: usize, id_limit: usize) -> usize {
        if self.next_id >= self.area {
            // The flag table can no longer distinguish iterations; the rows
            // still grow, so behavior stays safe, merely wasteful.
            eprintln!("observation id rolled over ({} cells claimed)", self.next_id);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.flags[y * self.width + x] = id as i32;
        self.touched.push((x as u16, y as u16));
        if self.rows.len() <= id {
            self.rows.resize_with(id + 1, Vec::new);
        }
        let row = &mut self.rows[id];
        row.clear();
        row.resize(id_limit, -1);
        id
    }

    #[inline]
    pub(crate) fn row_entry(&self, row: usize, id: AncestryId) -> i32 {
        self.rows[row][id]
    }

    #[inline]
    pub(crate) fn set_row_entry(&mut self, row: usize, id: AncestryId, entry: i32) {
        self.rows[row][id] = entry;
    }

    pub(crate) fn install_row(&mut self, row: usize, resolved: &[i32]) {
        self.rows[row].copy_from_slice(resolved);
    }

    pub(crate) fn take_scratch(&mut self, id_limit: usize) -> Vec<i32> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.resize(id_limit, -1);
        scratch
    }

    pub(crate) fn put_scratch(&mut self, scratch: Vec<i32>) {
        self.scratch = scratch;
    }
}

impl DistributedMap {
    /// Resolve cell (x, y) for every live lineage and cache the result.
    /// Duplicate entries for one lineage are resolved on the way through
    /// (the greater accumulated distance is canonical, the other entry is
    /// physically removed). In scoring mode a cell whose resolvable
    /// entries all have zero hits is flagged `NO_EVIDENCE` instead of
    /// getting a row.
    pub(crate) fn build_observation(&mut self, x: usize, y: usize, scoring: bool) {
        let idx = self.index(x, y);
        let id_limit = self.ancestry.id_limit();
        let row = self.cache.claim(x, y, id_limit);
        let mut working = self.cache.take_scratch(id_limit);
        self.ancestry.clear_seen();

        // In scoring mode, start from "no live entry carries a hit" and
        // knock the flag down the moment one does, or the moment some
        // lineage resolves to nothing at all (the prior applies there).
        let mut no_evidence = scoring
            && self.cells[idx]
                .as_ref()
                .map(|c| c.entries.iter().all(|e| e.hits <= 0.0))
                .unwrap_or(false);

        // Direct observations first, resolving duplicates as they surface.
        let mut i = 0;
        while i < self.cells[idx].as_ref().map(|c| c.entries.len()).unwrap_or(0) {
            self.resolve_direct(x, y, i, &mut working);
            i += 1;
        }

        // Fill the gaps by walking each live lineage upward until a seen
        // ancestor or the root; unwinding the stack pushes each ancestor's
        // answer down to its descendants.
        let mut stack: Vec<AncestryId> = Vec::new();
        for p in 0..self.roster.len() {
            let mut lineage = Some(self.roster[p]);
            stack.clear();
            while let Some(id) = lineage {
                if self.ancestry.seen(id) {
                    break;
                }
                stack.push(id);
                self.ancestry.mark_seen(id);
                lineage = self.ancestry.node(id).parent;
            }
            while let Some(id) = stack.pop() {
                if working[id] == -1 {
                    if let Some(parent) = self.ancestry.node(id).parent {
                        working[id] = working[parent];
                    }
                }
                if working[id] == -1 {
                    no_evidence = false;
                }
            }
        }

        if scoring && no_evidence {
            self.cache.set_no_evidence(idx);
        } else {
            self.cache.install_row(row, &working);
        }
        self.cache.put_scratch(working);
    }

    /// Register entry `i` of cell (x, y) in the working row. Finding a
    /// second entry for the same lineage means one of the two is a leftover
    /// duplicate; the one with the smaller accumulated distance dies here,
    /// its back-reference removed and its slot swap-filled.
    fn resolve_direct(&mut self, x: usize, y: usize, i: usize, working: &mut [i32]) {
        let idx = self.index(x, y);
        let (id, dist_i) = {
            let cell = self.cells[idx].as_ref().unwrap();
            (cell.entries[i].ancestor, cell.entries[i].distance)
        };
        if working[id] == -1 {
            working[id] = i as i32;
            return;
        }

        let prev = working[id] as usize;
        let dist_prev = self.cells[idx].as_ref().unwrap().entries[prev].distance;
        let dying = if dist_i < dist_prev {
            i
        } else {
            working[id] = i as i32;
            prev
        };
        let survivor = if dying == i { prev } else { i };

        {
            let cell = self.cells[idx].as_mut().unwrap();
            let gen = cell.entries[dying].parent_gen;
            if gen >= 0 {
                cell.entries[survivor].parent_gen = gen;
            }
        }

        // Unhook the dying entry from its owner's cell-ref list.
        let source = self.cells[idx].as_ref().unwrap().entries[dying].source;
        let refs = &mut self.ancestry.node_mut(id).cell_refs;
        refs.swap_remove(source);
        if source < refs.len() {
            let moved = refs[source];
            if moved.entry >= 0 {
                let other = self.index(moved.x as usize, moved.y as usize);
                if let Some(other) = self.cells[other].as_mut() {
                    other.entries[moved.entry as usize].source = source;
                }
            }
        }

        // Physically remove it from the cell.
        let cell = self.cells[idx].as_mut().unwrap();
        if cell.dead == 0 {
            panic!(
                "dead-entry underflow at ({}, {}): duplicate without a matching tombstone",
                x, y
            );
        }
        cell.dead -= 1;
        let last = cell.entries.len() - 1;
        cell.entries.swap_remove(dying);
        if dying < last {
            let moved = cell.entries[dying].clone();
            self.ancestry.node_mut(moved.ancestor).cell_refs[moved.source].entry = dying as i32;
            if working[moved.ancestor] == last as i32 {
                working[moved.ancestor] = dying as i32;
            } else if i != last {
                // The freshly moved entry has not been looked at yet.
                self.resolve_direct(x, y, dying, working);
            }
        }
    }
}
