//! # The Distributed Particle Map
//!
//! ## Description
//! A grid map in which every cell stores, per particle lineage, an
//! independent pair of accumulated laser statistics: how often a beam
//! *stopped* in the cell (`hits`), and how much beam length has been traced
//! *through* the cell (`distance`). The ratio of the two gives the
//! probability that a trace of a given length through the cell is
//! interrupted by an obstacle.
//!
//! ## Idea
//! Keeping a full occupancy grid per particle is hopeless; almost all
//! particles agree on almost all of the map. Instead, each cell carries a
//! small dynamic array holding only the lineages that have actually
//! observed it, and a lineage that has never touched a cell inherits the
//! entry of its nearest ancestor that has. The ancestry tree required for
//! that lookup is maintained alongside the grid:
//!
//! * branches whose particles have all died are pruned, and their cell
//!   entries deleted;
//! * interior nodes left with a single child are collapsed into their
//!   parent, their entries transparently relabeled;
//! * node IDs come from a bounded free list and are reused aggressively.
//!
//! Because the ancestry walk is too slow to repeat for every beam of every
//! sample, an iteration-scoped cache (`flag` table plus per-cell rows of
//! resolved entry indices) makes the second and later lookups for a cell
//! O(1). The cache is torn down wholesale between sub-steps by replaying a
//! log of the cells it touched.
//!
//! ## Dictionary
//! lineage, entry, cell-ref, collapse, tombstone

use std::fmt;

pub use self::ancestry::{Ancestor, AncestryArena, CellRef, COLLAPSED};
pub use self::cell::{Cell, MapEntry, NO_PREDECESSOR, TOMBSTONE};
pub use self::render::MapImage;

use self::cache::ObservationCache;

mod ancestry;
mod cache;
mod cell;
mod render;
mod trace;

#[cfg(test)]
mod test;

/// Index into the ancestry arena. Doubles as the particle lineage identity
/// recorded in cell entries.
pub type AncestryId = usize;

/// Geometry and sensor model shared by every operation on one map level.
#[derive(Clone, Debug)]
pub struct MapConfig {
    /// Grid extent, in cells.
    pub width: usize,
    pub height: usize,
    /// Bound on concurrently live ancestry nodes. The last ID is the root.
    pub id_limit: usize,
    /// Cells per meter.
    pub map_scale: f64,
    /// Sensor cutoff, in cells. Readings at or beyond it are "no return".
    pub max_sense_range: f64,
    /// Pseudo distance seeded into a fresh entry, so that a single hit does
    /// not saturate the occupancy estimate.
    pub prior_dist: f64,
    /// Variance of the Gaussian over radial beam error, in cells squared.
    pub variance: f64,
}

impl MapConfig {
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

/// One level's complete map state: the cell grid, the ancestry tree over
/// its writers, and the iteration-scoped observation cache.
///
/// All mutation is single threaded by construction; the owner is expected
/// to live on a dedicated SLAM thread and publish immutable snapshots
/// (`render`) at interval boundaries.
pub struct DistributedMap {
    config: MapConfig,
    /// Exponent coefficient of the prior stop probability for unobserved
    /// cells.
    prior: f64,
    cells: Vec<Option<Box<Cell>>>,
    pub(crate) ancestry: AncestryArena,
    pub(crate) cache: ObservationCache,
    /// Ancestry IDs of the currently live particles. The cache build walks
    /// these lineages to resolve inherited entries.
    roster: Vec<AncestryId>,
}

impl DistributedMap {
    pub fn new(config: MapConfig) -> Self {
        let area = config.area();
        let prior = -1.0 / (config.map_scale * 8.0);
        let ancestry = AncestryArena::new(config.id_limit);
        let cache = ObservationCache::new(area, config.width);
        Self {
            config,
            prior,
            cells: (0..area).map(|_| None).collect(),
            ancestry,
            cache,
            roster: Vec::new(),
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// The root of the ancestry tree. Exists from initialization until
    /// shutdown and is never freed.
    pub fn root(&self) -> AncestryId {
        self.ancestry.root()
    }

    #[inline]
    pub(crate) fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.config.width && y < self.config.height);
        y * self.config.width + x
    }

    pub(crate) fn cell(&self, x: usize, y: usize) -> Option<&Cell> {
        self.cells[y * self.config.width + x].as_deref()
    }

    /// Install the set of live particle lineages for this iteration. Must
    /// be refreshed whenever the particle set changes; the cache resolves
    /// inherited entries for exactly these lineages.
    pub fn set_roster(&mut self, roster: Vec<AncestryId>) {
        self.roster = roster;
    }

    /// Tear down the observation cache. Called between sub-steps; the
    /// touched-cell log makes this proportional to the cells actually
    /// visited, not to the map.
    pub fn reset_observations(&mut self) {
        self.cache.reset();
    }

    pub fn generation_of(&self, id: AncestryId) -> i32 {
        self.ancestry.node(id).generation
    }

    /// Register one more surviving child under `id`. Survivors do this at
    /// resample time, before the ancestry maintenance pass runs.
    pub fn increment_children(&mut self, id: AncestryId) {
        self.ancestry.node_mut(id).num_children += 1;
    }

    /// Occupancy estimate for a trace of length `distance` through the
    /// cell, read through the ancestry walk (no cache). `None` means the
    /// cell is unknown to the whole lineage.
    pub fn occupancy(&self, x: usize, y: usize, distance: f64, id: AncestryId) -> Option<f64> {
        let cell = self.cell(x, y)?;
        let mut id = id;
        loop {
            for entry in &cell.entries {
                if entry.ancestor == id {
                    if entry.hits <= 0.0 {
                        return Some(0.0);
                    }
                    return Some(1.0 - (-(entry.hits / entry.distance) * distance).exp());
                }
            }
            id = self.ancestry.node(id).parent?;
        }
    }

    /// Validates the bidirectional bookkeeping between cells and the
    /// ancestry tree. Panics with a description on the first violation.
    /// Meant for tests and debugging; it walks the whole grid.
    pub fn check_consistency(&self) {
        let mut live_entries = 0usize;
        for y in 0..self.config.height {
            for x in 0..self.config.width {
                let cell = match self.cell(x, y) {
                    Some(c) => c,
                    None => continue,
                };
                let mut per_id: crate::AHashMap<AncestryId, usize> = Default::default();
                for (i, entry) in cell.entries.iter().enumerate() {
                    live_entries += 1;
                    let node = self.ancestry.node(entry.ancestor);
                    assert_eq!(
                        node.id, entry.ancestor as i32,
                        "entry at ({}, {}) names a dead lineage {}",
                        x, y, entry.ancestor
                    );
                    let back = node.cell_refs[entry.source];
                    assert!(
                        back.x as usize == x && back.y as usize == y && back.entry == i as i32,
                        "back-reference mismatch at ({}, {}) entry {} for lineage {}",
                        x, y, i, entry.ancestor
                    );
                    if entry.parent_gen != TOMBSTONE {
                        let seen = per_id.entry(entry.ancestor).or_insert(0);
                        *seen += 1;
                        assert!(
                            *seen <= 1,
                            "two live entries for lineage {} at ({}, {})",
                            entry.ancestor, x, y
                        );
                    }
                }
            }
        }

        let mut live_refs = 0usize;
        for id in 0..self.ancestry.id_limit() {
            if !self.ancestry.is_live(id) {
                continue;
            }
            let node = self.ancestry.node(id);
            for r in &node.cell_refs {
                if r.entry < 0 {
                    continue;
                }
                // A freed cell can leave refs to its tombstones behind; they
                // are inert and die with their owner.
                let cell = match self.cell(r.x as usize, r.y as usize) {
                    Some(c) => c,
                    None => continue,
                };
                live_refs += 1;
                let entry = &cell.entries[r.entry as usize];
                assert_eq!(
                    entry.ancestor, id,
                    "cell-ref of lineage {} lands on an entry of lineage {}",
                    id, entry.ancestor
                );
            }
            if let Some(parent) = node.parent {
                assert!(
                    self.ancestry.node(parent).generation != COLLAPSED,
                    "live lineage {} still points at a collapsed parent",
                    id
                );
            }
        }
        assert_eq!(
            live_refs, live_entries,
            "cell-ref count and entry count have drifted apart"
        );
    }
}

impl fmt::Debug for DistributedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observed = self.cells.iter().filter(|c| c.is_some()).count();
        write!(
            f,
            "DistributedMap {{ {}x{}, {} observed cells, {} free IDs }}",
            self.config.width,
            self.config.height,
            observed,
            self.ancestry.free_ids()
        )
    }
}
