//! Grid traversal for laser beams, parameterized by axis dominance: the
//! axis with the greater displacement drives the stepping, and an overflow
//! accumulator decides when the other axis advances. The overflow carry
//! also yields the exact length of the ray segment inside every crossed
//! cell.
//!
//! Two modes share the traversal: committing a beam into the map under a
//! lineage ID, and scoring a beam against the map as the probability that
//! the measured range is explained by what the lineage believes.

use super::ancestry::CellRef;
use super::cell::{Cell, MapEntry, NO_PREDECESSOR};
use super::{AncestryId, DistributedMap};

impl DistributedMap {
    /// Add `segment` of traced length (and possibly a hit) to cell (x, y)
    /// under lineage `id`. A lineage that already owns an entry here this
    /// generation accumulates in place; otherwise a new entry is appended,
    /// seeded from the nearest ancestor's entry or from the prior.
    pub(crate) fn update_cell(&mut self, x: usize, y: usize, segment: f64, hit: f64, id: AncestryId) {
        let idx = self.index(x, y);

        if self.cells[idx].is_none() {
            // Fresh cell: nobody can inherit anything here, so an empty
            // row is the correct cache state.
            self.cache.claim(x, y, self.ancestry.id_limit());
            self.cells[idx] = Some(Box::new(Cell::new()));
        } else if self.cache.flag_at(idx) <= 0 {
            self.build_observation(x, y, false);
        }

        let row = self.cache.flag_at(idx) as usize;
        let here = self.cache.row_entry(row, id);

        if here >= 0 {
            let cell = self.cells[idx].as_mut().unwrap();
            if let Some(entry) = cell.entries.get_mut(here as usize) {
                if entry.ancestor == id {
                    entry.hits += hit;
                    entry.distance += segment;
                    return;
                }
            }
        }

        // The resolved entry belongs to an ancestor. Capture what we
        // inherit before any compaction can move it.
        let inherited = if here >= 0 {
            let cell = self.cells[idx].as_ref().unwrap();
            cell.entries.get(here as usize).map(|e| {
                (e.hits, e.distance, self.ancestry.node(e.ancestor).generation)
            })
        } else {
            None
        };

        {
            let cell = self.cells[idx].as_ref().unwrap();
            if cell.entries.len() >= cell.size {
                self.resize_cell(x, y, None);
            }
        }

        let entry_index = self.cells[idx].as_ref().unwrap().entries.len();
        self.cache.set_row_entry(row, id, entry_index as i32);

        let source = self.ancestry.node(id).cell_refs.len();
        self.ancestry.node_mut(id).cell_refs.push(CellRef {
            x: x as u16,
            y: y as u16,
            entry: entry_index as i32,
        });

        let (hits, distance, parent_gen) = match inherited {
            Some((h, d, gen)) => (h + hit, d + segment, gen),
            None => (hit, segment + self.config.prior_dist, NO_PREDECESSOR),
        };
        self.cells[idx].as_mut().unwrap().entries.push(MapEntry {
            ancestor: id,
            source,
            parent_gen,
            hits,
            distance,
        });
    }

    /// Probability that a trace of length `segment` through cell (x, y)
    /// stops there, as believed by lineage `id`. Unobserved cells answer
    /// with the prior.
    fn stop_probability(&mut self, x: usize, y: usize, segment: f64, id: AncestryId) -> f64 {
        let idx = self.index(x, y);
        if self.cells[idx].is_none() {
            return 1.0 - (self.prior * segment).exp();
        }
        if self.cache.flag_at(idx) == 0 {
            self.build_observation(x, y, true);
        }
        let flag = self.cache.flag_at(idx);
        if flag < 0 {
            return 0.0;
        }
        let here = self.cache.row_entry(flag as usize, id);
        if here < 0 {
            return 1.0 - (self.prior * segment).exp();
        }
        let cell = self.cells[idx].as_ref().unwrap();
        let entry = &cell.entries[here as usize];
        if entry.hits <= 0.0 {
            return 0.0;
        }
        1.0 - (-(entry.hits / entry.distance) * segment).exp()
    }

    /// Commit one beam into the map under lineage `id`. Every cell the
    /// beam crosses gains traced length; the terminal cell gains a hit iff
    /// `add_end` (the beam actually returned). The trace is clamped at the
    /// sensor cutoff.
    pub fn add_trace(
        &mut self,
        start_x: f64,
        start_y: f64,
        theta: f64,
        measured: f64,
        id: AncestryId,
        add_end: bool,
    ) {
        let secant = 1.0 / theta.cos().abs();
        let cosecant = 1.0 / theta.sin().abs();

        let distance = measured.min(self.config.max_sense_range);
        let dx = start_x + theta.cos() * distance;
        let dy = start_y + theta.sin() * distance;
        let end_x = dx as i64;
        let end_y = dy as i64;

        let (inc_x, x_edge) = if start_x > dx { (-1i64, 1.0) } else { (1i64, 0.0) };
        let (inc_y, y_edge) = if start_y > dy { (-1i64, 1.0) } else { (1i64, 0.0) };

        if (start_x - dx).abs() > (start_y - dy).abs() {
            let mut y = start_y as i64;
            let mut overflow = start_y - y as f64;
            if inc_y == 1 {
                overflow = 1.0 - overflow;
            }
            let mut slope = theta.tan().abs();
            if slope > 1.0 {
                slope = ((start_y - dy) / (start_x - dx)).abs();
            }

            // The start point sits somewhere inside its cell, so the first
            // step is a fraction of a full traversal. No length is booked
            // for the start cell itself; the sensor does not sit inside a
            // wall.
            let error = (start_x.trunc() + inc_x as f64 + x_edge - start_x).abs();
            overflow -= slope * error;
            if overflow < 0.0 {
                y += inc_y;
                overflow += 1.0;
            }

            let standard = slope * cosecant;
            let mut x = start_x as i64 + inc_x;
            while x != end_x {
                overflow -= slope;
                let segment = if overflow < 0.0 {
                    (overflow + slope) * cosecant
                } else {
                    standard
                };
                self.update_cell(x as usize, y as usize, segment, 0.0, id);

                if overflow < 0.0 {
                    y += inc_y;
                    let segment = -overflow * cosecant;
                    overflow += 1.0;
                    self.update_cell(x as usize, y as usize, segment, 0.0, id);
                }
                x += inc_x;
            }

            if add_end {
                let segment = if inc_x < 0 {
                    ((x + 1) as f64 - dx).abs() * secant
                } else {
                    (dx - x as f64).abs() * secant
                };
                self.update_cell(end_x as usize, end_y as usize, segment, 1.0, id);
            }
        } else {
            let mut x = start_x as i64;
            let mut overflow = start_x - x as f64;
            if inc_x == 1 {
                overflow = 1.0 - overflow;
            }
            let slope = 1.0 / theta.tan().abs();

            let error = (start_y.trunc() + inc_y as f64 + y_edge - start_y).abs();
            overflow -= slope * error;
            if overflow < 0.0 {
                x += inc_x;
                overflow += 1.0;
            }

            let standard = slope * secant;
            let mut y = start_y as i64 + inc_y;
            while y != end_y {
                overflow -= slope;
                let segment = if overflow < 0.0 {
                    (overflow + slope) * secant
                } else {
                    standard
                };
                self.update_cell(x as usize, y as usize, segment, 0.0, id);

                if overflow < 0.0 {
                    x += inc_x;
                    let segment = -overflow * secant;
                    overflow += 1.0;
                    self.update_cell(x as usize, y as usize, segment, 0.0, id);
                }
                y += inc_y;
            }

            if add_end {
                let segment = if inc_y < 0 {
                    (((y + 1) as f64 - dy) / theta.sin()).abs()
                } else {
                    ((dy - y as f64) / theta.sin()).abs()
                };
                self.update_cell(end_x as usize, end_y as usize, segment, 1.0, id);
            }
        }
    }

    /// Score one beam against lineage `id`'s view of the map: the
    /// probability of the measured range given the pose. The trace runs a
    /// 20-cell margin past the measurement (but never past the cutoff).
    /// `total_prob` tracks the residual probability that the beam is still
    /// in flight; each crossed cell converts a slice of it, weighted by a
    /// Gaussian on the radial error, into the evaluation.
    ///
    /// A beam at the cutoff is credited with the probability of never
    /// having stopped; any other beam is conditioned on having stopped
    /// somewhere along the trace.
    pub fn line_trace(
        &mut self,
        start_x: f64,
        start_y: f64,
        theta: f64,
        measured: f64,
        id: AncestryId,
    ) -> f64 {
        let mut eval = 0.0;
        let mut total_prob = 1.0;
        let secant = 1.0 / theta.cos().abs();
        let cosecant = 1.0 / theta.sin().abs();
        let variance = self.config.variance;

        let distance = (measured + 20.0).min(self.config.max_sense_range);
        let dx = start_x + theta.cos() * distance;
        let dy = start_y + theta.sin() * distance;
        let end_x = dx as i64;
        let end_y = dy as i64;

        let (inc_x, x_block) = if start_x > dx {
            (-1i64, -start_x)
        } else {
            (1i64, 1.0 - start_x)
        };
        let (inc_y, y_block) = if start_y > dy {
            (-1i64, -start_y)
        } else {
            (1i64, 1.0 - start_y)
        };

        if (start_x - dx).abs() > (start_y - dy).abs() {
            let mut y = start_y as i64;
            let mut overflow = start_y - y as f64;
            if inc_y == 1 {
                overflow = 1.0 - overflow;
            }
            let mut slope = theta.tan().abs();
            if slope > 1.0 {
                slope = ((start_y - dy) / (start_x - dx)).abs();
            }

            // Work off the partial first step so that later steps land on
            // the cell boundaries; the sliver inside the start cell itself
            // is not scored.
            let first_x = (start_x.trunc() + x_block).abs();
            let first_y = (theta.tan() * first_x).abs();
            if overflow - first_y < 0.0 {
                y += inc_y;
                overflow = (overflow - first_y) + 1.0;
            } else {
                overflow -= first_y;
            }

            let standard = slope * cosecant;
            let mut x_motion = -(((start_x.trunc() + x_block) * secant).abs() - measured).abs();
            let mut y_motion = -(((y as f64 + y_block) * cosecant).abs() - measured).abs();

            let mut x = start_x as i64 + inc_x;
            while x != end_x {
                overflow -= slope;
                x_motion += secant;
                let (error, segment) = if overflow < 0.0 {
                    (y_motion.abs(), (overflow + slope) * cosecant)
                } else {
                    (x_motion.abs(), standard)
                };

                let prob = total_prob * self.stop_probability(x as usize, y as usize, segment, id);
                if error < 20.0 {
                    eval += prob * (-(error * error) / (2.0 * variance)).exp();
                }
                total_prob -= prob;

                if overflow < 0.0 {
                    y += inc_y;
                    y_motion += cosecant;
                    let error = x_motion.abs();
                    let segment = -overflow * cosecant;
                    overflow += 1.0;

                    let prob =
                        total_prob * self.stop_probability(x as usize, y as usize, segment, id);
                    if error < 20.0 {
                        eval += prob * (-(error * error) / (2.0 * variance)).exp();
                    }
                    total_prob -= prob;
                }
                x += inc_x;
            }
        } else {
            let mut x = start_x as i64;
            let mut overflow = start_x - x as f64;
            if inc_x == 1 {
                overflow = 1.0 - overflow;
            }
            let slope = 1.0 / theta.tan().abs();

            let first_y = (start_y.trunc() + y_block).abs();
            let first_x = (first_y / theta.tan()).abs();
            if overflow - first_x < 0.0 {
                x += inc_x;
                overflow = (overflow - first_x) + 1.0;
            } else {
                overflow -= first_x;
            }

            let standard = slope * secant;
            let mut x_motion = -(((x as f64 + x_block) * secant).abs() - measured).abs();
            let mut y_motion = -(((start_y.trunc() + y_block) * cosecant).abs() - measured).abs();

            let mut y = start_y as i64 + inc_y;
            while y != end_y {
                y_motion += cosecant;
                overflow -= slope;
                let (error, segment) = if overflow < 0.0 {
                    (x_motion.abs(), (overflow + slope) * secant)
                } else {
                    (y_motion.abs(), standard)
                };

                let prob = total_prob * self.stop_probability(x as usize, y as usize, segment, id);
                if error < 20.0 {
                    eval += prob * (-(error * error) / (2.0 * variance)).exp();
                }
                total_prob -= prob;

                if overflow < 0.0 {
                    x += inc_x;
                    x_motion += secant;
                    let error = y_motion.abs();
                    let segment = -overflow * secant;
                    overflow += 1.0;

                    let prob =
                        total_prob * self.stop_probability(x as usize, y as usize, segment, id);
                    if error < 20.0 {
                        eval += prob * (-(error * error) / (2.0 * variance)).exp();
                    }
                    total_prob -= prob;
                }
                y += inc_y;
            }
        }

        if measured >= self.config.max_sense_range {
            return eval + total_prob;
        }
        if total_prob == 1.0 {
            return 0.0;
        }
        eval / (1.0 - total_prob)
    }
}
