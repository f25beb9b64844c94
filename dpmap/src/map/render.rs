//! Turning one lineage's view of the map into an image.
//!
//! Reads go through the plain ancestry walk (`occupancy`), never the
//! cache, so rendering is side-effect free and the columns can be computed
//! in parallel.

use rayon::prelude::*;

use super::{AncestryId, DistributedMap};

/// Reserved gray value for cells nobody has observed.
pub const UNKNOWN_GRAY: u8 = 255;

/// Trace length used to probe each cell; a little over one diagonal.
const PROBE_LENGTH: f64 = 1.4;

/// A grayscale map image, cropped to the bounding box of ever-observed
/// cells. Values 254..=251 are reserved for overlay markers; everything
/// else is occupancy (darker = more certainly occupied, 255 = unknown).
#[derive(Clone, Debug, PartialEq)]
pub struct MapImage {
    /// Map coordinates of the crop's lower-left corner.
    pub x0: usize,
    pub y0: usize,
    pub width: usize,
    pub height: usize,
    /// Row major, top row first (highest y), `width * height` values.
    pub pixels: Vec<u8>,
}

impl DistributedMap {
    /// Render the occupancy map as seen by lineage `id`.
    pub fn render(&self, id: AncestryId) -> MapImage {
        let width = self.config.width;
        let height = self.config.height;

        // Column-wise so each rayon task walks one x.
        let columns: Vec<(Vec<u8>, Option<(usize, usize)>)> = (0..width)
            .into_par_iter()
            .map(|x| {
                let mut column = vec![UNKNOWN_GRAY; height];
                let mut bounds: Option<(usize, usize)> = None;
                for (y, px) in column.iter_mut().enumerate() {
                    if let Some(p) = self.occupancy(x, y, PROBE_LENGTH, id) {
                        *px = (230.0 - p * 230.0) as u8;
                        bounds = Some(match bounds {
                            None => (y, y),
                            Some((lo, hi)) => (lo.min(y), hi.max(y)),
                        });
                    }
                }
                (column, bounds)
            })
            .collect();

        let mut x_lo = width;
        let mut x_hi = 0;
        let mut y_lo = height;
        let mut y_hi = 0;
        for (x, (_, bounds)) in columns.iter().enumerate() {
            if let Some((lo, hi)) = bounds {
                x_lo = x_lo.min(x);
                x_hi = x_hi.max(x);
                y_lo = y_lo.min(*lo);
                y_hi = y_hi.max(*hi);
            }
        }
        if x_lo > x_hi {
            // Nothing observed yet; a single unknown pixel keeps the
            // writer honest.
            return MapImage {
                x0: 0,
                y0: 0,
                width: 1,
                height: 1,
                pixels: vec![UNKNOWN_GRAY],
            };
        }

        let out_w = x_hi - x_lo + 1;
        let out_h = y_hi - y_lo + 1;
        let mut pixels = Vec::with_capacity(out_w * out_h);
        for y in (y_lo..=y_hi).rev() {
            for (column, _) in &columns[x_lo..=x_hi] {
                pixels.push(column[y]);
            }
        }

        MapImage {
            x0: x_lo,
            y0: y_lo,
            width: out_w,
            height: out_h,
            pixels,
        }
    }
}
