//! Per-level tuning.
//!
//! The two filter levels run the same algorithm and differ only in these
//! numbers: the fine level works a short horizon with tight noise, the
//! coarse level sees one step per `LOW_DURATION` fine intervals and
//! scatters its proposals wider.

use dpmap::map::MapConfig;

use super::motion::Pose;

/// Fine-level intervals aggregated into one coarse-level interval.
/// `usize::MAX` disables the hierarchy.
pub const LOW_DURATION: usize = 40;

#[derive(Clone, Debug)]
pub struct LevelConfig {
    pub map: MapConfig,
    /// Survivor budget per resample.
    pub particles: usize,
    /// Proposal budget per resample; at least `particles`.
    pub samples: usize,
    /// Beams per scan the sensor is expected to deliver.
    pub sense_number: usize,
    /// Offset of the robot's center of rotation, in cells.
    pub turn_radius: f64,
    /// Gaussian scatter applied to each proposal, cells / radians.
    pub scatter_xy: f64,
    pub scatter_theta: f64,
    /// Log-score margin under the interval best beyond which a proposal
    /// is culled.
    pub thresh: f64,
    /// Culling rounds per scan.
    pub passes: usize,
    /// Intervals between map snapshots; 0 disables.
    pub video: usize,
    pub start: Pose,
}

impl LevelConfig {
    /// The fine, short-horizon level.
    pub fn low() -> Self {
        let map = MapConfig {
            width: 1000,
            height: 1000,
            id_limit: 1000,
            map_scale: 35.0,
            max_sense_range: 7.95 * 35.0,
            prior_dist: 1.0,
            variance: 0.5,
        };
        Self {
            start: Pose {
                x: map.width as f64 / 2.0,
                y: map.height as f64 / 2.0,
                theta: 0.001,
            },
            map,
            particles: 100,
            samples: 300,
            sense_number: 181,
            turn_radius: 0.32 * 35.0,
            scatter_xy: 0.5,
            scatter_theta: 0.02,
            thresh: 12.0,
            passes: 9,
            video: 10,
        }
    }

    /// The coarse, long-horizon level.
    pub fn high() -> Self {
        let map = MapConfig {
            width: 1400,
            height: 1400,
            id_limit: 500,
            map_scale: 35.0,
            max_sense_range: 7.95 * 35.0,
            prior_dist: 4.0,
            variance: 2.0,
        };
        Self {
            start: Pose {
                x: map.width as f64 / 2.0,
                y: map.height as f64 / 2.0 + 100.0,
                theta: 0.001,
            },
            map,
            particles: 60,
            samples: 180,
            sense_number: 181,
            turn_radius: 0.32 * 35.0,
            scatter_xy: 0.8,
            scatter_theta: 0.025,
            thresh: 12.0,
            passes: 9,
            video: 1,
        }
    }

    /// Probability floor for a single beam score.
    pub fn max_trace_error(&self) -> f64 {
        (-24.0 / self.map.variance).exp()
    }
}
