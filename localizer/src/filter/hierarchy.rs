//! The two-level coordinator.
//!
//! Every sensor reading becomes a one-step interval for the fine level.
//! After each of those, the best fine particle's pose change is distilled
//! back into a motion delta; once `LOW_DURATION` of them have piled up,
//! the batch (with its scans) becomes a single interval for the coarse
//! level. Both levels draw from one seeded RNG stream, which is what
//! makes a playback run reproducible.

use rand::rngs::StdRng;
use rand::SeedableRng;

use dpmap::map::MapImage;

use crate::progress::SlamProgress;

use super::motion::{MotionDelta, Pose, Scan};
use super::{LevelConfig, SlamLevel, Step};

pub struct Hierarchy {
    low: SlamLevel,
    high: SlamLevel,
    rng: StdRng,
    low_duration: usize,
    /// Consensus steps waiting to become the next coarse interval.
    pending: Vec<Step>,
    /// Best fine pose at the end of the previous reading.
    last_consensus: Pose,
}

impl Hierarchy {
    pub fn new(low: LevelConfig, high: LevelConfig, low_duration: usize, seed: u64) -> Self {
        let last_consensus = low.start;
        Self {
            low: SlamLevel::new(low),
            high: SlamLevel::new(high),
            rng: StdRng::seed_from_u64(seed),
            low_duration,
            pending: Vec::new(),
            last_consensus,
        }
    }

    /// Feed one (motion delta, scan) pair through the fine level, and the
    /// coarse level when a batch completes. Returns true iff the coarse
    /// level consumed an interval on this call.
    pub fn observe<F: SlamProgress>(&mut self, motion: MotionDelta, scan: Scan, progress: &F) -> bool {
        let step = Step { motion, scan };
        self.low
            .advance(std::slice::from_ref(&step), &mut self.rng, progress);

        if self.low_duration == usize::MAX {
            // Hierarchy disabled; nothing accumulates.
            return false;
        }

        let best = self.low.best().pose;
        let consensus =
            MotionDelta::between(&self.last_consensus, &best, self.low.config().turn_radius);
        self.last_consensus = best;
        self.pending.push(Step {
            motion: consensus,
            scan: step.scan,
        });

        if self.pending.len() >= self.low_duration {
            let batch = std::mem::take(&mut self.pending);
            progress.set_message("coarse interval");
            self.high.advance(&batch, &mut self.rng, progress);
            return true;
        }
        false
    }

    pub fn low(&self) -> &SlamLevel {
        &self.low
    }

    pub fn high(&self) -> &SlamLevel {
        &self.high
    }

    /// Immutable view of the fine level's best map, safe to hand across
    /// threads. Published at interval boundaries only, so a reader never
    /// sees a half-applied interval.
    pub fn snapshot(&self) -> MapImage {
        self.low.map_image()
    }
}
