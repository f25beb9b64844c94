//! # The per-level particle filter
//!
//! One `SlamLevel` owns a distributed particle map and a particle set,
//! and advances them one *interval* at a time. An interval is a sequence
//! of (motion delta, scan) sub-steps: the fine level gets one sub-step
//! per sensor reading, the coarse level gets a whole batch distilled from
//! the fine level's consensus.
//!
//! Per interval: expand the surviving particles into the full proposal
//! budget (remembering the Gaussian scatter applied to each), walk every
//! proposal through the sub-steps while scoring its scan matches and
//! culling hopeless stragglers, resample children multinomially, run the
//! ancestry maintenance schedule, and finally replay the interval's
//! motion to commit the surviving trajectories into the map.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use dpmap::map::{AncestryId, DistributedMap, MapImage};

use crate::progress::SlamProgress;

pub use self::config::{LevelConfig, LOW_DURATION};
pub use self::hierarchy::Hierarchy;
pub use self::motion::{normalize_angle, Beam, MotionDelta, Pose, Scan};

mod config;
mod hierarchy;
mod motion;

#[cfg(test)]
mod test;

/// Log probability branding a culled proposal.
const WORST_POSSIBLE: f64 = -1.0e7;

/// One motion/observation pair of an interval.
#[derive(Clone, Debug)]
pub struct Step {
    pub motion: MotionDelta,
    pub scan: Scan,
}

/// A surviving hypothesis: where the robot is, and which lineage's view
/// of the map it believes.
#[derive(Clone, Copy, Debug)]
pub struct Particle {
    pub pose: Pose,
    pub ancestor: AncestryId,
    pub weight: f64,
}

/// A proposal under evaluation. The scatter is remembered separately from
/// the pose so the commit replay can rebuild the exact same perturbed
/// trajectory on top of the parent.
struct Sample {
    pose: Pose,
    jitter: (f64, f64, f64),
    log_prob: f64,
    parent: usize,
}

pub struct SlamLevel {
    config: LevelConfig,
    map: DistributedMap,
    particles: Vec<Particle>,
    /// Children granted to each particle at the last resample; consumed
    /// by the next proposal expansion.
    children: Vec<usize>,
    generation: i32,
    max_trace_error: f64,
}

impl SlamLevel {
    pub fn new(config: LevelConfig) -> Self {
        assert!(
            config.samples >= config.particles,
            "sample budget must cover the particle budget"
        );
        let map = DistributedMap::new(config.map.clone());
        let root = map.root();
        let particles = vec![Particle {
            pose: config.start,
            ancestor: root,
            weight: 1.0,
        }];
        let children = vec![config.samples];
        let max_trace_error = config.max_trace_error();
        Self {
            config,
            map,
            particles,
            children,
            generation: 0,
            max_trace_error,
        }
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }

    pub fn map(&self) -> &DistributedMap {
        &self.map
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub fn generation(&self) -> i32 {
        self.generation
    }

    pub fn best(&self) -> &Particle {
        let mut best = 0;
        for (i, p) in self.particles.iter().enumerate() {
            if p.weight > self.particles[best].weight {
                best = i;
            }
        }
        &self.particles[best]
    }

    /// Render the map as the best particle sees it.
    pub fn map_image(&self) -> MapImage {
        self.map.render(self.best().ancestor)
    }

    /// Consume one interval.
    pub fn advance<F: SlamProgress>(&mut self, interval: &[Step], rng: &mut StdRng, progress: &F) {
        self.map
            .set_roster(self.particles.iter().map(|p| p.ancestor).collect());
        self.map.reset_observations();

        if self.generation == 0 {
            // Nothing to localize against yet; the first interval seeds
            // the map under the initial particle.
            self.add_to_world_model(interval);
        } else {
            let (saved, children) = self.localize(interval, rng, progress);
            self.update_ancestry(interval, saved, children);
        }

        self.generation += 1;
        self.map.reset_observations();
    }

    /// Proposal expansion, scoring and resampling. Returns the survivors
    /// (posed at their parent plus remembered jitter, ready for the
    /// commit replay) and their children counts.
    fn localize<F: SlamProgress>(
        &mut self,
        interval: &[Step],
        rng: &mut StdRng,
        progress: &F,
    ) -> (Vec<Particle>, Vec<usize>) {
        let n = self.config.samples;
        let scatter_xy = Normal::new(0.0, self.config.scatter_xy).unwrap();
        let scatter_theta = Normal::new(0.0, self.config.scatter_theta).unwrap();

        // Hand the proposal budget out according to the children counts
        // fixed at the previous resample.
        let mut samples: Vec<Sample> = Vec::with_capacity(n);
        for (parent, particle) in self.particles.iter().enumerate() {
            for _ in 0..self.children[parent] {
                let jitter = (
                    scatter_xy.sample(rng),
                    scatter_xy.sample(rng),
                    scatter_theta.sample(rng),
                );
                samples.push(Sample {
                    pose: Pose {
                        x: particle.pose.x + jitter.0,
                        y: particle.pose.y + jitter.1,
                        theta: particle.pose.theta + jitter.2,
                    },
                    jitter,
                    log_prob: 0.0,
                    parent,
                });
            }
        }
        debug_assert_eq!(samples.len(), n);
        for count in self.children.iter_mut() {
            *count = 0;
        }

        let passes = self.config.passes.max(1);
        let mut threshold = WORST_POSSIBLE;
        let mut best = 0;

        for step in interval {
            self.map.reset_observations();
            let mut keepers = 0;
            best = 0;

            for sample in samples.iter_mut() {
                if sample.log_prob > threshold {
                    keepers += 1;
                    sample.pose = sample.pose.advance(&step.motion, self.config.turn_radius);
                } else {
                    sample.log_prob = WORST_POSSIBLE;
                }
            }

            // Score the scan in culling rounds: every live proposal sees
            // the same beams, then anything too far behind the best stops
            // getting paid for.
            let chunk = ((step.scan.len() + passes - 1) / passes).max(1);
            let mut lo = 0;
            while lo < step.scan.len() {
                let hi = (lo + chunk).min(step.scan.len());
                for i in 0..samples.len() {
                    if samples[i].log_prob <= WORST_POSSIBLE {
                        continue;
                    }
                    let pose = samples[i].pose;
                    let lineage = self.particles[samples[i].parent].ancestor;
                    let mut gained = 0.0;
                    for beam in &step.scan[lo..hi] {
                        let p = self.map.line_trace(
                            pose.x,
                            pose.y,
                            beam.theta + pose.theta,
                            beam.distance,
                            lineage,
                        );
                        gained += p.max(self.max_trace_error).ln();
                    }
                    samples[i].log_prob += gained;
                    if samples[i].log_prob > samples[best].log_prob {
                        best = i;
                    }
                }
                threshold = samples[best].log_prob - self.config.thresh;
                for sample in samples.iter_mut() {
                    if sample.log_prob < threshold {
                        sample.log_prob = WORST_POSSIBLE;
                    }
                }
                lo = hi;
            }

            progress.println(&format!(
                " ** {}  {:.4}     {}",
                best, samples[best].log_prob, keepers
            ));
        }

        // Exponentiate relative to the best and normalize.
        let best_log = samples[best].log_prob;
        let mut weights: Vec<f64> = Vec::with_capacity(n);
        let mut total = 0.0;
        for sample in &samples {
            let w = if sample.log_prob <= WORST_POSSIBLE {
                0.0
            } else {
                (sample.log_prob - best_log).exp()
            };
            total += w;
            weights.push(w);
        }
        for w in weights.iter_mut() {
            *w /= total;
        }

        // Multinomial draw until the sample budget is spent or the
        // distinct-parent budget is full.
        let mut granted = vec![0usize; n];
        let mut survivors = 0;
        let mut assigned = 0;
        while assigned < n && survivors < self.config.particles {
            let mut pick = 0;
            let mut ftemp: f64 = rng.gen();
            while ftemp > weights[pick] && pick + 1 < n {
                ftemp -= weights[pick];
                pick += 1;
            }
            if granted[pick] == 0 {
                survivors += 1;
            }
            granted[pick] += 1;
            assigned += 1;
        }

        // The survivors restart from the parent pose plus their jitter;
        // the commit replay walks the interval's motion again on top.
        let mut saved: Vec<Particle> = Vec::new();
        let mut saved_children: Vec<usize> = Vec::new();
        for (i, sample) in samples.iter().enumerate() {
            if granted[i] == 0 {
                continue;
            }
            let parent = &self.particles[sample.parent];
            self.map.increment_children(parent.ancestor);
            saved.push(Particle {
                pose: Pose {
                    x: parent.pose.x + sample.jitter.0,
                    y: parent.pose.y + sample.jitter.1,
                    theta: parent.pose.theta + sample.jitter.2,
                },
                ancestor: parent.ancestor,
                weight: weights[i],
            });
            saved_children.push(granted[i]);
        }

        // Hit the distinct-parent cap before the sample budget ran out:
        // renormalize over the chosen set and keep drawing children into
        // the already-chosen parents.
        if assigned < n {
            let total: f64 = saved.iter().map(|p| p.weight).sum();
            for p in saved.iter_mut() {
                p.weight /= total;
            }
            let total: f64 = saved.iter().map(|p| p.weight).sum();
            while assigned < n {
                let mut pick = 0;
                let mut ftemp: f64 = rng.gen::<f64>() * total;
                while ftemp > saved[pick].weight && pick + 1 < saved.len() {
                    ftemp -= saved[pick].weight;
                    pick += 1;
                }
                saved_children[pick] += 1;
                assigned += 1;
            }
        }

        progress.set_message(&format!("{} of {} parents kept", saved.len(), n));
        (saved, saved_children)
    }

    /// The maintenance schedule: prune lineages that died with the old
    /// particle set, collapse what narrowed to a single child, re-point
    /// the survivors, commit the interval under their IDs, and only then
    /// recycle the collapsed nodes (no stale reference can remain once
    /// the commit has run).
    fn update_ancestry(&mut self, interval: &[Step], mut saved: Vec<Particle>, children: Vec<usize>) {
        let generation = self.generation;

        let old: Vec<AncestryId> = self.particles.iter().map(|p| p.ancestor).collect();
        for id in old {
            self.map.prune_lineage(id, generation);
        }

        self.map.collapse_branches();

        for particle in saved.iter_mut() {
            particle.ancestor = self.map.adopt(particle.ancestor, generation);
        }

        self.particles = saved;
        self.children = children;
        self.map
            .set_roster(self.particles.iter().map(|p| p.ancestor).collect());

        self.add_to_world_model(interval);
        self.map.reclaim_collapsed();
    }

    /// Replay the interval's motion for every particle and trace its
    /// scans into the map under its lineage.
    fn add_to_world_model(&mut self, interval: &[Step]) {
        let range = self.config.map.max_sense_range;
        let turn_radius = self.config.turn_radius;
        for step in interval {
            self.map.reset_observations();
            for i in 0..self.particles.len() {
                let pose = self.particles[i].pose.advance(&step.motion, turn_radius);
                self.particles[i].pose = pose;
                let lineage = self.particles[i].ancestor;
                for beam in &step.scan {
                    self.map.add_trace(
                        pose.x,
                        pose.y,
                        beam.theta + pose.theta,
                        beam.distance,
                        lineage,
                        beam.distance < range,
                    );
                }
            }
        }
    }
}
