use rand::rngs::StdRng;
use rand::SeedableRng;

use dpmap::map::MapConfig;

use crate::progress::SilentProgress;

use super::*;

fn test_config() -> LevelConfig {
    LevelConfig {
        map: MapConfig {
            width: 300,
            height: 300,
            id_limit: 64,
            map_scale: 35.0,
            max_sense_range: 30.0,
            prior_dist: 1.0,
            variance: 0.5,
        },
        particles: 5,
        samples: 12,
        sense_number: 3,
        turn_radius: 0.32 * 35.0,
        scatter_xy: 0.5,
        scatter_theta: 0.02,
        thresh: 12.0,
        passes: 3,
        video: 0,
        start: Pose {
            x: 150.0,
            y: 150.0,
            theta: 0.001,
        },
    }
}

/// Three beams that never return; they sweep distance into the map but
/// leave no hits, so every proposal scores them the same.
fn no_return_scan(config: &LevelConfig) -> Scan {
    [-0.3, 0.0, 0.3]
        .iter()
        .map(|&theta| Beam {
            theta,
            distance: config.map.max_sense_range,
        })
        .collect()
}

#[test]
fn motion_model_inverts_exactly() {
    let turn_radius = 11.2;
    let poses = [
        (
            Pose { x: 10.0, y: 20.0, theta: 0.4 },
            Pose { x: 12.5, y: 19.0, theta: 0.9 },
        ),
        (
            Pose { x: 5.0, y: 5.0, theta: -2.8 },
            Pose { x: 4.2, y: 7.7, theta: 3.0 },
        ),
        (
            Pose { x: 0.0, y: 0.0, theta: 0.0 },
            Pose { x: -3.0, y: 1.0, theta: -0.1 },
        ),
    ];
    for (from, to) in poses.iter() {
        let delta = MotionDelta::between(from, to, turn_radius);
        let back = from.advance(&delta, turn_radius);
        assert!(
            (back.x - to.x).abs() < 1e-9
                && (back.y - to.y).abs() < 1e-9
                && normalize_angle(back.theta - to.theta).abs() < 1e-9,
            "{:?} + {:?} landed on {:?}, wanted {:?}",
            from, delta, back, to
        );
    }
}

#[test]
fn children_exhaust_the_sample_budget() {
    let config = test_config();
    let scan = no_return_scan(&config);
    let mut level = SlamLevel::new(config.clone());
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..4 {
        let step = Step {
            motion: MotionDelta {
                forward: 1.5,
                lateral: 0.0,
                turn: 0.0,
            },
            scan: scan.clone(),
        };
        level.advance(std::slice::from_ref(&step), &mut rng, &SilentProgress);

        let granted: usize = level.children().iter().sum();
        assert_eq!(granted, config.samples);
        assert!(level.particles().len() <= config.particles);
        assert_eq!(level.particles().len(), level.children().len());
        level.map().check_consistency();
    }
}

#[test]
fn square_loop_returns_home() {
    let mut config = test_config();
    // Noise-free input: the scatter is vanishingly small and the scans
    // carry no evidence, so the best particle just integrates the motion.
    config.scatter_xy = 1e-9;
    config.scatter_theta = 1e-9;
    let scan = no_return_scan(&config);
    let mut level = SlamLevel::new(config.clone());
    let mut rng = StdRng::seed_from_u64(1);

    let forward = Step {
        motion: MotionDelta {
            forward: 2.0,
            lateral: 0.0,
            turn: 0.0,
        },
        scan: scan.clone(),
    };
    let turn = Step {
        motion: MotionDelta {
            forward: 0.0,
            lateral: 0.0,
            turn: std::f64::consts::FRAC_PI_2,
        },
        scan: scan.clone(),
    };

    for _side in 0..4 {
        for _ in 0..4 {
            level.advance(std::slice::from_ref(&forward), &mut rng, &SilentProgress);
        }
        level.advance(std::slice::from_ref(&turn), &mut rng, &SilentProgress);
    }

    let home = level.best().pose;
    let drift = ((home.x - config.start.x).powi(2) + (home.y - config.start.y).powi(2)).sqrt();
    assert!(
        drift < 1.0,
        "best particle ended {} cells from home at {:?}",
        drift, home
    );
    level.map().check_consistency();
}

#[test]
fn identical_seeds_reproduce_the_run() {
    let config = test_config();
    let scan = no_return_scan(&config);

    let run = |seed: u64| {
        let mut level = SlamLevel::new(config.clone());
        let mut rng = StdRng::seed_from_u64(seed);
        for i in 0..6 {
            let step = Step {
                motion: MotionDelta {
                    forward: 1.0,
                    lateral: 0.0,
                    turn: if i % 3 == 0 { 0.1 } else { 0.0 },
                },
                scan: scan.clone(),
            };
            level.advance(std::slice::from_ref(&step), &mut rng, &SilentProgress);
        }
        (level.best().pose, level.map_image())
    };

    let (pose_a, image_a) = run(42);
    let (pose_b, image_b) = run(42);
    assert_eq!(pose_a, pose_b);
    assert_eq!(image_a, image_b);

    let (pose_c, _) = run(43);
    // Not a guarantee in principle, but with this much scatter two seeds
    // agreeing to the bit would mean the RNG is not being consulted.
    assert_ne!(pose_a, pose_c);
}

#[test]
fn hierarchy_feeds_the_coarse_level_in_batches() {
    let low = test_config();
    let mut high = test_config();
    high.scatter_xy = 0.8;
    high.scatter_theta = 0.025;
    let scan = no_return_scan(&low);

    let mut hierarchy = Hierarchy::new(low.clone(), high, 4, 1);
    let mut batches = 0;
    for _ in 0..8 {
        let consumed = hierarchy.observe(
            MotionDelta {
                forward: 1.0,
                lateral: 0.0,
                turn: 0.0,
            },
            scan.clone(),
            &SilentProgress,
        );
        if consumed {
            batches += 1;
        }
    }

    assert_eq!(batches, 2);
    assert_eq!(hierarchy.low().generation(), 8);
    assert_eq!(hierarchy.high().generation(), 2);

    let snapshot = hierarchy.snapshot();
    assert_eq!(snapshot.pixels.len(), snapshot.width * snapshot.height);

    hierarchy.low().map().check_consistency();
    hierarchy.high().map().check_consistency();
}
