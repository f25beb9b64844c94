use super::render::UNKNOWN_GRAY;
use super::*;

fn config() -> MapConfig {
    MapConfig {
        width: 200,
        height: 200,
        id_limit: 16,
        map_scale: 35.0,
        max_sense_range: 60.0,
        prior_dist: 4.0,
        variance: 2.0,
    }
}

fn fresh_map() -> DistributedMap {
    let mut map = DistributedMap::new(config());
    let root = map.root();
    map.set_roster(vec![root]);
    map
}

fn observed_cells(map: &DistributedMap) -> Vec<(usize, usize)> {
    let mut cells = vec![];
    for y in 0..map.config().height {
        for x in 0..map.config().width {
            if map.cell(x, y).is_some() {
                cells.push((x, y));
            }
        }
    }
    cells
}

// A hair off the axis; exactly 0 makes the cosecant infinite, which the
// traversal (like the sensor) never sees in practice.
const NEARLY_ZERO: f64 = 1e-6;

#[test]
fn single_beam_straight_ahead() {
    let mut map = fresh_map();
    let root = map.root();

    map.add_trace(100.5, 100.5, NEARLY_ZERO, 5.0, root, true);

    for x in 101..=104 {
        let cell = map.cell(x, 100).expect("beam should have crossed this cell");
        assert_eq!(cell.entries.len(), 1);
        let entry = &cell.entries[0];
        assert_eq!(entry.hits, 0.0);
        assert!(
            (entry.distance - (1.0 + map.config().prior_dist)).abs() < 1e-3,
            "cell ({}, 100) carries distance {}",
            x,
            entry.distance
        );
    }
    let terminal = map.cell(105, 100).expect("terminal cell missing");
    assert_eq!(terminal.entries[0].hits, 1.0);

    map.check_consistency();
}

#[test]
fn no_return_beam_never_hits() {
    let mut map = fresh_map();
    let root = map.root();
    let range = map.config().max_sense_range;

    map.add_trace(100.0, 100.0, 0.3, range, root, false);

    for (x, y) in observed_cells(&map) {
        let cell = map.cell(x, y).unwrap();
        for entry in &cell.entries {
            assert_eq!(entry.hits, 0.0, "no-return beam left a hit at ({}, {})", x, y);
        }
    }

    map.reset_observations();
    let p = map.line_trace(100.0, 100.0, 0.3, range, root);
    assert!(p > 0.0 && p <= 1.0, "no-return credit out of range: {}", p);
}

#[test]
fn line_trace_on_unknown_map_is_a_probability() {
    let mut map = fresh_map();
    let root = map.root();

    let p = map.line_trace(100.0, 100.0, 0.7, 12.0, root);
    assert!((0.0..=1.0).contains(&p), "got {}", p);

    map.reset_observations();
    let p = map.line_trace(100.0, 100.0, 0.7, map.config().max_sense_range, root);
    assert!((0.0..=1.0).contains(&p), "got {}", p);
}

#[test]
fn zero_evidence_cells_short_circuit() {
    let mut map = fresh_map();
    let root = map.root();
    let range = map.config().max_sense_range;

    // A corridor of pass-through observations, no hits anywhere.
    map.add_trace(100.0, 100.0, NEARLY_ZERO, range, root, false);
    map.reset_observations();

    // A shorter beam down the same corridor never leaves the zero-hit
    // cells (the 20 cell margin included), so nothing can stop it.
    let p = map.line_trace(100.0, 100.0, NEARLY_ZERO, range - 30.0, root);
    assert_eq!(p, 0.0);
}

#[test]
fn commit_then_prune_restores_the_grid() {
    let mut map = fresh_map();
    let root = map.root();

    map.increment_children(root);
    let child = map.adopt(root, 1);
    assert_ne!(child, root);
    map.set_roster(vec![child]);

    map.add_trace(100.0, 100.0, 0.4, 20.0, child, true);
    map.reset_observations();
    assert!(!observed_cells(&map).is_empty());
    map.check_consistency();

    map.prune_lineage(child, 2);
    assert!(observed_cells(&map).is_empty(), "grid should be empty again");
    assert!(!map.ancestry.is_live(child));
}

#[test]
fn collapse_preserves_occupancy() {
    let mut map = fresh_map();
    let root = map.root();

    // root -> a -> {b, c}; killing c leaves b as an only child, which the
    // maintenance pass folds into a.
    map.increment_children(root);
    let a = map.adopt(root, 1);
    map.increment_children(a);
    map.increment_children(a);
    let b = map.adopt(a, 2);
    let c = map.adopt(a, 2);
    assert!(a != b && b != c);
    map.set_roster(vec![b, c]);

    for i in 0..5 {
        let theta = 0.2 + 0.1 * i as f64;
        map.add_trace(100.0, 100.0, theta, 25.0, b, true);
    }
    map.reset_observations();

    let cells = observed_cells(&map);
    let before: Vec<Option<f64>> = cells
        .iter()
        .map(|&(x, y)| map.occupancy(x, y, 1.4, b))
        .collect();

    map.prune_lineage(c, 3);
    map.collapse_branches();
    let merged = map.forward_collapsed(b);
    assert_eq!(merged, a);
    map.reclaim_collapsed();
    map.set_roster(vec![merged]);

    let after: Vec<Option<f64>> = cells
        .iter()
        .map(|&(x, y)| map.occupancy(x, y, 1.4, merged))
        .collect();
    assert_eq!(before, after);
    map.check_consistency();
}

#[test]
fn surviving_branch_matches_single_particle_run() {
    let mut branched = fresh_map();
    let root = branched.root();

    branched.increment_children(root);
    branched.increment_children(root);
    let a = branched.adopt(root, 1);
    let b = branched.adopt(root, 1);
    assert_ne!(a, b);
    branched.set_roster(vec![a, b]);

    for i in 0..4 {
        let theta = 0.15 * i as f64 + 0.1;
        branched.add_trace(100.0, 100.0, theta, 22.0, a, true);
        branched.add_trace(100.0, 100.0, -theta, 22.0, b, true);
        branched.reset_observations();
    }

    // Branch b dies; a's view must now match a run that never branched.
    branched.prune_lineage(b, 2);
    branched.collapse_branches();
    let a = branched.forward_collapsed(a);
    branched.reclaim_collapsed();
    branched.set_roster(vec![a]);
    branched.check_consistency();

    let mut plain = fresh_map();
    let plain_root = plain.root();
    for i in 0..4 {
        let theta = 0.15 * i as f64 + 0.1;
        plain.add_trace(100.0, 100.0, theta, 22.0, plain_root, true);
        plain.reset_observations();
    }

    let cells = observed_cells(&plain);
    assert_eq!(observed_cells(&branched), cells);
    for (x, y) in cells {
        let lhs = branched.occupancy(x, y, 1.4, a);
        let rhs = plain.occupancy(x, y, 1.4, plain_root);
        match (lhs, rhs) {
            (Some(l), Some(r)) => assert!(
                (l - r).abs() < 1e-12,
                "occupancy diverged at ({}, {}): {} vs {}",
                x, y, l, r
            ),
            (l, r) => assert_eq!(l, r, "at ({}, {})", x, y),
        }
    }
}

#[test]
fn id_recycling_under_churn() {
    let mut map = fresh_map();
    let root = map.root();
    let id_limit = map.config().id_limit;

    // One lineage forks into two every generation; one fork dies the
    // generation after. Runs long enough to recycle the whole ID space
    // many times over.
    let mut survivor = root;
    let mut doomed: Option<AncestryId> = None;
    for generation in 1..(10 * id_limit as i32) {
        let old: Vec<AncestryId> = doomed.iter().cloned().chain(Some(survivor)).collect();

        map.increment_children(survivor);
        map.increment_children(survivor);
        for id in old {
            map.prune_lineage(id, generation);
        }
        map.collapse_branches();
        let a = map.adopt(survivor, generation);
        let b = map.adopt(survivor, generation);
        map.set_roster(vec![a, b]);

        let theta = 0.1 + 0.01 * (generation % 50) as f64;
        map.add_trace(100.0, 100.0, theta, 15.0, a, true);
        map.add_trace(100.0, 100.0, -theta, 15.0, b, true);
        map.reclaim_collapsed();
        map.reset_observations();

        map.check_consistency();
        survivor = a;
        doomed = Some(b);
    }
    println!("survived churn with {} free IDs", map.ancestry.free_ids());
}

#[test]
fn axis_dominance_is_symmetric_under_reflection() {
    let theta = (2.0f64 / 3.0).atan();

    let mut flat = fresh_map();
    let root = flat.root();
    flat.add_trace(50.3, 60.7, theta, 30.0, root, true);

    let mut steep = fresh_map();
    let steep_root = steep.root();
    steep.add_trace(60.7, 50.3, std::f64::consts::FRAC_PI_2 - theta, 30.0, steep_root, true);

    let mut flat_cells: Vec<(usize, usize)> = observed_cells(&flat);
    flat_cells.sort();
    let mirrored: Vec<(usize, usize)> = {
        let mut m: Vec<(usize, usize)> = observed_cells(&steep)
            .into_iter()
            .map(|(x, y)| (y, x))
            .collect();
        m.sort();
        m
    };
    assert_eq!(flat_cells, mirrored);

    for &(x, y) in &flat_cells {
        let a = &flat.cell(x, y).unwrap().entries[0];
        let b = &steep.cell(y, x).unwrap().entries[0];
        assert!(
            (a.distance - b.distance).abs() < 1e-9,
            "segment length differs at ({}, {}): {} vs {}",
            x, y, a.distance, b.distance
        );
        assert_eq!(a.hits, b.hits);
    }
}

#[test]
fn render_crops_to_observed_bounds() {
    let mut map = fresh_map();
    let root = map.root();
    map.add_trace(100.0, 100.0, 0.3, 20.0, root, true);
    map.reset_observations();

    let image = map.render(root);
    assert!(image.width >= 1 && image.height >= 1);
    assert_eq!(image.pixels.len(), image.width * image.height);
    assert!(
        image.pixels.iter().any(|&p| p != UNKNOWN_GRAY),
        "rendered image shows nothing observed"
    );

    // Unknown surroundings are cropped away entirely for a single beam.
    assert!(image.width <= 25 && image.height <= 25);
}
