//! # Distributed Particle Maps
//!
//! Core data structures for Rao-Blackwellized particle filter SLAM over an
//! occupancy grid. Each grid cell stores one observation entry per particle
//! lineage that has actually written to it, and an ancestry tree lets
//! descendant particles inherit the observations of their ancestors without
//! copying a single cell. See the `map` module for the full story.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;

use ahash::AHasher;

pub mod map;

pub type AHashMap<K, V> = HashMap<K, V, BuildHasherDefault<AHasher>>;
pub type AHashSet<T> = HashSet<T, BuildHasherDefault<AHasher>>;
