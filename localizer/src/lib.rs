//! # Localizer
//!
//! The particle filter half of hierarchical SLAM: proposal expansion and
//! scoring against a distributed particle map, multinomial resampling,
//! the ancestry maintenance schedule, and the two-level coordinator that
//! runs a fine short-horizon filter inside a coarse long-horizon one.

pub mod filter;
pub mod progress;
