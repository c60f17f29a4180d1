//! Error types for configuration and BVH loading.

use thiserror::Error;

/// Invalid simulation configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("particle count must be non-zero")]
    NoParticles,
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f32 },
    #[error("grid resolution {0} outside 1..=256")]
    GridResolution(u32),
    #[error("{name} must lie in [0, 1], got {value}")]
    Restitution { name: &'static str, value: f32 },
    #[error("global bounds are empty: min {min:?}, max {max:?}")]
    EmptyBounds { min: [f32; 3], max: [f32; 3] },
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Malformed compressed BVH data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BvhError {
    #[error("BVH has no nodes")]
    Empty,
    #[error("node {node} references child {child} but only {count} nodes exist")]
    ChildOutOfRange { node: usize, child: usize, count: usize },
    #[error("node {node} references triangle {triangle} but only {count} triangles exist")]
    TriangleOutOfRange {
        node: usize,
        triangle: usize,
        count: usize,
    },
    #[error("index buffer has {indices} entries for {triangles} triangles")]
    IndexCountMismatch { indices: usize, triangles: usize },
    #[error("cannot pack {count} triangles into one node (max {max})")]
    TooManyTriangles { count: usize, max: usize },
    #[error("cannot pack {0} child groups (max 8)")]
    TooManyChildren(usize),
    #[error("node buffer length {0} is not a multiple of 80 bytes")]
    Misaligned(usize),
}

/// Errors surfaced by the CPU simulation front end.
#[derive(Debug, Error)]
pub enum SphError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bvh(#[from] BvhError),
    #[error("expected {expected} particles, got {actual}")]
    ParticleCount { expected: usize, actual: usize },
}
