//! Tunable simulation parameters.
//!
//! Particle radius and mass are not stored; they follow from the target fluid
//! volume, rest density and particle count so that a block packed at a spacing of
//! one diameter sits at rest density.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_GRID_RESOLUTION, DEFAULT_PARTICLE_COUNT, GRAVITY, MAX_GRID_RESOLUTION, REST_DENSITY,
};
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SphConfig {
    /// Fixed particle count. No births or deaths after construction.
    pub particle_count: u32,
    /// Volume of fluid represented by all particles (m^3).
    pub volume: f32,
    pub rest_density: f32,
    /// Smoothing radius H in particle radii.
    pub smoothing_scale: f32,
    pub time_step: f32,
    /// Stiffness of the clamped equation of state.
    pub gas_constant: f32,
    pub viscosity: f32,
    /// Magnitude of gravity along -Y.
    pub gravity: f32,
    pub surface_tension: f32,
    /// Minimum colour-field gradient before surface tension is applied.
    pub surface_threshold: f32,
    /// Velocity retained after bouncing off the global box or a surface.
    pub wall_restitution: f32,
    /// Velocity retained by the gravity-only integrator.
    pub free_fall_restitution: f32,
    /// Distance kept from a mesh surface after a collision resolve.
    pub collision_tolerance: f32,
    /// Extra reach of a particle's motion ray beyond its step length.
    pub ray_tolerance: f32,
    /// Cube resolution of the cell-count buffer.
    pub grid_resolution: u32,
}

impl Default for SphConfig {
    fn default() -> Self {
        Self {
            particle_count: DEFAULT_PARTICLE_COUNT,
            volume: 1.0,
            rest_density: REST_DENSITY,
            smoothing_scale: 8.0,
            time_step: 1.0 / 60.0,
            gas_constant: 20.0,
            viscosity: 10.0,
            gravity: GRAVITY,
            surface_tension: 0.6,
            surface_threshold: 10.0,
            wall_restitution: 0.94,
            free_fall_restitution: 0.5,
            collision_tolerance: 0.001,
            ray_tolerance: 0.05,
            grid_resolution: DEFAULT_GRID_RESOLUTION,
        }
    }
}

impl SphConfig {
    /// Config for `count` particles keeping the default particle radius.
    pub fn with_particle_count(count: u32) -> Self {
        let defaults = Self::default();
        let per_particle = defaults.volume / defaults.particle_count as f32;
        Self {
            particle_count: count,
            volume: per_particle * count as f32,
            ..defaults
        }
    }

    pub fn particle_radius(&self) -> f32 {
        (self.volume / self.particle_count as f32).cbrt() * 0.5
    }

    pub fn particle_mass(&self) -> f32 {
        self.rest_density * self.volume / self.particle_count as f32
    }

    /// Smoothing radius H.
    pub fn smoothing_radius(&self) -> f32 {
        self.particle_radius() * self.smoothing_scale
    }

    /// Number of cells in the fixed cell-count buffer.
    pub fn grid_capacity(&self) -> u32 {
        self.grid_resolution.pow(3)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.particle_count == 0 {
            return Err(ConfigError::NoParticles);
        }
        for (name, value) in [
            ("volume", self.volume),
            ("rest_density", self.rest_density),
            ("smoothing_scale", self.smoothing_scale),
            ("time_step", self.time_step),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if !(1..=MAX_GRID_RESOLUTION).contains(&self.grid_resolution) {
            return Err(ConfigError::GridResolution(self.grid_resolution));
        }
        for (name, value) in [
            ("wall_restitution", self.wall_restitution),
            ("free_fall_restitution", self.free_fall_restitution),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Restitution { name, value });
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        // A struct of plain numbers always serializes.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
