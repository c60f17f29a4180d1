//! SPH smoothing kernels (Muller et al. 2003 family).
//!
//! - density: poly6, `315 / (64 pi h^9) (h^2 - r^2)^3`
//! - pressure gradient: spiky, `-45 / (pi h^6) (h - r)^2 / r`
//! - viscosity Laplacian: `45 / (pi h^6) (h - r)`
//! - surface tension: poly6 gradient and Laplacian factors over `r^2 - h^2`,
//!   plus a self term `-945 * 3 / (32 pi h^5)` seeding the Laplacian

use std::f32::consts::PI;

use crate::constants::ZERO_DISTANCE_DIVISOR;

/// Gradient and Laplacian factors of the colour field for one neighbour.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TensionTerms {
    /// Scalar multiplying the pair offset to give the colour-field gradient.
    pub gradient: f32,
    pub laplacian: f32,
}

/// Kernel coefficients for a fixed smoothing radius.
#[derive(Clone, Copy, Debug)]
pub struct SphKernels {
    pub h: f32,
    pub h2: f32,
    poly6: f32,
    spiky_grad: f32,
    visc_lap: f32,
    tension: f32,
    tension_self: f32,
}

impl SphKernels {
    pub fn new(h: f32) -> Self {
        let h2 = h * h;
        let h6 = h2 * h2 * h2;
        let h5 = h2 * h2 * h;
        let h9 = h6 * h2 * h;
        Self {
            h,
            h2,
            poly6: 315.0 / (64.0 * PI * h9),
            spiky_grad: -45.0 / (PI * h6),
            visc_lap: 45.0 / (PI * h6),
            tension: -945.0 / (32.0 * PI * h9),
            tension_self: -945.0 * 3.0 / (32.0 * PI * h5),
        }
    }

    /// Poly6 weight for a squared distance. Zero outside the support.
    #[inline]
    pub fn density(&self, dist_sq: f32) -> f32 {
        if dist_sq > self.h2 {
            return 0.0;
        }
        let d = self.h2 - dist_sq;
        self.poly6 * d * d * d
    }

    /// Spiky gradient magnitude divided by distance, so multiplying by the pair
    /// offset yields the gradient vector.
    ///
    /// A zero distance substitutes a large divisor instead of producing a
    /// non-finite force.
    #[inline]
    pub fn pressure_gradient(&self, dist: f32) -> f32 {
        let falloff = (self.h - dist) * (self.h - dist);
        if dist == 0.0 {
            self.spiky_grad / ZERO_DISTANCE_DIVISOR * falloff
        } else {
            self.spiky_grad / dist * falloff
        }
    }

    #[inline]
    pub fn viscosity_laplacian(&self, dist: f32) -> f32 {
        self.visc_lap * (self.h - dist)
    }

    #[inline]
    /// A particle's own colour-field Laplacian weight, before the `1 / density`
    /// factor. Added once on top of the pair sum.
    #[inline]
    pub fn tension_self(&self) -> f32 {
        self.tension_self
    }

    pub fn surface_tension(&self, dist_sq: f32) -> TensionTerms {
        let r2_minus_h2 = dist_sq - self.h2;
        let scaled = self.tension * r2_minus_h2;
        TensionTerms {
            gradient: scaled * r2_minus_h2,
            laplacian: scaled * (7.0 * dist_sq - 3.0 * self.h2),
        }
    }
}

/// Clamped equation of state: no suction below rest density.
#[inline]
pub fn pressure(density: f32, rest_density: f32, gas_constant: f32) -> f32 {
    (gas_constant * (density - rest_density)).max(0.0)
}
