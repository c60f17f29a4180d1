//! Density, force and integration passes over cell-sorted particles.
//!
//! Every pass reads the sorted arrays and the scanned cell counts, and writes
//! either sorted-order scratch data (densities, next velocities) or render-order
//! particles through `original_index`.

use glam::{Vec3, Vec3Swizzles, Vec4};
use rayon::prelude::*;

use crate::grid::GridView;
use crate::heightfield::HeightField;
use crate::kernels::{pressure, SphKernels};
use crate::params::SimParams;
use crate::particle::Particles;
use crate::raycast::{unpack_normal, CollisionTarget};
use crate::scan::cell_start;
use crate::sort::SortedParticles;

/// Clamp a position into the box, negating and damping the velocity on every
/// axis that was violated.
#[inline]
pub fn clamp_to_box(position: &mut Vec3, velocity: &mut Vec3, min: Vec3, max: Vec3, restitution: f32) {
    for axis in 0..3 {
        if position[axis] < min[axis] {
            position[axis] = min[axis];
            velocity[axis] *= -restitution;
        } else if position[axis] > max[axis] {
            position[axis] = max[axis];
            velocity[axis] *= -restitution;
        }
    }
}

/// Remove the normal component of `velocity` and add it back reversed and damped.
#[inline]
pub fn reflect(velocity: Vec3, normal: Vec3, restitution: f32) -> Vec3 {
    velocity - (1.0 + restitution) * velocity.dot(normal) * normal
}

/// Neighbour queries over one tick's sorted particles.
pub struct Solver<'a> {
    params: &'a SimParams,
    kernels: SphKernels,
    view: GridView,
    prefix: &'a [u32],
}

impl<'a> Solver<'a> {
    pub fn new(params: &'a SimParams, prefix: &'a [u32]) -> Self {
        Self {
            params,
            kernels: SphKernels::new(params.smoothing_radius),
            view: GridView::from_params(params),
            prefix,
        }
    }

    fn for_each_neighbour(&self, position: Vec3, mut visit: impl FnMut(usize)) {
        for hash in self.view.neighbourhood(self.view.cell_of(position)) {
            let start = cell_start(self.prefix, hash) as usize;
            let end = self.prefix[hash as usize] as usize;
            (start..end).for_each(&mut visit);
        }
    }

    /// Density of one sorted particle, including its own contribution.
    pub fn density_at(&self, sorted: &SortedParticles, index: usize) -> f32 {
        let position = sorted.positions[index].truncate();
        let mut sum = 0.0;
        self.for_each_neighbour(position, |j| {
            let dist_sq = position.distance_squared(sorted.positions[j].truncate());
            sum += self.kernels.density(dist_sq);
        });
        sum * self.params.particle_mass
    }

    pub fn compute_densities(&self, sorted: &mut SortedParticles) {
        let densities: Vec<f32> = (0..sorted.len())
            .into_par_iter()
            .map(|i| self.density_at(sorted, i))
            .collect();
        sorted.densities = densities;
    }

    /// Pressure, viscosity, surface tension and gravity acceleration of one
    /// sorted particle. Densities must be current.
    pub fn acceleration(&self, sorted: &SortedParticles, index: usize) -> Vec3 {
        let p = self.params;
        let k = &self.kernels;
        let position = sorted.positions[index].truncate();
        let velocity = sorted.velocities[index].truncate();
        let density = sorted.densities[index];
        let own_pressure = pressure(density, p.rest_density, p.gas_constant);

        let mut f_pressure = Vec3::ZERO;
        let mut f_viscosity = Vec3::ZERO;
        let mut normal = Vec3::ZERO;
        let mut curvature = k.tension_self() / density;

        self.for_each_neighbour(position, |j| {
            let delta = position - sorted.positions[j].truncate();
            let dist_sq = delta.length_squared();
            if dist_sq >= k.h2 {
                return;
            }
            let dist = dist_sq.sqrt();
            let inv_density = 1.0 / sorted.densities[j];
            let other_pressure = pressure(sorted.densities[j], p.rest_density, p.gas_constant);

            f_pressure -= delta
                * ((own_pressure + other_pressure) * 0.5)
                * k.pressure_gradient(dist)
                * inv_density;
            f_viscosity += (sorted.velocities[j].truncate() - velocity)
                * inv_density
                * k.viscosity_laplacian(dist);

            let tension = k.surface_tension(dist_sq);
            normal += delta * tension.gradient * inv_density;
            curvature += tension.laplacian * inv_density;
        });

        let inv_density = 1.0 / density;
        f_viscosity *= p.viscosity * p.particle_mass;
        f_pressure *= p.particle_mass;
        let mut acc = (f_viscosity + f_pressure) * inv_density;

        normal *= p.particle_mass;
        curvature *= p.particle_mass;
        let normal_len = normal.length();
        if normal_len > p.surface_threshold {
            acc -= normal * (p.surface_tension * curvature / normal_len) * inv_density;
        }

        acc + Vec3::new(0.0, -p.gravity, 0.0)
    }

    /// Next velocity of every sorted particle without moving it.
    pub fn apply_forces(&self, sorted: &SortedParticles) -> Vec<Vec4> {
        let dt = self.params.time_step;
        (0..sorted.len())
            .into_par_iter()
            .map(|i| {
                let velocity = sorted.velocities[i].truncate() + self.acceleration(sorted, i) * dt;
                velocity.extend(0.0)
            })
            .collect()
    }

    /// Semi-implicit Euler step with box bounce, optionally resolving against a
    /// height field first. Results go to render order.
    pub fn update_positions(
        &self,
        sorted: &SortedParticles,
        particles: &mut Particles,
        height_field: Option<&HeightField>,
    ) {
        let p = self.params;
        let dt = p.time_step;
        let (min, max) = (p.global_min(), p.global_max());

        let results: Vec<(Vec3, Vec3)> = (0..sorted.len())
            .into_par_iter()
            .map(|i| {
                let mut velocity =
                    sorted.velocities[i].truncate() + self.acceleration(sorted, i) * dt;
                let position = sorted.positions[i].truncate();
                let mut next = position + velocity * dt;

                if let Some(field) = height_field {
                    let surface = field.surface_point(next.xz());
                    if next.y < surface.y {
                        let normal = field.normal_at(next.xz(), p.particle_radius);
                        velocity = reflect(velocity, normal, p.wall_restitution);
                        next = position;
                    }
                }

                clamp_to_box(&mut next, &mut velocity, min, max, p.wall_restitution);
                (next, velocity)
            })
            .collect();

        write_back(particles, sorted, results);
    }
}

/// Gravity-only step over render-order particles.
pub fn integrate_free_fall(params: &SimParams, particles: &mut Particles) {
    let dt = params.time_step;
    let gravity = Vec3::new(0.0, -params.gravity, 0.0);
    let (min, max) = (params.global_min(), params.global_max());
    particles
        .positions
        .par_iter_mut()
        .zip(particles.velocities.par_iter_mut())
        .for_each(|(position, velocity)| {
            let mut vel = velocity.truncate() + gravity * dt;
            let mut pos = position.truncate() + vel * dt;
            clamp_to_box(&mut pos, &mut vel, min, max, params.free_fall_restitution);
            *position = pos.extend(1.0);
            *velocity = vel.extend(0.0);
        });
}

/// Move sorted particles along their next velocity, stopping short of the
/// nearest mesh hit and reflecting about its normal.
pub fn resolve_collisions(
    params: &SimParams,
    sorted: &SortedParticles,
    next_velocities: &[Vec4],
    target: &CollisionTarget,
    particles: &mut Particles,
) {
    let dt = params.time_step;
    let tolerance = params.collision_tolerance;
    let (min, max) = (params.global_min(), params.global_max());

    let results: Vec<(Vec3, Vec3)> = (0..sorted.len())
        .into_par_iter()
        .map(|i| {
            let mut velocity = next_velocities[i].truncate();
            let mut step = velocity * dt;
            let distance = step.length();
            let hit = target.depth[i];
            if hit < distance + tolerance {
                let direction = step.try_normalize().unwrap_or(Vec3::ZERO);
                step = direction * (hit - tolerance).max(0.0);
                let normal = unpack_normal(target.normals[i]);
                velocity = reflect(velocity, normal, params.wall_restitution);
            }
            let mut next = sorted.positions[i].truncate() + step;
            clamp_to_box(&mut next, &mut velocity, min, max, params.wall_restitution);
            (next, velocity)
        })
        .collect();

    write_back(particles, sorted, results);
}

fn write_back(particles: &mut Particles, sorted: &SortedParticles, results: Vec<(Vec3, Vec3)>) {
    for (slot, (position, velocity)) in results.into_iter().enumerate() {
        let original = sorted.original_index[slot] as usize;
        particles.positions[original] = position.extend(1.0);
        particles.velocities[original] = velocity.extend(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SphConfig;
    use crate::grid::HashGrid;
    use crate::scan::BlockScan;
    use std::f32::consts::PI;

    /// Run the sort stages for a particle set inside a unit-ish box.
    fn prepare(particles: &Particles, config: &SphConfig) -> (SimParams, SortedParticles, Vec<u32>) {
        let mut params = SimParams::new(config, Vec3::splat(-1.0), Vec3::splat(1.0));
        let (lo, hi) = crate::bounds::reduce_bounds(&particles.positions);
        params.set_particle_bounds(lo, hi);
        params.fix_up_grid();
        let view = GridView::from_params(&params);

        let mut grid = HashGrid::new(params.grid_capacity, particles.len());
        grid.build(&particles.positions, &view);
        let mut scan = BlockScan::with_capacity(params.grid_capacity);
        scan.data_mut().copy_from_slice(&grid.counts());
        scan.run(&crate::params::ScanDispatch::for_count(params.num_grid_cells));
        let prefix = scan.data().to_vec();

        let mut sorted = SortedParticles::new(particles.len());
        sorted.scatter(&particles.positions, &particles.velocities, &grid, &prefix);
        (params, sorted, prefix)
    }

    #[test]
    fn test_two_particle_density_matches_closed_form() {
        let config = SphConfig::with_particle_count(2);
        let h = config.smoothing_radius();
        let separation = 0.4 * h;
        let particles = Particles::from_positions([Vec3::ZERO, Vec3::new(separation, 0.0, 0.0)]);
        let (params, mut sorted, prefix) = prepare(&particles, &config);
        Solver::new(&params, &prefix).compute_densities(&mut sorted);

        let k = 315.0 / (64.0 * PI * h.powi(9));
        let self_term = k * h.powi(6);
        let pair_term = k * (h * h - separation * separation).powi(3);
        let expected = config.particle_mass() * (self_term + pair_term);
        for &density in &sorted.densities {
            assert!(
                (density - expected).abs() / expected < 1e-4,
                "density {} expected {}",
                density,
                expected
            );
        }
        assert_eq!(sorted.densities[0], sorted.densities[1]);
    }

    #[test]
    fn test_particles_beyond_h_do_not_interact() {
        let config = SphConfig::with_particle_count(2);
        let h = config.smoothing_radius();
        let particles = Particles::from_positions([Vec3::ZERO, Vec3::new(1.01 * h, 0.0, 0.0)]);
        let (params, mut sorted, prefix) = prepare(&particles, &config);
        Solver::new(&params, &prefix).compute_densities(&mut sorted);
        let self_only = config.particle_mass() * SphKernels::new(h).density(0.0);
        for &density in &sorted.densities {
            assert!((density - self_only).abs() / self_only < 1e-5);
        }
    }

    #[test]
    fn test_compressed_pair_is_pushed_apart() {
        let mut config = SphConfig::with_particle_count(2);
        config.gravity = 0.0;
        let h = config.smoothing_radius();
        let particles = Particles::from_positions([Vec3::ZERO, Vec3::new(0.2 * h, 0.0, 0.0)]);
        let (mut params, mut sorted, prefix) = prepare(&particles, &config);
        // Any density is above a zero rest density, so the pair is under pressure.
        params.rest_density = 0.0;
        params.surface_tension = 0.0;
        let solver = Solver::new(&params, &prefix);
        solver.compute_densities(&mut sorted);

        for i in 0..2 {
            let acc = solver.acceleration(&sorted, i);
            let away = sorted.positions[i].x - sorted.positions[1 - i].x;
            assert!(acc.x * away > 0.0, "particle {} acc {:?}", i, acc);
        }
    }

    #[test]
    fn test_lone_particle_falls_with_gravity() {
        let config = SphConfig::with_particle_count(1);
        let particles = Particles::from_positions([Vec3::new(0.0, 0.5, 0.0)]);
        let (params, mut sorted, prefix) = prepare(&particles, &config);
        let solver = Solver::new(&params, &prefix);
        solver.compute_densities(&mut sorted);
        let acc = solver.acceleration(&sorted, 0);
        assert!((acc - Vec3::new(0.0, -config.gravity, 0.0)).length() < 1e-4);
    }

    const CLUSTER_CENTRE: Vec3 = Vec3::new(0.1, 0.5, -0.1);

    /// Regular tetrahedron of side `edge` around [`CLUSTER_CENTRE`].
    fn tetrahedron(edge: f32) -> Particles {
        let a = edge / (2.0 * 2.0f32.sqrt());
        Particles::from_positions(
            [
                Vec3::new(1.0, 1.0, 1.0),
                Vec3::new(1.0, -1.0, -1.0),
                Vec3::new(-1.0, 1.0, -1.0),
                Vec3::new(-1.0, -1.0, 1.0),
            ]
            .map(|v| CLUSTER_CENTRE + v * a),
        )
    }

    struct TensionCluster {
        params: SimParams,
        sorted: SortedParticles,
        prefix: Vec<u32>,
        field: ColourField,
    }

    /// Tetrahedron with side H / 2 and densities computed. Pressure and gravity
    /// are switched off so only surface tension accelerates a particle at rest.
    fn tension_cluster() -> TensionCluster {
        let config = SphConfig::with_particle_count(4);
        let h = config.smoothing_radius();
        let edge = 0.5 * h;
        let (mut params, mut sorted, prefix) = prepare(&tetrahedron(edge), &config);
        params.gas_constant = 0.0;
        params.gravity = 0.0;
        Solver::new(&params, &prefix).compute_densities(&mut sorted);
        TensionCluster {
            params,
            sorted,
            prefix,
            field: tetrahedron_colour_field(h, config.particle_mass(), edge),
        }
    }

    /// Hand-computed colour field at one tetrahedron vertex.
    struct ColourField {
        density: f32,
        normal_len: f32,
        /// Pair sum, including the zero-distance pair with itself.
        pair_curvature: f32,
        /// Seeded own term.
        own_curvature: f32,
    }

    fn tetrahedron_colour_field(h: f32, mass: f32, edge: f32) -> ColourField {
        let (h2, e2) = (h * h, edge * edge);
        let poly6 = 315.0 / (64.0 * PI * h.powi(9));
        let density = mass * poly6 * (h2.powi(3) + 3.0 * (h2 - e2).powi(3));
        let t = -945.0 / (32.0 * PI * h.powi(9));
        let own = -945.0 * 3.0 / (32.0 * PI * h.powi(5));
        let pair_lap = t * (e2 - h2) * (7.0 * e2 - 3.0 * h2);
        // Offsets to the three neighbours sum to 4 (x - centre), |x - centre| = edge sqrt(3/8).
        let offset_sum = 4.0 * edge * (3.0f32 / 8.0).sqrt();
        let normal_len = mass / density * t.abs() * (h2 - e2).powi(2) * offset_sum;
        ColourField {
            density,
            normal_len,
            pair_curvature: mass / density * (own + 3.0 * pair_lap),
            own_curvature: mass / density * own,
        }
    }

    #[test]
    fn test_surface_cluster_tension_points_inward() {
        let TensionCluster { params, sorted, prefix, field } = tension_cluster();
        assert!(field.normal_len > params.surface_threshold, "gate closed: {}", field.normal_len);

        let curvature = field.pair_curvature + field.own_curvature;
        let expected = params.surface_tension * curvature.abs() / field.density;
        let solver = Solver::new(&params, &prefix);
        for i in 0..4 {
            assert!((sorted.densities[i] - field.density).abs() / field.density < 1e-4);
            let acc = solver.acceleration(&sorted, i);
            let inward = (CLUSTER_CENTRE - sorted.positions[i].truncate()).normalize();
            assert!(
                (acc.length() - expected).abs() / expected < 1e-3,
                "particle {} |acc| {} expected {}",
                i,
                acc.length(),
                expected
            );
            assert!(acc.normalize().dot(inward) > 0.9999, "particle {} acc {:?}", i, acc);
        }
    }

    #[test]
    fn test_curvature_includes_own_term() {
        let TensionCluster { params, sorted, prefix, field } = tension_cluster();
        let scale = params.surface_tension / field.density;
        let with_own = scale * (field.pair_curvature + field.own_curvature).abs();
        let pairs_only = scale * field.pair_curvature.abs();
        assert!(with_own - pairs_only > 0.2 * with_own);

        let acc = Solver::new(&params, &prefix).acceleration(&sorted, 0).length();
        assert!((acc - with_own).abs() / with_own < 1e-3, "|acc| {} expected {}", acc, with_own);
    }

    #[test]
    fn test_no_tension_below_threshold() {
        let TensionCluster { mut params, sorted, prefix, field } = tension_cluster();
        params.surface_threshold = 1.5 * field.normal_len;

        let solver = Solver::new(&params, &prefix);
        for i in 0..4 {
            let acc = solver.acceleration(&sorted, i);
            assert!(acc.length() < 1e-6, "particle {} acc {:?}", i, acc);
        }
    }

    #[test]
    fn test_clamp_to_box_bounces_corner_on_both_axes() {
        let mut pos = Vec3::new(1.5, -0.2, 0.0);
        let mut vel = Vec3::new(2.0, -3.0, 1.0);
        clamp_to_box(&mut pos, &mut vel, Vec3::new(-1.0, 0.0, -1.0), Vec3::ONE, 0.94);
        assert_eq!(pos, Vec3::new(1.0, 0.0, 0.0));
        assert!((vel - Vec3::new(-1.88, 2.82, 1.0)).length() < 1e-5, "vel {:?}", vel);
    }

    #[test]
    fn test_reflect_preserves_tangent() {
        let v = reflect(Vec3::new(1.0, -2.0, 0.0), Vec3::Y, 0.5);
        assert!((v - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_free_fall_bounces_off_floor() {
        let config = SphConfig::with_particle_count(1);
        let params = SimParams::new(&config, Vec3::new(-1.0, 0.0, -1.0), Vec3::ONE);
        let mut particles = Particles::from_positions([Vec3::new(0.0, 0.001, 0.0)]);
        particles.velocities[0] = Vec4::new(0.0, -1.0, 0.0, 0.0);
        integrate_free_fall(&params, &mut particles);
        assert_eq!(particles.position(0).y, 0.0);
        assert!(particles.velocity(0).y > 0.0);
    }

    #[test]
    fn test_height_field_stops_particle_at_surface() {
        let mut config = SphConfig::with_particle_count(1);
        config.gravity = 0.0;
        let min = Vec3::new(-1.0, 0.0, -1.0);
        let max = Vec3::new(1.0, 2.0, 1.0);
        let field = HeightField::flat(32, 32, min, max, 0.5);
        let mut particles = Particles::from_positions([Vec3::new(0.1, 0.51, 0.1)]);
        particles.velocities[0] = Vec4::new(0.0, -3.0, 0.0, 0.0);

        let mut params = SimParams::new(&config, min, max);
        let (lo, hi) = crate::bounds::reduce_bounds(&particles.positions);
        params.set_particle_bounds(lo, hi);
        params.fix_up_grid();
        let view = GridView::from_params(&params);
        let mut grid = HashGrid::new(params.grid_capacity, 1);
        grid.build(&particles.positions, &view);
        let mut scan = BlockScan::with_capacity(params.grid_capacity);
        scan.data_mut().copy_from_slice(&grid.counts());
        scan.run(&crate::params::ScanDispatch::for_count(params.num_grid_cells));
        let prefix = scan.data().to_vec();
        let mut sorted = SortedParticles::new(1);
        sorted.scatter(&particles.positions, &particles.velocities, &grid, &prefix);

        let solver = Solver::new(&params, &prefix);
        solver.compute_densities(&mut sorted);
        solver.update_positions(&sorted, &mut particles, Some(&field));

        assert!((particles.position(0).y - 0.51).abs() < 1e-6);
        assert!((particles.velocity(0).y - 3.0 * 0.94).abs() < 1e-3);
    }
}
