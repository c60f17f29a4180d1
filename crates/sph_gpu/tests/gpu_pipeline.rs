//! Device stages checked against the CPU reference in `sph3d`.
//!
//! Built only with the `gpu-tests` feature, and then every test needs an
//! adapter:
//! cargo test -p sph_gpu --features gpu-tests --test gpu_pipeline
//!
//! The full-size settling run is ignored on top of that:
//! cargo test -p sph_gpu --features gpu-tests --release --test gpu_pipeline -- --ignored --nocapture

use std::sync::OnceLock;

use bytemuck::Zeroable;
use glam::{Mat4, Quat, Vec3, Vec4};
use proptest::prelude::*;
use sph3d::bounds::reduce_bounds;
use sph3d::bvh::pack::{box_triangles, quad_xz};
use sph3d::constants::DEPTH_CLEAR;
use sph3d::kernels::SphKernels;
use sph3d::raycast::render_depth;
use sph3d::scan::{cell_start, exclusive_scan};
use sph3d::{
    CameraRays, CompressedBvh, DepthTarget, GridView, HeightField, ModelTransform, Particles,
    ScanDispatch, SimParams, SphConfig,
};
use sph_gpu::prefix_sum::PrefixSum;
use sph_gpu::readback::read_buffer;
use sph_gpu::{
    DepthRaycaster, GpuBvh, GpuContext, GpuError, GpuHeightField, GpuSphSimulation,
};
use wgpu::util::DeviceExt;

const MIN: Vec3 = Vec3::new(-0.5, 0.0, -0.5);
const MAX: Vec3 = Vec3::new(0.5, 2.0, 0.5);

/// One device for the whole test binary.
fn context() -> GpuContext {
    static CONTEXT: OnceLock<GpuContext> = OnceLock::new();
    CONTEXT
        .get_or_init(|| match GpuContext::new_headless() {
            Ok(ctx) => ctx,
            Err(e) => panic!("gpu-tests enabled but no adapter is available: {}", e),
        })
        .clone()
}

fn small_sim(ctx: &GpuContext, count: u32) -> GpuSphSimulation {
    GpuSphSimulation::with_config(ctx, SphConfig::with_particle_count(count), MIN, MAX).unwrap()
}

// =============================================================================
// SCAN
// =============================================================================

/// Parameter block holding only the scan tables for `count` live cells.
fn scan_params(count: u32) -> SimParams {
    let dispatch = ScanDispatch::for_count(count);
    SimParams {
        scan_up: dispatch.up,
        scan_down: dispatch.down,
        ..SimParams::zeroed()
    }
}

fn scan_params_buffer(ctx: &GpuContext, count: u32) -> wgpu::Buffer {
    ctx.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scan Test Params"),
            contents: bytemuck::bytes_of(&scan_params(count)),
            usage: wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::COPY_DST,
        })
}

fn run_scan(ctx: &GpuContext, prefix: &PrefixSum, params: &wgpu::Buffer) {
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Scan Test Encoder"),
        });
    prefix.encode(&mut encoder, params);
    ctx.queue.submit(std::iter::once(encoder.finish()));
}

fn gpu_scan(ctx: &GpuContext, counts: &[u32]) -> Vec<u32> {
    let len = counts.len() as u32;
    let params = scan_params_buffer(ctx, len);
    let prefix = PrefixSum::new(ctx, &params, len);
    ctx.queue
        .write_buffer(prefix.data(), 0, bytemuck::cast_slice(counts));
    run_scan(ctx, &prefix, &params);
    read_buffer::<u32>(ctx, prefix.data(), counts.len()).unwrap()
}

fn inclusive_scan(counts: &[u32]) -> Vec<u32> {
    counts
        .iter()
        .scan(0u32, |sum, &c| {
            *sum += c;
            Some(*sum)
        })
        .collect()
}

#[test]
fn test_scan_matches_cpu_at_level_edges() {
    let ctx = context();
    for len in [1usize, 127, 128, 129, 16_384, 16_385, 200_000] {
        let counts: Vec<u32> = (0..len as u32).map(|i| (i * 7 + 3) % 5).collect();
        let prefix = gpu_scan(&ctx, &counts);
        assert_eq!(prefix, inclusive_scan(&counts), "length {}", len);

        // Cell start offsets are the exclusive scan.
        let starts: Vec<u32> = (0..len as u32).map(|h| cell_start(&prefix, h)).collect();
        assert_eq!(starts, exclusive_scan(&counts), "length {}", len);
    }
}

#[test]
fn test_reused_scan_across_shrinking_live_counts() {
    const TAIL: u32 = 0xdead;
    let ctx = context();
    let capacity = 32_768u32;
    let params = scan_params_buffer(&ctx, capacity);
    let prefix = PrefixSum::new(&ctx, &params, capacity);
    let lives = [32_768u32, 20_000, 5_000, 1_000, 300, 129, 1, 4_000];

    for tick in 0..3 * lives.len() {
        let live = lives[tick % lives.len()] as usize;
        let mut data = vec![TAIL; capacity as usize];
        for (i, v) in data[..live].iter_mut().enumerate() {
            *v = ((i * 7 + tick) % 11) as u32 * 1000;
        }
        let counts = data[..live].to_vec();
        ctx.queue
            .write_buffer(prefix.data(), 0, bytemuck::cast_slice(&data));
        ctx.queue
            .write_buffer(&params, 0, bytemuck::bytes_of(&scan_params(live as u32)));
        run_scan(&ctx, &prefix, &params);

        let result = read_buffer::<u32>(&ctx, prefix.data(), capacity as usize).unwrap();
        assert_eq!(result[..live], inclusive_scan(&counts)[..], "tick {} live {}", tick, live);
        assert!(result[live..].iter().all(|&v| v == TAIL), "tick {} touched the tail", tick);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_scan_matches_cpu(counts in prop::collection::vec(0u32..16, 1..40_000)) {
        let ctx = context();
        prop_assert_eq!(gpu_scan(&ctx, &counts), inclusive_scan(&counts));
    }
}

// =============================================================================
// GRID AND SORT
// =============================================================================

#[test]
fn test_device_fix_up_matches_cpu() {
    let ctx = context();
    let mut sim = small_sim(&ctx, 3000);
    let positions = sim.read_positions().unwrap();
    sim.update(None);
    let device = sim.read_params().unwrap();

    let mut host = SimParams::new(&sim.config, MIN, MAX);
    let (min, max) = reduce_bounds(&positions);
    host.set_particle_bounds(min, max);
    host.fix_up_grid();

    assert!(device.grid_min().abs_diff_eq(host.grid_min(), 1e-5));
    assert!(device.grid_max().abs_diff_eq(host.grid_max(), 1e-4));
    assert!(device.cell_size().abs_diff_eq(host.cell_size(), 1e-5));
    assert_eq!(device.grid_div(), host.grid_div());
    assert_eq!(device.num_grid_cells, host.num_grid_cells);
    assert_eq!(device.scan_up, host.scan_up);
    assert_eq!(device.scan_down, host.scan_down);
}

#[test]
fn test_sorted_order_is_a_bijection_grouped_by_cell() {
    let ctx = context();
    let n = 4096;
    let mut sim = small_sim(&ctx, n);
    for _ in 0..3 {
        let positions = sim.read_positions().unwrap();
        sim.update(None);

        let index = sim.read_sorted_index().unwrap();
        let mut seen = index.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..n).collect::<Vec<u32>>());

        let sorted = sim.read_sorted_positions().unwrap();
        for (slot, &original) in index.iter().enumerate() {
            assert_eq!(sorted[slot], positions[original as usize]);
        }

        let params = sim.read_params().unwrap();
        let view = GridView::from_params(&params);
        let hashes: Vec<u32> = sorted
            .iter()
            .map(|p| view.hash(view.cell_of(p.truncate())))
            .collect();
        assert!(hashes.windows(2).all(|w| w[0] <= w[1]), "sorted slots not grouped by cell");

        let prefix = sim.read_cell_prefix().unwrap();
        assert_eq!(prefix[params.num_grid_cells as usize - 1], n);
    }
}

#[test]
fn test_single_cell_sort_is_a_bijection() {
    let ctx = context();
    let n = 1000;
    let mut sim = small_sim(&ctx, n);
    sim.upload_particles(&Particles::from_positions(
        (0..n).map(|_| Vec3::new(0.1, 0.5, -0.1)),
    ))
    .unwrap();
    sim.update(None);

    let mut seen = sim.read_sorted_index().unwrap();
    seen.sort_unstable();
    assert_eq!(seen, (0..n).collect::<Vec<u32>>());
    assert!(sim.frame_stats().unwrap().all_finite);
}

// =============================================================================
// DENSITY
// =============================================================================

#[test]
fn test_two_particle_density_closed_form() {
    let ctx = context();
    let mut sim = small_sim(&ctx, 2);
    let params = sim.read_params().unwrap();
    let h = params.smoothing_radius;
    let offset = 0.5 * h;
    sim.upload_particles(&Particles::from_positions([
        Vec3::new(0.0, 0.5, 0.0),
        Vec3::new(offset, 0.5, 0.0),
    ]))
    .unwrap();
    sim.update(None);

    let kernels = SphKernels::new(h);
    let expected = params.particle_mass * (kernels.density(0.0) + kernels.density(offset * offset));
    for density in sim.read_densities().unwrap() {
        assert!(
            ((density - expected) / expected).abs() < 1e-4,
            "density {} expected {}",
            density,
            expected
        );
    }
}

// =============================================================================
// RAYCASTS
// =============================================================================

fn rotated_box() -> (CompressedBvh, ModelTransform) {
    let bvh = CompressedBvh::flat(&box_triangles(Vec3::splat(-0.5), Vec3::splat(0.5))).unwrap();
    let transform = ModelTransform::new(Mat4::from_rotation_translation(
        Quat::from_rotation_y(0.5) * Quat::from_rotation_x(0.3),
        Vec3::new(0.0, 0.0, -3.0),
    ));
    (bvh, transform)
}

fn count_mismatches(gpu: &DepthTarget, cpu: &DepthTarget) -> usize {
    gpu.depth
        .iter()
        .zip(&cpu.depth)
        .filter(|&(&g, &c)| {
            if g == DEPTH_CLEAR || c == DEPTH_CLEAR {
                g != c
            } else {
                (g - c).abs() > 1e-3 * c.max(1.0)
            }
        })
        .count()
}

#[test]
fn test_depth_raycast_matches_cpu() {
    let ctx = context();
    let (bvh, transform) = rotated_box();
    let floor = CompressedBvh::flat(&quad_xz(Vec3::splat(-4.0), Vec3::splat(4.0), -1.0)).unwrap();
    let floor_transform = ModelTransform::new(Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)));

    let (width, height) = (96, 64);
    let projection = Mat4::perspective_rh(1.0, width as f32 / height as f32, 0.1, 50.0);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.5, 0.0), Vec3::new(0.0, -0.2, -3.0), Vec3::Y);
    let camera = CameraRays::new(projection, view, width, height);

    let mut cpu = DepthTarget::new(width, height);
    render_depth(&bvh, &transform, &camera, &mut cpu);
    render_depth(&floor, &floor_transform, &camera, &mut cpu);

    let gpu_box = GpuBvh::from_bvh(&ctx, "Box", &bvh, &transform).unwrap();
    let gpu_floor = GpuBvh::from_bvh(&ctx, "Floor", &floor, &floor_transform).unwrap();
    let raycaster = DepthRaycaster::new(&ctx, width, height);
    raycaster.render(&ctx, &[&gpu_box, &gpu_floor], &camera);
    let gpu = raycaster.read_depth(&ctx).unwrap();

    let hits = cpu.depth.iter().filter(|&&d| d < DEPTH_CLEAR).count();
    assert!(hits > 0, "camera sees nothing");
    let mismatches = count_mismatches(&gpu, &cpu);
    assert!(
        mismatches * 100 < cpu.depth.len(),
        "{} of {} pixels differ",
        mismatches,
        cpu.depth.len()
    );
}

#[test]
fn test_pending_bvh_is_skipped() {
    let ctx = context();
    let pending = GpuBvh::new("Pending");
    assert!(!pending.is_ready());
    assert!(matches!(
        pending.set_transform(&ctx, &ModelTransform::identity()),
        Err(GpuError::BvhNotReady)
    ));

    let raycaster = DepthRaycaster::new(&ctx, 16, 16);
    raycaster.render(&ctx, &[&pending], &CameraRays::new(Mat4::IDENTITY, Mat4::IDENTITY, 16, 16));
    let depth = raycaster.read_depth(&ctx).unwrap();
    assert!(depth.depth.iter().all(|&d| d == DEPTH_CLEAR));

    let (bvh, transform) = rotated_box();
    pending.upload(&ctx, &bvh, &transform).unwrap();
    assert!(pending.is_ready());
    assert_eq!(pending.triangle_count(), Some(12));
    assert!(matches!(
        pending.upload(&ctx, &bvh, &transform),
        Err(GpuError::BvhAlreadyLoaded)
    ));
}

#[test]
fn test_mesh_floor_holds_fluid() {
    let ctx = context();
    let floor_y = 0.3;
    let floor = CompressedBvh::flat(&quad_xz(MIN - 0.5, MAX + 0.5, floor_y)).unwrap();
    let gpu_floor = GpuBvh::from_bvh(&ctx, "Floor", &floor, &ModelTransform::identity()).unwrap();
    let pending = GpuBvh::new("Pending");

    let n = 2048;
    let mut sim = small_sim(&ctx, n);
    let radius = sim.config.particle_radius();
    sim.upload_particles(&Particles::dam_block(n as usize, radius, MIN, MAX, floor_y + 0.2))
        .unwrap();

    for _ in 0..180 {
        sim.update_with_colliders(&[&gpu_floor, &pending]);
    }

    let positions = sim.read_positions().unwrap();
    let stats = sim.frame_stats().unwrap();
    assert!(stats.all_finite);
    let below = positions
        .iter()
        .filter(|p| p.y < floor_y - 2.0 * radius)
        .count();
    assert!(below * 100 < positions.len(), "{} of {} particles fell through", below, n);
    assert!(stats.mean_height > floor_y);
}

// =============================================================================
// HEIGHT FIELD
// =============================================================================

#[test]
fn test_height_field_holds_fluid() {
    let ctx = context();
    let terrain_y = 0.4;
    let field = HeightField::flat(32, 32, MIN, MAX, terrain_y);
    let gpu_field = GpuHeightField::new(&ctx, &field);
    assert_eq!(gpu_field.size(), (32, 32));

    let n = 2048;
    let mut sim = small_sim(&ctx, n);
    let radius = sim.config.particle_radius();
    sim.upload_particles(&Particles::dam_block(n as usize, radius, MIN, MAX, terrain_y + 0.1))
        .unwrap();
    for _ in 0..180 {
        sim.update(Some(&gpu_field));
    }

    let stats = sim.frame_stats().unwrap();
    assert!(stats.all_finite);
    assert!(
        stats.min_height > terrain_y - 2.0 * radius,
        "min height {} below terrain {}",
        stats.min_height,
        terrain_y
    );
}

#[test]
fn test_height_field_update_checks_size() {
    let ctx = context();
    let gpu_field = GpuHeightField::new(&ctx, &HeightField::flat(8, 8, MIN, MAX, 0.2));
    gpu_field
        .update(&ctx, &HeightField::flat(8, 8, MIN, MAX, 0.5))
        .unwrap();
    assert!(matches!(
        gpu_field.update(&ctx, &HeightField::flat(16, 8, MIN, MAX, 0.5)),
        Err(GpuError::HeightFieldSize { expected: (8, 8), actual: (16, 8) })
    ));
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_free_fall_moves_down() {
    let ctx = context();
    let mut sim = small_sim(&ctx, 512);
    let mut particles = sim.read_particles().unwrap();
    for p in &mut particles.positions {
        p.y += 0.5;
    }
    sim.upload_particles(&particles).unwrap();
    let before = sim.frame_stats().unwrap().mean_height;
    sim.step_free_fall();
    sim.step_free_fall();
    assert!(sim.frame_stats().unwrap().mean_height < before);
    assert_eq!(sim.frame, 2);
}

#[test]
fn test_upload_checks_count() {
    let ctx = context();
    let sim = small_sim(&ctx, 64);
    assert!(matches!(
        sim.upload_particles(&Particles::from_positions([Vec3::ZERO])),
        Err(GpuError::Sph(sph3d::SphError::ParticleCount { expected: 64, actual: 1 }))
    ));
}

fn run_settling(count: u32, half_width: f32, ticks: usize) {
    let ctx = context();
    let drop_height = 0.3;
    let min = Vec3::new(-half_width, MIN.y, -half_width);
    let max = Vec3::new(half_width, MAX.y, half_width);
    let config = SphConfig::with_particle_count(count);
    let radius = config.particle_radius();
    let mut sim = GpuSphSimulation::with_config(&ctx, config, min, max).unwrap();
    sim.upload_particles(&Particles::dam_block(count as usize, radius, min, max, drop_height))
        .unwrap();

    let initial = sim.frame_stats().unwrap();
    assert!(initial.min_height > drop_height);

    let mut history = Vec::with_capacity(ticks);
    for tick in 0..ticks {
        sim.update(None);
        let stats = sim.frame_stats().unwrap();
        assert!(stats.all_finite, "non-finite position at tick {}", tick);
        history.push(stats.mean_height);
        if tick % 60 == 0 {
            println!(
                "tick {:4}: mean {:.4} min {:.4} max {:.4}",
                tick, stats.mean_height, stats.min_height, stats.max_height
            );
        }
    }

    let last = *history.last().unwrap();
    assert!(
        last < initial.mean_height - 0.1,
        "mean height {} did not drop from {}",
        last,
        initial.mean_height
    );
    let second_ago = history[history.len() - 60];
    assert!(
        (last - second_ago).abs() < 0.05,
        "still moving: {} -> {}",
        second_ago,
        last
    );

    let positions: Vec<Vec4> = sim.read_positions().unwrap();
    assert!(positions
        .iter()
        .all(|p| p.truncate().cmpge(min - 1e-3).all() && p.truncate().cmple(max + 1e-3).all()));
}

#[test]
fn test_small_block_settles() {
    run_settling(4096, 0.25, 240);
}

#[test]
#[ignore = "full-size run"]
fn test_full_block_settles() {
    run_settling(32_768, 0.5, 600);
}
