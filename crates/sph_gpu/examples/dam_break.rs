//! Headless dam break against a box obstacle.
//!
//! Run with: RUST_LOG=info cargo run --release -p sph_gpu --example dam_break [config.json] [ticks]

use std::time::Instant;

use glam::{Mat4, Quat, Vec3};
use sph3d::bvh::pack::box_triangles;
use sph3d::{CameraRays, CompressedBvh, ModelTransform, Particles, SphConfig};
use sph_gpu::{DepthRaycaster, GpuBvh, GpuContext, GpuError, GpuSphSimulation};

const GLOBAL_MIN: Vec3 = Vec3::new(-1.0, 0.0, -0.5);
const GLOBAL_MAX: Vec3 = Vec3::new(1.0, 1.5, 0.5);
const DEFAULT_TICKS: u32 = 600;

fn load_config(path: Option<&str>) -> SphConfig {
    let Some(path) = path else {
        return SphConfig::default();
    };
    match std::fs::read_to_string(path) {
        Ok(json) => match SphConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}: {}; using defaults", path, e);
                SphConfig::default()
            }
        },
        Err(e) => {
            log::error!("cannot read {}: {}; using defaults", path, e);
            SphConfig::default()
        }
    }
}

fn run(config: SphConfig, ticks: u32) -> Result<(), GpuError> {
    let ctx = GpuContext::new_headless()?;

    // Water held in the left half of the tank.
    let radius = config.particle_radius();
    let count = config.particle_count as usize;
    let mut sim = GpuSphSimulation::with_config(&ctx, config, GLOBAL_MIN, GLOBAL_MAX)?;
    let dam_max = Vec3::new(GLOBAL_MIN.x + 1.0, GLOBAL_MAX.y, GLOBAL_MAX.z);
    sim.upload_particles(&Particles::dam_block(count, radius, GLOBAL_MIN, dam_max, GLOBAL_MIN.y))?;

    let obstacle = CompressedBvh::flat(&box_triangles(Vec3::splat(-0.15), Vec3::splat(0.15)))?;
    let placement = ModelTransform::new(Mat4::from_rotation_translation(
        Quat::from_rotation_y(0.6),
        Vec3::new(0.4, 0.15, 0.0),
    ));
    let obstacle = GpuBvh::from_bvh(&ctx, "Obstacle", &obstacle, &placement)?;

    let start = Instant::now();
    for tick in 0..ticks {
        sim.update_with_colliders(&[&obstacle]);
        if tick % 60 == 0 {
            let stats = sim.frame_stats()?;
            log::info!(
                "tick {:4}: mean height {:.4} (min {:.4}, max {:.4}), finite {}",
                tick,
                stats.mean_height,
                stats.min_height,
                stats.max_height,
                stats.all_finite
            );
            if sph_gpu::is_device_lost() {
                return Err(GpuError::DeviceLost);
            }
        }
    }
    ctx.wait_idle();
    let elapsed = start.elapsed();
    log::info!(
        "{} ticks in {:.2?} ({:.2} ms/tick)",
        ticks,
        elapsed,
        elapsed.as_secs_f64() * 1000.0 / ticks.max(1) as f64
    );

    let (width, height) = (320, 180);
    let camera = CameraRays::new(
        Mat4::perspective_rh(1.0, width as f32 / height as f32, 0.05, 20.0),
        Mat4::look_at_rh(Vec3::new(0.0, 1.2, 2.5), Vec3::new(0.3, 0.1, 0.0), Vec3::Y),
        width,
        height,
    );
    let depth = DepthRaycaster::new(&ctx, width, height);
    depth.render(&ctx, &[&obstacle], &camera);
    let target = depth.read_depth(&ctx)?;
    let hits = target.depth.iter().filter(|&&d| d < f32::MAX).count();
    log::info!("obstacle covers {} of {} pixels", hits, target.depth.len());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config = load_config(args.next().as_deref());
    let ticks = args
        .next()
        .and_then(|t| t.parse().ok())
        .unwrap_or(DEFAULT_TICKS);

    if let Err(e) = run(config, ticks) {
        log::error!("dam break failed: {}", e);
        std::process::exit(1);
    }
}
