//! helixcloud demo - ingests a synthetic sequence and renders a camera orbit.
//!
//! Usage: cargo run --release -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>    Engine config JSON (default: built-in defaults)
//!   --length <N>       Synthetic sequence length (default: 1000000)
//!   --seed <SEED>      Sequence seed (default: 12345)
//!   --frames <N>       Orbit frames to render (default: 8)

use std::path::PathBuf;
use std::time::Instant;

use helixcloud::core::{logging, Camera, EngineConfig, Vec3};
use helixcloud::memory::MemoryManager;
use helixcloud::render::FrameBuilder;
use helixcloud::spatial::SpatialIndex;
use helixcloud::streaming::{estimate_memory, optimal_cell_size, IngestPipeline, ResidentSet};

fn main() {
    logging::init();
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> helixcloud::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = match parse_str_arg(&args, "--config") {
        Some(path) => EngineConfig::load(PathBuf::from(path))?,
        None => EngineConfig::default(),
    };
    let length = parse_usize_arg(&args, "--length").unwrap_or(1_000_000);
    let seed = parse_usize_arg(&args, "--seed").unwrap_or(12345) as u64;
    let frames = parse_usize_arg(&args, "--frames").unwrap_or(8);

    log::info!("helixcloud demo: {} symbols, seed {}", length, seed);

    let projected = estimate_memory(length as u64, 100);
    log::info!(
        "Projected memory: {:.1} MB for {} voxels at 100 particles/voxel",
        projected.total_mb(),
        projected.voxel_count
    );
    if let Some(cell) = optimal_cell_size(length as u64, 100) {
        log::info!("Suggested cell size {:.2} (configured {})", cell, config.cell_size);
    }

    let sequence = synthetic_sequence(length, seed);
    let mut memory = MemoryManager::new(&config)?;
    let mut index = SpatialIndex::new(config.cell_size)?;
    let report = IngestPipeline::new(&config).run(&sequence, 0, &mut index, &mut memory, None)?;
    log::info!(
        "Index: {} particles, {} voxels, batch estimate {} ({:?})",
        report.particles,
        report.voxels,
        report.estimated_batches,
        report.batch_status
    );

    let Some(bounds) = index.bounds() else {
        log::warn!("Nothing to render");
        return Ok(());
    };
    let center = bounds.center();
    let radius = bounds.size().length().max(1.0);

    let mut builder = FrameBuilder::new(&config, Camera::default())?;
    let mut resident = ResidentSet::new(config.residency.clone(), config.memory_budget_mb)?;
    for i in 0..frames {
        let angle = i as f32 / frames.max(1) as f32 * std::f32::consts::TAU;
        let eye = center + Vec3::new(angle.cos() * radius, radius * 0.25, angle.sin() * radius);
        let camera = Camera::look_at(eye, center, Vec3::Y);

        let started = Instant::now();
        let frame = builder.build(&index, &camera, &mut memory);
        log::info!(
            "Frame {}: {}/{} voxels visible, {} particles ({} KB) in {:.2} ms{}",
            i,
            frame.stats.visible_voxels,
            frame.stats.total_voxels,
            frame.particles.len(),
            frame.as_bytes().len() / 1024,
            started.elapsed().as_secs_f64() * 1000.0,
            if frame.stats.truncated { " [truncated]" } else { "" }
        );

        let update = resident.update_camera(&index, eye);
        log::info!(
            "Residency {}: {} voxels resident (+{} -{} evicted {})",
            i,
            resident.len(),
            update.loaded,
            update.unloaded,
            update.evicted
        );
    }

    let stats = memory.stats();
    log::info!(
        "Memory: {:.1} MB reserved ({:.0}% of budget), arena high water {} particles",
        stats.reserved_bytes as f64 / (1024.0 * 1024.0),
        stats.pressure * 100.0,
        stats.arena_high_water
    );
    Ok(())
}

/// Reproducible pseudo-random ACGT string (xorshift64*)
fn synthetic_sequence(length: usize, seed: u64) -> Vec<u8> {
    const SYMBOLS: [u8; 4] = *b"ACGT";
    let mut state = seed | 1;
    (0..length)
        .map(|_| {
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            SYMBOLS[(state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 62) as usize]
        })
        .collect()
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    parse_str_arg(args, flag).and_then(|s| s.parse().ok())
}
