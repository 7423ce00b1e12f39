//! Two armies of melee and archer formations meeting in the middle.
//!
//! Run with: cargo run --example battle_demo
//! Set `RUST_LOG=warband_sim=debug` for per-frame output.

use glam::Vec3;
use tracing_subscriber::EnvFilter;
use warband_sim::{Faction, FormationSpec, LastBatch, SimConfig, SimError, Simulation, TerrainGrid, UnitKind};

fn main() -> Result<(), SimError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let terrain = TerrainGrid::rolling(256, 256, 2.0, 1.5);
    let mut sim = Simulation::with_terrain(SimConfig::default(), terrain)?;

    for (faction, side) in [(Faction::Blue, -1.0), (Faction::Red, 1.0)] {
        for lane in 0..3 {
            let z = (lane as f32 - 1.0) * 30.0;
            let melee = FormationSpec::new(faction, UnitKind::Melee, Vec3::new(side * 40.0, 0.0, z), 200);
            sim.spawn_formation(&melee)?;
        }
        let archers = FormationSpec::new(faction, UnitKind::Ranged, Vec3::new(side * 90.0, 0.0, 0.0), 150);
        sim.spawn_formation(&archers)?;
    }

    let mut sink = LastBatch::default();
    for second in 1..=30 {
        sim.step(1.0)?;
        sim.render(&mut sink);

        let snapshot = sim.snapshot();
        tracing::info!(
            second,
            blue = snapshot.alive_units("Blue"),
            red = snapshot.alive_units("Red"),
            arrows = snapshot.arrows.len(),
            instances = sink.instances.len(),
            "battle"
        );
        if sim.current_tick() > 60 && (snapshot.alive_units("Blue") == 0 || snapshot.alive_units("Red") == 0) {
            break;
        }
    }

    // The center of the field takes a hit.
    sim.queue_explosion(Vec3::ZERO, 12.0);
    sim.step(0.5)?;
    let report = sim.last_maintenance();
    tracing::info!(?report, jobs = ?sim.job_stats(), "after explosion");

    #[cfg(feature = "profile")]
    sim.profiler().log_summary();

    println!("{}", sim.snapshot().to_json_pretty()?);
    Ok(())
}
