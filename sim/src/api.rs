//! Public API for the simulation.
//!
//! `Simulation` owns the ECS world, the worker pool and every piece of state
//! that lives across frames. One frame runs in four phases:
//!
//! 1. Serial prelude: crowd agents step, pending units materialize, and the
//!    population is extracted into flat buffers.
//! 2. Jobs: the pipeline schedules every stage and waits for all fences.
//! 3. Write-back of the buffers onto their entities.
//! 4. Lifecycle maintenance, the only place entities die or change shape.
//!
//! ## Fixed Timestep
//!
//! The simulation uses a fixed timestep internally (default 30 Hz). When
//! `step(dt)` is called, the simulation accumulates time and runs fixed
//! updates as needed. `step_frame(dt)` runs exactly one frame of `dt`.

use std::sync::Arc;

use bevy_ecs::prelude::*;
use glam::Vec3;

use crate::components::*;
use crate::config::SimConfig;
use crate::error::SimError;
use crate::frame::{FrameBuffers, FrameContext};
use crate::jobs::{Buffer, JobGraph, JobStats};
use crate::lifecycle::{LifecycleManager, MaintenanceReport};
use crate::navigation::step_crowd_agents;
use crate::pipeline::{run_frame, FrameJobs};
#[cfg(feature = "profile")]
use crate::profiler::Profiler;
use crate::render::{collect_instances, RenderInstance, RenderSink};
use crate::spatial::{SpatialEntry, SpatialHash};
use crate::spawner::{self, FormationSpec};
use crate::systems::{archer, CommandQueue, Explosion};
use crate::terrain::{GroundQuery, TerrainGrid};
use crate::world::Snapshot;

/// The main simulation container.
pub struct Simulation {
    world: World,
    config: Arc<SimConfig>,
    graph: JobGraph,
    terrain: Arc<TerrainGrid>,
    ground: Arc<dyn GroundQuery>,
    spatial: Buffer<SpatialHash>,
    lifecycle: LifecycleManager,
    commands: CommandQueue,
    explosions: Vec<Explosion>,
    tick: u64,
    time: f32,
    /// Shared archer cycle.
    archer_cycle: f32,
    /// Accumulated time for fixed timestep.
    time_accumulator: f32,
    /// Instances from the last frame whose jobs all succeeded.
    render_cache: Vec<RenderInstance>,
    last_frame_clean: bool,
    last_report: MaintenanceReport,
    #[cfg(feature = "profile")]
    profiler: Profiler,
}

impl Simulation {
    /// Simulation on flat ground with default settings.
    pub fn new() -> Result<Self, SimError> {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Result<Self, SimError> {
        Self::with_terrain(config, TerrainGrid::flat(512, 512, 2.0))
    }

    pub fn with_terrain(config: SimConfig, terrain: TerrainGrid) -> Result<Self, SimError> {
        config.validate()?;
        let graph = JobGraph::new(config.worker_threads)?;

        let mut hash = SpatialHash::from_config(&config);
        hash.try_reserve(config.initial_unit_capacity)?;

        let terrain = Arc::new(terrain);
        let ground: Arc<dyn GroundQuery> = terrain.clone();

        tracing::info!(
            workers = graph.worker_count(),
            fixed_timestep = config.fixed_timestep,
            capacity = config.initial_unit_capacity,
            "simulation created"
        );

        Ok(Self {
            world: World::new(),
            config: Arc::new(config),
            graph,
            terrain,
            ground,
            spatial: Buffer::new("spatial", hash),
            lifecycle: LifecycleManager::new(),
            commands: CommandQueue::new(),
            explosions: Vec::new(),
            tick: 0,
            time: 0.0,
            archer_cycle: CombatState::IDLE_CYCLE,
            time_accumulator: 0.0,
            render_cache: Vec::new(),
            last_frame_clean: true,
            last_report: MaintenanceReport::default(),
            #[cfg(feature = "profile")]
            profiler: Profiler::new(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Create a formation. Its units appear over the following frames.
    pub fn spawn_formation(&mut self, spec: &FormationSpec) -> Result<Entity, SimError> {
        Ok(spawner::spawn_formation(&mut self.world, spec, &self.config)?)
    }

    /// Queue an explosion for the next frame.
    pub fn queue_explosion(&mut self, center: Vec3, radius: f32) {
        self.explosions.push(Explosion {
            center,
            radius,
            force: self.config.explosion_force,
        });
    }

    /// Step the simulation forward by `dt` seconds.
    ///
    /// Uses fixed timestep internally - accumulates time and runs fixed updates
    /// as needed. Returns the number of frames run.
    pub fn step(&mut self, dt: f32) -> Result<u32, SimError> {
        let fixed_dt = self.config.fixed_timestep;
        self.time_accumulator += dt;

        let mut frames = 0;
        while self.time_accumulator >= fixed_dt {
            self.step_frame(fixed_dt)?;
            self.time_accumulator -= fixed_dt;
            frames += 1;
        }
        Ok(frames)
    }

    /// Run exactly one frame of `dt` seconds.
    pub fn step_frame(&mut self, dt: f32) -> Result<(), SimError> {
        let _span = tracing::debug_span!("frame", tick = self.tick).entered();
        let config = Arc::clone(&self.config);

        if self.spatial.recover() {
            tracing::warn!("spatial hash recovered after a failed frame");
        }

        #[cfg(feature = "profile")]
        self.profiler.begin_section("extract");
        step_crowd_agents(&mut self.world, self.terrain.as_ref(), dt, config.move_epsilon);
        spawner::materialize_units(&mut self.world, self.terrain.as_ref(), &config);
        let frame = FrameBuffers::extract(&mut self.world, self.spatial.clone());

        let ctx = FrameContext {
            dt,
            time: self.time,
            tick: self.tick,
            archer_volley: archer::advance_volley(&mut self.archer_cycle, dt, &config),
        };
        let explosions = Arc::new(std::mem::take(&mut self.explosions));

        #[cfg(feature = "profile")]
        self.profiler.begin_section("pipeline");
        let before = self.graph.stats();
        let jobs = FrameJobs {
            graph: &self.graph,
            config: &config,
            ground: &self.ground,
            lifecycle: &self.lifecycle.writer(),
            commands: &self.commands,
        };
        let outcome = run_frame(&jobs, &frame, ctx, explosions);
        let frame_stats = self.graph.stats().since(&before);
        tracing::debug!(stats = ?frame_stats, "frame jobs done");

        #[cfg(feature = "profile")]
        self.profiler.begin_section("write_back");
        // Buffers a panicking job held may be half-written, so the world
        // keeps its pre-frame state.
        let poisoned = frame.poisoned();
        if poisoned.is_empty() {
            frame.write_back(&mut self.world)?;
        } else {
            tracing::warn!(?poisoned, "frame buffers poisoned, write-back skipped");
        }

        self.time += dt;
        self.tick += 1;

        #[cfg(feature = "profile")]
        self.profiler.begin_section("maintenance");
        self.last_report = self.lifecycle.maintain(&mut self.world, self.time, &config);

        // A frame with failed jobs keeps showing the previous good state.
        self.last_frame_clean = frame_stats.is_clean() && poisoned.is_empty() && outcome.is_ok();
        if self.last_frame_clean {
            collect_instances(&mut self.world, &mut self.render_cache);
        } else {
            tracing::warn!(stats = ?frame_stats, "frame had job failures, render state held");
        }

        #[cfg(feature = "profile")]
        {
            self.profiler.end_section();
            self.profiler.tick();
        }
        Ok(outcome?)
    }

    /// Submit the latest consistent instance batch.
    pub fn render(&self, sink: &mut dyn RenderSink) {
        sink.submit(&self.render_cache);
    }

    pub fn last_frame_clean(&self) -> bool {
        self.last_frame_clean
    }

    pub fn last_maintenance(&self) -> MaintenanceReport {
        self.last_report
    }

    pub fn job_stats(&self) -> JobStats {
        self.graph.stats()
    }

    /// Get a snapshot of the current simulation state.
    pub fn snapshot(&mut self) -> Snapshot {
        let mut snapshot = Snapshot::from_world(&mut self.world, self.tick, self.time);
        snapshot.jobs = self.graph.stats();
        snapshot.maintenance = self.last_report;
        snapshot
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&mut self) -> Result<String, SimError> {
        Ok(self.snapshot().to_json()?)
    }

    /// Entries of the spatial cell containing `position`, as of the last
    /// rebuild.
    pub fn units_in_cell(&self, position: Vec3) -> Vec<SpatialEntry> {
        match self.spatial.read() {
            Ok(hash) => hash.query_cell(position).copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Get the current tick number.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Get the elapsed simulation time.
    pub fn current_time(&self) -> f32 {
        self.time
    }

    pub fn terrain(&self) -> &TerrainGrid {
        &self.terrain
    }

    #[cfg(feature = "profile")]
    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Get direct access to the ECS world (for advanced usage).
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Get mutable access to the ECS world (for advanced usage).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::LastBatch;

    fn sim() -> Simulation {
        Simulation::with_config(SimConfig {
            worker_threads: 2,
            ..Default::default()
        })
        .unwrap()
    }

    fn spawn(sim: &mut Simulation, faction: Faction, kind: UnitKind, x: f32, units: u32) -> Entity {
        let spec = FormationSpec::new(faction, kind, Vec3::new(x, 0.0, 0.0), units);
        sim.spawn_formation(&spec).unwrap()
    }

    fn run(sim: &mut Simulation, frames: usize) {
        for _ in 0..frames {
            sim.step_frame(1.0 / 30.0).unwrap();
        }
    }

    #[test]
    fn test_new_simulation() {
        let sim = sim();
        assert_eq!(sim.current_tick(), 0);
    }

    #[test]
    fn test_step_accumulates_fixed_frames() {
        let mut sim = sim();
        assert_eq!(sim.step(0.02).unwrap(), 0);
        assert_eq!(sim.step(0.02).unwrap(), 1);
        assert_eq!(sim.current_tick(), 1);
    }

    #[test]
    fn test_invalid_config_fails_at_construction() {
        let config = SimConfig {
            hit_time: 5.0,
            ..Default::default()
        };
        assert!(matches!(Simulation::with_config(config), Err(SimError::Config(_))));
    }

    #[test]
    fn test_units_materialize_and_appear_in_hash() {
        let mut sim = sim();
        spawn(&mut sim, Faction::Blue, UnitKind::Melee, 0.0, 120);
        run(&mut sim, 4);

        // The rebuild at the start of the next frame indexes the positions
        // every unit holds now.
        let mut query = sim.world_mut().query_filtered::<&UnitTransform, With<AliveMinion>>();
        let positions: Vec<Vec3> = query.iter(sim.world()).map(|transform| transform.position).collect();
        assert_eq!(positions.len(), 120);
        run(&mut sim, 1);

        for position in positions {
            let cell = sim.units_in_cell(position);
            assert!(
                cell.iter().any(|entry| entry.position == position && entry.faction == Faction::Blue),
                "unit at {position} missing from its own cell"
            );
        }
        assert!(sim.job_stats().is_clean());
    }

    #[test]
    fn test_last_unit_death_marks_formation_all_dead() {
        let mut sim = sim();
        let formation = spawn(&mut sim, Faction::Blue, UnitKind::Melee, 0.0, 1);
        run(&mut sim, 1);

        let unit = sim.world().get::<FormationMembers>(formation).unwrap().slots[0];
        assert_ne!(unit, NULL_HANDLE);
        let data = *sim.world().get::<FormationData>(formation).unwrap();
        assert_eq!((data.unit_count, data.spawned_count), (1, 1));

        sim.world_mut().get_mut::<CombatState>(unit).unwrap().health = 0.0;
        run(&mut sim, 1);

        let data = *sim.world().get::<FormationData>(formation).unwrap();
        assert_eq!(data.unit_count, 0);
        assert_eq!(data.state, FormationState::AllDead);
        assert!(sim.world().get::<AliveMinion>(unit).is_none());

        // The next rebuild no longer sees the unit.
        run(&mut sim, 1);
        let position = sim.world().get::<UnitTransform>(unit).unwrap().position;
        assert!(sim.units_in_cell(position).is_empty());
    }

    #[test]
    fn test_falling_arrow_dies_on_exact_impact_tick() {
        let mut sim = sim();
        let dt = 1.0 / 30.0;
        let gravity = sim.config().gravity;
        let arrow = sim
            .world_mut()
            .spawn(Arrow {
                position: Vec3::new(0.0, 5.0, 0.0),
                velocity: Vec3::new(0.0, -2.0, 0.0),
                active: true,
                faction: Faction::Red,
            })
            .id();

        // Predict the tick on which the arrow first reaches the ground. Each
        // tick moves it with the velocity it entered the tick with.
        let (mut y, mut vy, mut impact_tick) = (5.0f32, -2.0f32, 0u64);
        while y > 0.0 {
            y += vy * dt;
            vy += gravity * dt;
            impact_tick += 1;
        }
        assert_eq!(impact_tick, 26);

        for tick in 1..=impact_tick {
            sim.step_frame(dt).unwrap();
            let dying = sim.world().get::<Dying>(arrow).is_some();
            assert_eq!(dying, tick == impact_tick, "tick {tick}");
        }
        assert!(!sim.world().get::<Arrow>(arrow).unwrap().active);
    }

    #[test]
    fn test_arrows_hit_units_at_their_moved_position() {
        let mut sim = sim();
        let formation = sim
            .spawn_formation(&FormationSpec::new(Faction::Blue, UnitKind::Melee, Vec3::new(3.0, 0.0, 1.0), 1))
            .unwrap();
        run(&mut sim, 1);

        let unit = sim.world().get::<FormationMembers>(formation).unwrap().slots[0];
        let slot = sim.world().get::<Destination>(unit).unwrap().target;

        // The unit starts 1.2 away from its slot, in the same hash cell, and
        // walks the whole way this frame. The arrow waits above the slot.
        let start = slot + Vec3::new(1.2, 0.0, 0.0);
        let step = sim.config().grid_step;
        assert_eq!((start.x / step).floor(), (slot.x / step).floor());
        assert_eq!((start.z / step).floor(), (slot.z / step).floor());
        sim.world_mut().get_mut::<UnitTransform>(unit).unwrap().position = start;
        let arrow = sim
            .world_mut()
            .spawn(Arrow {
                position: slot + Vec3::new(0.0, 0.5, 0.0),
                velocity: Vec3::ZERO,
                active: true,
                faction: Faction::Red,
            })
            .id();
        assert!(start.distance(slot + Vec3::new(0.0, 0.5, 0.0)) > sim.config().arrow_hit_radius);

        sim.step_frame(0.5).unwrap();

        let moved = sim.world().get::<UnitTransform>(unit).unwrap().position;
        assert!((moved.x - slot.x).abs() < 1e-4, "unit at {moved}");
        let expected = sim.config().unit_health - sim.config().arrow_damage;
        assert_eq!(sim.world().get::<CombatState>(unit).unwrap().health, expected);
        assert!(sim.world().get_entity(arrow).is_err());
    }

    #[test]
    fn test_exploded_unit_flies_lands_and_dies() {
        let mut sim = sim();
        let formation = spawn(&mut sim, Faction::Blue, UnitKind::Melee, 0.0, 1);
        run(&mut sim, 1);
        let unit = sim.world().get::<FormationMembers>(formation).unwrap().slots[0];
        let position = sim.world().get::<UnitTransform>(unit).unwrap().position;

        sim.queue_explosion(position, 5.0);
        run(&mut sim, 1);
        assert_eq!(sim.last_maintenance().conversions, 1);
        let launched = sim.world().entity(unit);
        assert!(launched.contains::<Flying>());
        assert!(!launched.contains::<AliveMinion>());
        assert!(launched.get::<Rigidbody>().unwrap().velocity.y > 0.0);

        let mut peak = position.y;
        let mut frames = 0;
        while sim.world().get::<Dying>(unit).is_none() {
            assert!(frames < 300, "unit never landed");
            run(&mut sim, 1);
            peak = peak.max(sim.world().get::<UnitTransform>(unit).unwrap().position.y);
            frames += 1;
        }
        assert!(peak > position.y + 1.0);

        let landed = sim.world().entity(unit);
        assert!(!landed.contains::<Flying>());
        assert!(!landed.contains::<CombatState>());
        assert_eq!(landed.get::<Animator>().unwrap().current, AnimationClip::Death);
        let data = *sim.world().get::<FormationData>(formation).unwrap();
        assert_eq!(data.unit_count, 0);
        assert_eq!(data.state, FormationState::AllDead);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_panicking_job_still_runs_maintenance() {
        let mut sim = sim();
        let formation = spawn(&mut sim, Faction::Blue, UnitKind::Melee, 0.0, 3);
        run(&mut sim, 1);
        let slots = sim.world().get::<FormationMembers>(formation).unwrap().slots.clone();
        let (broken, victim) = (slots[0], slots[1]);

        // An out-of-range formation index makes compaction panic.
        let original = *sim.world().get::<FormationIndex>(broken).unwrap();
        sim.world_mut().get_mut::<FormationIndex>(broken).unwrap().0 = 999;
        sim.world_mut().get_mut::<CombatState>(victim).unwrap().health = 0.0;

        sim.step_frame(1.0 / 30.0).unwrap();
        assert_eq!(sim.current_tick(), 2);
        assert!(!sim.last_frame_clean());
        assert!(sim.job_stats().failures > 0);
        assert!(sim.world().get::<Dying>(victim).is_some());
        assert_eq!(sim.world().get::<FormationData>(formation).unwrap().unit_count, 2);
        // Nothing from the failed frame reached the world.
        assert_eq!(sim.world().get::<FormationIndex>(broken).unwrap().0, 999);

        *sim.world_mut().get_mut::<FormationIndex>(broken).unwrap() = original;
        let before = sim.job_stats();
        run(&mut sim, 1);
        assert!(sim.job_stats().since(&before).is_clean());
        assert!(sim.last_frame_clean());
    }

    #[test]
    fn test_opposing_formations_aggro_each_other() {
        let mut sim = sim();
        let blue = spawn(&mut sim, Faction::Blue, UnitKind::Melee, -25.0, 4);
        let red = spawn(&mut sim, Faction::Red, UnitKind::Melee, 25.0, 4);
        run(&mut sim, 1);

        let blue_data = *sim.world().get::<FormationData>(blue).unwrap();
        let red_data = *sim.world().get::<FormationData>(red).unwrap();
        assert_eq!(sim.world().get::<ClosestFormation>(blue).unwrap().entity, red);
        assert_eq!(sim.world().get::<ClosestFormation>(red).unwrap().entity, blue);
        assert_eq!(blue_data.target, red_data.position);
        assert_eq!(red_data.target, blue_data.position);
    }

    #[test]
    fn test_battle_runs_clean() {
        let mut sim = sim();
        spawn(&mut sim, Faction::Blue, UnitKind::Melee, -12.0, 60);
        spawn(&mut sim, Faction::Blue, UnitKind::Ranged, -40.0, 30);
        spawn(&mut sim, Faction::Red, UnitKind::Melee, 12.0, 60);
        spawn(&mut sim, Faction::Red, UnitKind::Ranged, 40.0, 30);

        run(&mut sim, 150);
        sim.queue_explosion(Vec3::ZERO, 6.0);
        run(&mut sim, 150);

        let stats = sim.job_stats();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.conflicts, 0);
        assert!(sim.last_frame_clean());

        // Formation invariants hold after a long fight.
        let mut query = sim.world_mut().query::<&FormationData>();
        for data in query.iter(sim.world()) {
            assert!(data.spawned_count <= data.unit_count);
            assert_eq!(data.state == FormationState::AllDead, data.unit_count == 0);
        }

        let json = sim.snapshot_json().unwrap();
        assert!(json.contains("formations"));
    }

    #[test]
    fn test_render_resubmits_last_clean_batch() {
        let mut sim = sim();
        spawn(&mut sim, Faction::Red, UnitKind::Melee, 0.0, 10);
        run(&mut sim, 2);

        let mut sink = LastBatch::default();
        sim.render(&mut sink);
        assert_eq!(sink.instances.len(), 10);
        sim.render(&mut sink);
        assert_eq!(sink.submissions, 2);
    }
}
