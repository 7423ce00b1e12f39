//! Entity lifecycle manager.
//!
//! Jobs never change the population. They push requests through a
//! [`LifecycleWriter`]; once every fence of the frame has completed,
//! [`LifecycleManager::maintain`] applies them in one serial pass:
//!
//! 1. Drain confirmed deaths. Units lose their combat state and wait for
//!    final kill processing; arrows start a short dying timer.
//! 2. Final kills, at most `max_dying_units_per_frame`. The unit leaves the
//!    alive set, plays its death clip, starts sinking and is removed from its
//!    formation. Excess kills wait for the next frame.
//! 3. Convert-to-flying requests, bounded per frame. Units past the cap
//!    are marked `Launched` and sit out ground combat until their turn.
//! 4. Spawn queued projectiles, bounded per frame.
//! 5. Sink dying units and queue expired dying entities for destruction.
//! 6. Destroy everything in the kill queue.

use std::collections::VecDeque;
use std::sync::Arc;

use bevy_ecs::prelude::*;
use crossbeam_queue::SegQueue;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::components::*;
use crate::config::SimConfig;
use crate::spawner;

/// Data for a projectile to be created during maintenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrowSpawn {
    pub position: Vec3,
    pub velocity: Vec3,
    pub faction: Faction,
}

#[derive(Debug, Default)]
struct LifecycleQueues {
    kill: SegQueue<Entity>,
    death: SegQueue<Entity>,
    flying: SegQueue<Entity>,
    projectiles: SegQueue<ArrowSpawn>,
}

/// Producer handle onto the lifecycle queues. Cheap to clone and safe to use
/// from any worker.
#[derive(Debug, Clone)]
pub struct LifecycleWriter {
    queues: Arc<LifecycleQueues>,
}

impl LifecycleWriter {
    /// Destroy the entity at the end of maintenance.
    pub fn kill(&self, entity: Entity) {
        self.queues.kill.push(entity);
    }

    pub fn confirm_death(&self, entity: Entity) {
        self.queues.death.push(entity);
    }

    pub fn convert_to_flying(&self, entity: Entity) {
        self.queues.flying.push(entity);
    }

    pub fn spawn_projectile(&self, spawn: ArrowSpawn) {
        self.queues.projectiles.push(spawn);
    }
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub deaths: usize,
    pub final_kills: usize,
    pub deferred_kills: usize,
    pub conversions: usize,
    pub deferred_conversions: usize,
    pub spawned_projectiles: usize,
    pub expired: usize,
    pub destroyed: usize,
    pub formations_wiped: usize,
}

impl MaintenanceReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug)]
pub struct LifecycleManager {
    queues: Arc<LifecycleQueues>,
    final_kills: VecDeque<Entity>,
    conversions: VecDeque<Entity>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(LifecycleQueues::default()),
            final_kills: VecDeque::new(),
            conversions: VecDeque::new(),
        }
    }

    pub fn writer(&self) -> LifecycleWriter {
        LifecycleWriter {
            queues: Arc::clone(&self.queues),
        }
    }

    /// Kills waiting for a later frame.
    pub fn pending_final_kills(&self) -> usize {
        self.final_kills.len()
    }

    pub fn pending_conversions(&self) -> usize {
        self.queues.flying.len() + self.conversions.len()
    }

    pub fn pending_projectiles(&self) -> usize {
        self.queues.projectiles.len()
    }

    /// Run the serial maintenance pass. `time` is the simulation time at the
    /// end of the frame.
    pub fn maintain(&mut self, world: &mut World, time: f32, config: &SimConfig) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        self.drain_deaths(world, time, config, &mut report);
        self.process_final_kills(world, time, config, &mut report);
        self.process_conversions(world, config, &mut report);
        self.spawn_projectiles(world, config, &mut report);
        self.sink_and_expire(world, time, config, &mut report);
        self.destroy(world, &mut report);

        report.deferred_kills = self.final_kills.len();
        report.deferred_conversions = self.conversions.len();
        if report.deferred_kills > 0 {
            tracing::warn!(deferred = report.deferred_kills, "final kill cap reached, deferring");
        }
        if !report.is_idle() {
            tracing::debug!(?report, "lifecycle maintenance");
        }
        report
    }

    fn drain_deaths(&mut self, world: &mut World, time: f32, config: &SimConfig, report: &mut MaintenanceReport) {
        while let Some(entity) = self.queues.death.pop() {
            let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
                continue;
            };
            if let Some(arrow) = entity_mut.get::<Arrow>().copied() {
                if !entity_mut.contains::<Dying>() {
                    entity_mut.insert(Dying {
                        expire_at: time + config.arrow_dying_time,
                        start_y: arrow.position.y,
                    });
                    report.deaths += 1;
                }
            } else if entity_mut.take::<CombatState>().is_some() {
                self.final_kills.push_back(entity);
                report.deaths += 1;
            }
        }
    }

    fn process_final_kills(
        &mut self,
        world: &mut World,
        time: f32,
        config: &SimConfig,
        report: &mut MaintenanceReport,
    ) {
        let budget = config.max_dying_units_per_frame.min(self.final_kills.len());
        for entity in self.final_kills.drain(..budget) {
            let Ok(mut unit) = world.get_entity_mut(entity) else {
                continue;
            };
            unit.remove::<(AliveMinion, Flying)>();
            let transform = unit.get::<UnitTransform>().copied();
            let index = unit.get::<FormationIndex>().copied();
            if let Some(mut animator) = unit.get_mut::<Animator>() {
                animator.current = AnimationClip::Death;
                animator.requested = AnimationClip::Death;
                animator.normalized_time = 0.0;
            }
            if let Some(mut bits) = unit.get_mut::<UnitBitmask>() {
                bits.alive = false;
            }
            if let Some(mut target) = unit.get_mut::<AttackTarget>() {
                *target = AttackTarget::default();
            }
            unit.insert(Dying {
                expire_at: time + config.unit_dying_time,
                start_y: transform.map_or(0.0, |t| t.position.y),
            });
            report.final_kills += 1;

            let (Some(transform), Some(index)) = (transform, index) else {
                continue;
            };
            if remove_from_formation(world, transform.formation, entity, index) {
                report.formations_wiped += 1;
            }
        }
    }

    fn process_conversions(&mut self, world: &mut World, config: &SimConfig, report: &mut MaintenanceReport) {
        while let Some(entity) = self.queues.flying.pop() {
            self.conversions.push_back(entity);
        }

        let budget = config.max_flying_conversions_per_frame.min(self.conversions.len());
        for entity in self.conversions.drain(..budget) {
            let Ok(mut unit) = world.get_entity_mut(entity) else {
                continue;
            };
            unit.remove::<Launched>();
            if !unit.contains::<AliveMinion>() || !unit.contains::<CombatState>() {
                continue;
            }
            unit.remove::<AliveMinion>();
            unit.insert(Flying);
            if let Some(mut animator) = unit.get_mut::<Animator>() {
                animator.requested = AnimationClip::Falling;
            }
            if let Some(mut target) = unit.get_mut::<AttackTarget>() {
                *target = AttackTarget::default();
            }
            report.conversions += 1;
        }

        for &entity in &self.conversions {
            if let Ok(mut unit) = world.get_entity_mut(entity) {
                if unit.contains::<AliveMinion>() {
                    unit.insert(Launched);
                }
            }
        }
    }

    fn spawn_projectiles(&mut self, world: &mut World, config: &SimConfig, report: &mut MaintenanceReport) {
        for _ in 0..config.max_spawned_projectiles_per_frame {
            let Some(spawn) = self.queues.projectiles.pop() else {
                break;
            };
            spawner::spawn_arrow(world, &spawn);
            report.spawned_projectiles += 1;
        }
    }

    fn sink_and_expire(&mut self, world: &mut World, time: f32, config: &SimConfig, report: &mut MaintenanceReport) {
        let mut sinking = world.query::<(&Dying, &mut UnitTransform)>();
        for (dying, mut transform) in sinking.iter_mut(world) {
            let remaining = (dying.expire_at - time).max(0.0);
            let progress = (1.0 - remaining / config.unit_dying_time).clamp(0.0, 1.0);
            transform.position.y = dying.start_y - config.sink_depth * progress;
        }

        let mut expired = world.query::<(Entity, &Dying)>();
        for (entity, dying) in expired.iter(world) {
            if time > dying.expire_at {
                self.queues.kill.push(entity);
                report.expired += 1;
            }
        }
    }

    fn destroy(&mut self, world: &mut World, report: &mut MaintenanceReport) {
        while let Some(entity) = self.queues.kill.pop() {
            if world.despawn(entity) {
                report.destroyed += 1;
            }
        }
    }
}

/// Take one dead member off its formation's books. Returns true when the
/// formation has just lost its last member.
fn remove_from_formation(world: &mut World, formation: Entity, unit: Entity, index: FormationIndex) -> bool {
    let Ok(mut formation_mut) = world.get_entity_mut(formation) else {
        return false;
    };
    if let Some(mut members) = formation_mut.get_mut::<FormationMembers>() {
        members.release(index.0 as usize, unit);
    }
    let wiped = formation_mut
        .get_mut::<FormationData>()
        .is_some_and(|mut data| data.remove_member());
    if wiped {
        if let Some(mut navigator) = formation_mut.get_mut::<CrowdNavigator>() {
            navigator.active = false;
        }
        tracing::info!(?formation, "formation wiped out");
    }
    wiped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(units: u32) -> (World, Entity, Vec<Entity>) {
        let mut world = World::new();
        let mut data = FormationData::new(Faction::Blue, Vec3::ZERO, Vec3::Z, units);
        data.spawned_count = units;
        let formation = world
            .spawn(FormationBundle {
                data,
                navigation: FormationNavigation::default(),
                agent: CrowdAgent::default(),
                navigator: CrowdNavigator::default(),
                closest: ClosestFormation::default(),
                path: HighLevelPath::default(),
                members: FormationMembers::with_capacity(units as usize),
                integrity: FormationIntegrity::default(),
            })
            .id();

        let mut handles = Vec::new();
        for i in 0..units {
            let unit = world
                .spawn(UnitBundle {
                    transform: UnitTransform::new(Vec3::new(i as f32, 2.0, 0.0), Vec3::Z, formation),
                    rigidbody: Rigidbody::default(),
                    bitmask: UnitBitmask::new(Faction::Blue),
                    combat: CombatState::new(0.0),
                    target: AttackTarget::default(),
                    animator: Animator::default(),
                    index: FormationIndex(i),
                    destination: Destination::default(),
                    kind: UnitKind::Melee,
                    alive: AliveMinion,
                })
                .id();
            world.get_mut::<FormationMembers>(formation).unwrap().slots[i as usize] = unit;
            handles.push(unit);
        }
        (world, formation, handles)
    }

    #[test]
    fn test_last_death_wipes_formation() {
        let (mut world, formation, units) = setup(1);
        let mut manager = LifecycleManager::new();
        manager.writer().confirm_death(units[0]);

        let report = manager.maintain(&mut world, 1.0, &SimConfig::default());
        assert_eq!(report.final_kills, 1);
        assert_eq!(report.formations_wiped, 1);

        let data = world.get::<FormationData>(formation).unwrap();
        assert_eq!(data.unit_count, 0);
        assert_eq!(data.state, FormationState::AllDead);
        assert!(!world.get::<CrowdNavigator>(formation).unwrap().active);
        assert_eq!(world.get::<FormationMembers>(formation).unwrap().occupied(), 0);

        let unit = world.entity(units[0]);
        assert!(!unit.contains::<AliveMinion>());
        assert!(!unit.contains::<CombatState>());
        assert!(unit.contains::<Dying>());
        assert_eq!(unit.get::<Animator>().unwrap().current, AnimationClip::Death);
    }

    #[test]
    fn test_final_kills_are_capped() {
        let (mut world, formation, units) = setup(300);
        let mut manager = LifecycleManager::new();
        let writer = manager.writer();
        for &unit in &units {
            writer.confirm_death(unit);
        }
        let config = SimConfig::default();

        let first = manager.maintain(&mut world, 1.0, &config);
        assert_eq!(first.deaths, 300);
        assert_eq!(first.final_kills, 250);
        assert_eq!(first.deferred_kills, 50);
        assert_eq!(world.get::<FormationData>(formation).unwrap().unit_count, 50);

        let second = manager.maintain(&mut world, 1.1, &config);
        assert_eq!(second.final_kills, 50);
        assert_eq!(manager.pending_final_kills(), 0);
        assert_eq!(world.get::<FormationData>(formation).unwrap().state, FormationState::AllDead);
    }

    #[test]
    fn test_arrow_death_starts_timer_then_destroys() {
        let mut world = World::new();
        let arrow = world
            .spawn(Arrow {
                position: Vec3::new(0.0, 0.5, 0.0),
                velocity: Vec3::ZERO,
                active: false,
                faction: Faction::Red,
            })
            .id();
        let mut manager = LifecycleManager::new();
        let config = SimConfig::default();
        manager.writer().confirm_death(arrow);

        manager.maintain(&mut world, 2.0, &config);
        assert_eq!(world.get::<Dying>(arrow).unwrap().expire_at, 2.0 + config.arrow_dying_time);

        // Expiry is strictly after the deadline.
        let report = manager.maintain(&mut world, 2.0 + config.arrow_dying_time, &config);
        assert_eq!(report.destroyed, 0);
        assert!(world.get_entity(arrow).is_ok());

        let report = manager.maintain(&mut world, 2.1 + config.arrow_dying_time, &config);
        assert_eq!(report.destroyed, 1);
        assert!(world.get_entity(arrow).is_err());
    }

    #[test]
    fn test_missing_handles_are_ignored() {
        let mut world = World::new();
        let ghost = world.spawn_empty().id();
        world.despawn(ghost);
        let mut manager = LifecycleManager::new();
        let writer = manager.writer();
        writer.confirm_death(ghost);
        writer.convert_to_flying(ghost);
        writer.kill(ghost);

        let report = manager.maintain(&mut world, 0.0, &SimConfig::default());
        assert!(report.is_idle());
    }

    #[test]
    fn test_flying_conversion() {
        let (mut world, _, units) = setup(2);
        let mut manager = LifecycleManager::new();
        manager.writer().convert_to_flying(units[1]);
        manager.writer().convert_to_flying(units[1]);

        let report = manager.maintain(&mut world, 0.0, &SimConfig::default());
        assert_eq!(report.conversions, 1);
        let unit = world.entity(units[1]);
        assert!(unit.contains::<Flying>());
        assert!(!unit.contains::<AliveMinion>());
        assert_eq!(unit.get::<Animator>().unwrap().requested, AnimationClip::Falling);
    }

    #[test]
    fn test_capped_conversions_hold_units_out_of_combat() {
        let (mut world, _, units) = setup(3);
        let config = SimConfig {
            max_flying_conversions_per_frame: 1,
            ..Default::default()
        };
        for &unit in &units {
            world.get_mut::<Rigidbody>(unit).unwrap().velocity = Vec3::new(1.0, 8.0, 0.0);
        }
        let mut manager = LifecycleManager::new();
        let writer = manager.writer();
        for &unit in &units {
            writer.convert_to_flying(unit);
        }

        let report = manager.maintain(&mut world, 0.0, &config);
        assert_eq!(report.conversions, 1);
        assert_eq!(report.deferred_conversions, 2);
        assert!(world.entity(units[0]).contains::<Flying>());
        for &held in &units[1..] {
            let unit = world.entity(held);
            assert!(unit.contains::<Launched>());
            assert!(!unit.contains::<Flying>());
            assert_eq!(unit.get::<Rigidbody>().unwrap().velocity, Vec3::new(1.0, 8.0, 0.0));
        }

        let report = manager.maintain(&mut world, 0.1, &config);
        assert_eq!(report.conversions, 1);
        let unit = world.entity(units[1]);
        assert!(unit.contains::<Flying>());
        assert!(!unit.contains::<Launched>());

        manager.maintain(&mut world, 0.2, &config);
        assert_eq!(manager.pending_conversions(), 0);
        assert!(world.entity(units[2]).contains::<Flying>());
    }

    #[test]
    fn test_dying_units_sink() {
        let (mut world, _, units) = setup(1);
        let config = SimConfig::default();
        let mut manager = LifecycleManager::new();
        manager.writer().confirm_death(units[0]);
        manager.maintain(&mut world, 0.0, &config);

        manager.maintain(&mut world, config.unit_dying_time * 0.5, &config);
        let y = world.get::<UnitTransform>(units[0]).unwrap().position.y;
        assert!((y - (2.0 - config.sink_depth * 0.5)).abs() < 1e-5);
    }
}
