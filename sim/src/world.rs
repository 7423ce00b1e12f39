//! Snapshot types.
//!
//! The `Snapshot` struct provides a serializable view of the simulation state
//! for debugging and visualization tools.

use crate::components::*;
use crate::jobs::JobStats;
use crate::lifecycle::MaintenanceReport;
use bevy_ecs::prelude::*;
use bevy_ecs::query::Has;
use serde::{Deserialize, Serialize};

/// Snapshot of a single formation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormationSnapshot {
    pub id: u64,
    pub faction: String,
    pub state: FormationState,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub target_x: f32,
    pub target_z: f32,
    pub width: u32,
    pub unit_count: u32,
    pub spawned_count: u32,
    /// Closest enemy formation, if any.
    pub closest: Option<u64>,
    pub integrity: FormationIntegrity,
}

/// Snapshot of a single unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: u64,
    pub formation: Option<u64>,
    pub index: u32,
    pub faction: String,
    pub kind: UnitKind,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Absent once death has been confirmed.
    pub health: Option<f32>,
    pub target: Option<u64>,
    pub animation: AnimationClip,
    pub flying: bool,
    pub dying: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrowSnapshot {
    pub id: u64,
    pub faction: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub active: bool,
    pub dying: bool,
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current simulation tick.
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub time: f32,
    pub formations: Vec<FormationSnapshot>,
    pub units: Vec<UnitSnapshot>,
    pub arrows: Vec<ArrowSnapshot>,
    /// Job counters since the simulation started.
    pub jobs: JobStats,
    /// Last lifecycle maintenance pass.
    pub maintenance: MaintenanceReport,
}

fn handle(entity: Entity) -> Option<u64> {
    (entity != NULL_HANDLE).then(|| entity.to_bits())
}

impl Snapshot {
    /// Create a snapshot from the ECS world. Entries are ordered by id.
    pub fn from_world(world: &mut World, tick: u64, time: f32) -> Self {
        let mut formations = Vec::new();
        let mut formation_query = world.query::<(Entity, &FormationData, &ClosestFormation, &FormationIntegrity)>();
        for (entity, data, closest, integrity) in formation_query.iter(world) {
            formations.push(FormationSnapshot {
                id: entity.to_bits(),
                faction: data.faction.name().to_string(),
                state: data.state,
                x: data.position.x,
                y: data.position.y,
                z: data.position.z,
                target_x: data.target.x,
                target_z: data.target.z,
                width: data.width,
                unit_count: data.unit_count,
                spawned_count: data.spawned_count,
                closest: handle(closest.entity),
                integrity: *integrity,
            });
        }

        let mut units = Vec::new();
        let mut unit_query = world.query::<(
            Entity,
            &UnitTransform,
            &UnitBitmask,
            &FormationIndex,
            &UnitKind,
            &Animator,
            Option<&CombatState>,
            Option<&AttackTarget>,
            Has<Flying>,
            Has<Dying>,
        )>();
        for (entity, transform, bits, index, kind, animator, combat, target, flying, dying) in unit_query.iter(world) {
            units.push(UnitSnapshot {
                id: entity.to_bits(),
                formation: handle(transform.formation),
                index: index.0,
                faction: bits.faction.name().to_string(),
                kind: *kind,
                x: transform.position.x,
                y: transform.position.y,
                z: transform.position.z,
                health: combat.map(|c| c.health),
                target: target.and_then(|t| handle(t.entity)),
                animation: animator.current,
                flying,
                dying,
            });
        }

        let mut arrows = Vec::new();
        let mut arrow_query = world.query::<(Entity, &Arrow, Has<Dying>)>();
        for (entity, arrow, dying) in arrow_query.iter(world) {
            arrows.push(ArrowSnapshot {
                id: entity.to_bits(),
                faction: arrow.faction.name().to_string(),
                x: arrow.position.x,
                y: arrow.position.y,
                z: arrow.position.z,
                active: arrow.active,
                dying,
            });
        }

        formations.sort_by_key(|f| f.id);
        units.sort_by_key(|u| u.id);
        arrows.sort_by_key(|a| a.id);

        Self {
            tick,
            time,
            formations,
            units,
            arrows,
            ..Default::default()
        }
    }

    /// Alive units of one faction.
    pub fn alive_units(&self, faction: &str) -> usize {
        self.units
            .iter()
            .filter(|u| u.faction == faction && !u.dying && u.health.is_some())
            .count()
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
