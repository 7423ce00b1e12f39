//! ECS components for the battle simulation.
//!
//! Components are pure data containers attached to entities. Per-frame logic
//! lives in `systems`, which operate on flat copies of these components (see
//! `frame`), never on the `World` directly.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::SpawnError;

/// Reserved handle marking an empty formation slot or "no target".
pub const NULL_HANDLE: Entity = Entity::PLACEHOLDER;

// ============================================================================
// UNIT COMPONENTS
// ============================================================================

/// World transform of a unit.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct UnitTransform {
    pub position: Vec3,
    pub forward: Vec3,
    /// Owning formation.
    pub formation: Entity,
    pub scale: f32,
}

impl UnitTransform {
    pub fn new(position: Vec3, forward: Vec3, formation: Entity) -> Self {
        Self {
            position,
            forward,
            formation,
            scale: 1.0,
        }
    }
}

#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rigidbody {
    pub velocity: Vec3,
}

/// Faction/side identifier.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    Blue,
    Red,
}

impl Faction {
    pub fn opponent(self) -> Self {
        match self {
            Faction::Blue => Faction::Red,
            Faction::Red => Faction::Blue,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Faction::Blue => "Blue",
            Faction::Red => "Red",
        }
    }
}

/// Combat flags read by spatial and targeting stages.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitBitmask {
    pub faction: Faction,
    pub alive: bool,
    /// Set once the unit has a slot it may move to.
    pub spawned: bool,
}

impl UnitBitmask {
    pub fn new(faction: Faction) -> Self {
        Self {
            faction,
            alive: true,
            spawned: false,
        }
    }
}

/// Health and melee attack cycle.
///
/// `attack_cycle` is the time into the current swing, or `IDLE_CYCLE`
/// when no swing is running.
#[derive(Component, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombatState {
    pub health: f32,
    pub attack_cycle: f32,
}

impl CombatState {
    pub const IDLE_CYCLE: f32 = -1.0;

    pub fn new(health: f32) -> Self {
        Self {
            health,
            attack_cycle: Self::IDLE_CYCLE,
        }
    }

    pub fn is_attacking(&self) -> bool {
        self.attack_cycle >= 0.0
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

/// Current melee target, or `NULL_HANDLE`.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackTarget {
    pub entity: Entity,
}

impl Default for AttackTarget {
    fn default() -> Self {
        Self { entity: NULL_HANDLE }
    }
}

impl AttackTarget {
    pub fn has_target(&self) -> bool {
        self.entity != NULL_HANDLE
    }
}

/// Baked animation clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnimationClip {
    #[default]
    Idle,
    Run,
    Attack,
    Falling,
    Death,
}

impl AnimationClip {
    /// Clip length in seconds.
    pub fn length(self) -> f32 {
        match self {
            AnimationClip::Idle => 2.0,
            AnimationClip::Run => 0.8,
            AnimationClip::Attack => 1.0,
            AnimationClip::Falling => 0.6,
            AnimationClip::Death => 1.2,
        }
    }

    pub fn loops(self) -> bool {
        !matches!(self, AnimationClip::Death)
    }
}

#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Animator {
    pub current: AnimationClip,
    pub requested: AnimationClip,
    /// Playback position in [0, 1].
    pub normalized_time: f32,
}

/// Ordinal slot of a unit inside its formation's member buffer.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormationIndex(pub u32);

/// Where the unit wants to be this tick, and how fast it may get there.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub target: Vec3,
    pub speed: f32,
}

#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Melee,
    Ranged,
}

/// Marker: unit participates in ground combat this frame.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct AliveMinion;

/// Marker: unit was launched and is in free fall.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Flying;

/// Marker: unit was thrown by an explosion but the per-frame conversion cap
/// held it back. It sits out ground combat, keeping its launch velocity,
/// until it becomes `Flying`.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Launched;

/// Timed removal for dead units and spent projectiles.
#[derive(Component, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dying {
    /// Simulation time after which the entity is destroyed.
    pub expire_at: f32,
    /// Height when death began; dead units sink below it.
    pub start_y: f32,
}

// ============================================================================
// PROJECTILE COMPONENTS
// ============================================================================

#[derive(Component, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arrow {
    pub position: Vec3,
    pub velocity: Vec3,
    pub active: bool,
    pub faction: Faction,
}

// ============================================================================
// FORMATION COMPONENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormationState {
    Active,
    /// Terminal. The formation no longer moves or targets.
    AllDead,
}

/// Aggregate state of a formation.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct FormationData {
    pub position: Vec3,
    pub forward: Vec3,
    /// Where the formation is heading this tick.
    pub target: Vec3,
    /// Columns in the block layout.
    pub width: u32,
    /// Members still alive.
    pub unit_count: u32,
    /// Members currently materialized. Never exceeds `unit_count`.
    pub spawned_count: u32,
    pub faction: Faction,
    pub state: FormationState,
    pub enable_aggro: bool,
    pub enable_high_level_path: bool,
}

impl FormationData {
    pub fn new(faction: Faction, position: Vec3, forward: Vec3, unit_count: u32) -> Self {
        Self {
            position,
            forward,
            target: position,
            width: Self::width_for(unit_count),
            unit_count,
            spawned_count: 0,
            faction,
            state: FormationState::Active,
            enable_aggro: true,
            enable_high_level_path: false,
        }
    }

    /// Layout width for a member count: ceil(sqrt(n / 2) * 2).
    pub fn width_for(unit_count: u32) -> u32 {
        ((unit_count as f32 / 2.0).sqrt() * 2.0).ceil() as u32
    }

    pub fn is_active(&self) -> bool {
        self.state == FormationState::Active
    }

    /// Record one member death. Returns true when this was the last one.
    pub fn remove_member(&mut self) -> bool {
        self.unit_count = self.unit_count.saturating_sub(1);
        self.spawned_count = self.spawned_count.saturating_sub(1).min(self.unit_count);
        self.width = Self::width_for(self.unit_count);
        if self.unit_count == 0 && self.state == FormationState::Active {
            self.state = FormationState::AllDead;
            return true;
        }
        false
    }
}

/// Corner tracking used to blend the formation's side offset around turns.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FormationNavigation {
    /// Steering target the corner distance was measured against.
    pub target_position: Vec3,
    pub initial_corner_distance: f32,
    pub prev_formation_side: f32,
    pub formation_side: f32,
}

/// Agent owned by the external crowd system.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CrowdAgent {
    pub position: Vec3,
    pub speed: f32,
}

/// Path request state of a crowd agent.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CrowdNavigator {
    pub active: bool,
    pub requested_destination: Vec3,
    /// Next corner of the current path.
    pub steering_target: Vec3,
    /// Side (-1..1) the path turns at the next corner.
    pub next_corner_side: f32,
    /// Path requests issued so far.
    pub requests: u32,
}

impl CrowdNavigator {
    pub fn move_to(&mut self, destination: Vec3) {
        self.active = true;
        self.requested_destination = destination;
        self.requests += 1;
    }
}

/// Nearest opposing active formation, or `NULL_HANDLE`.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct ClosestFormation {
    pub entity: Entity,
    pub position: Vec3,
}

impl Default for ClosestFormation {
    fn default() -> Self {
        Self {
            entity: NULL_HANDLE,
            position: Vec3::ZERO,
        }
    }
}

impl ClosestFormation {
    pub fn exists(&self) -> bool {
        self.entity != NULL_HANDLE
    }
}

/// Fixed capacity of a high-level path.
pub const HIGH_LEVEL_PATH_CAPACITY: usize = 4;

/// Short list of strategic waypoints a formation walks through.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HighLevelPath {
    waypoints: [Vec3; HIGH_LEVEL_PATH_CAPACITY],
    len: usize,
    /// Waypoint currently targeted.
    pub index: usize,
}

impl HighLevelPath {
    pub fn from_waypoints(points: &[Vec3]) -> Result<Self, SpawnError> {
        let mut path = Self::default();
        for &point in points {
            path.push(point)?;
        }
        Ok(path)
    }

    pub fn push(&mut self, point: Vec3) -> Result<(), SpawnError> {
        if self.len == HIGH_LEVEL_PATH_CAPACITY {
            return Err(SpawnError::PathTooLong {
                len: self.len + 1,
                capacity: HIGH_LEVEL_PATH_CAPACITY,
            });
        }
        self.waypoints[self.len] = point;
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Waypoint at `index`, holding on the last one past the end.
    pub fn waypoint(&self, index: usize) -> Option<Vec3> {
        if self.len == 0 {
            return None;
        }
        Some(self.waypoints[index.min(self.len - 1)])
    }
}

/// Member handles of a formation. Fixed capacity, holes marked `NULL_HANDLE`.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct FormationMembers {
    pub slots: Vec<Entity>,
}

impl FormationMembers {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![NULL_HANDLE; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|&&e| e != NULL_HANDLE).count()
    }

    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|&e| e == NULL_HANDLE)
    }

    /// Clear the slot holding `entity`, if it is where the index says.
    pub fn release(&mut self, index: usize, entity: Entity) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if *slot == entity => {
                *slot = NULL_HANDLE;
                true
            }
            _ => false,
        }
    }
}

/// How well the formation is holding together.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationIntegrity {
    pub units_attacking: u32,
    /// Members within the far band of their slot.
    pub unit_count: u32,
    /// Members within the far band but not yet within the close band.
    pub units_close: u32,
    pub units_far: u32,
}

/// Units still waiting to be materialized for a formation.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSpawn {
    pub remaining: u32,
    pub kind: UnitKind,
}

// ============================================================================
// BUNDLES
// ============================================================================

/// Bundle for spawning a ground unit.
#[derive(Bundle)]
pub struct UnitBundle {
    pub transform: UnitTransform,
    pub rigidbody: Rigidbody,
    pub bitmask: UnitBitmask,
    pub combat: CombatState,
    pub target: AttackTarget,
    pub animator: Animator,
    pub index: FormationIndex,
    pub destination: Destination,
    pub kind: UnitKind,
    pub alive: AliveMinion,
}

/// Bundle for spawning a formation.
#[derive(Bundle)]
pub struct FormationBundle {
    pub data: FormationData,
    pub navigation: FormationNavigation,
    pub agent: CrowdAgent,
    pub navigator: CrowdNavigator,
    pub closest: ClosestFormation,
    pub path: HighLevelPath,
    pub members: FormationMembers,
    pub integrity: FormationIntegrity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_formula() {
        assert_eq!(FormationData::width_for(0), 0);
        assert_eq!(FormationData::width_for(1), 2);
        assert_eq!(FormationData::width_for(8), 4);
        assert_eq!(FormationData::width_for(50), 10);
    }

    #[test]
    fn test_remove_last_member_marks_all_dead() {
        let mut data = FormationData::new(Faction::Blue, Vec3::ZERO, Vec3::Z, 1);
        data.spawned_count = 1;
        assert!(data.remove_member());
        assert_eq!(data.unit_count, 0);
        assert_eq!(data.spawned_count, 0);
        assert_eq!(data.state, FormationState::AllDead);
        assert!(!data.remove_member());
    }

    #[test]
    fn test_spawned_never_exceeds_units() {
        let mut data = FormationData::new(Faction::Red, Vec3::ZERO, Vec3::Z, 10);
        data.spawned_count = 10;
        for _ in 0..4 {
            data.remove_member();
            assert!(data.spawned_count <= data.unit_count);
        }
        assert_eq!(data.unit_count, 6);
    }

    #[test]
    fn test_path_capacity_checked() {
        let points = [Vec3::X; HIGH_LEVEL_PATH_CAPACITY + 1];
        assert_eq!(
            HighLevelPath::from_waypoints(&points),
            Err(SpawnError::PathTooLong {
                len: HIGH_LEVEL_PATH_CAPACITY + 1,
                capacity: HIGH_LEVEL_PATH_CAPACITY
            })
        );
        let path = HighLevelPath::from_waypoints(&[Vec3::X, Vec3::Z]).unwrap();
        assert_eq!(path.waypoint(5), Some(Vec3::Z));
        assert_eq!(HighLevelPath::default().waypoint(0), None);
    }

    #[test]
    fn test_member_release_checks_owner() {
        let mut members = FormationMembers::with_capacity(3);
        let a = Entity::from_raw(1);
        members.slots[1] = a;
        assert!(!members.release(1, Entity::from_raw(2)));
        assert!(members.release(1, a));
        assert_eq!(members.first_free(), Some(0));
        assert_eq!(members.occupied(), 0);
    }
}
