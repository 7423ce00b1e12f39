//! Formation and projectile spawning.
//!
//! A formation is created whole, with a member buffer sized for its full
//! unit count, but its units appear over several frames. Each unit takes the
//! first free member slot as its formation index and starts at that slot's
//! offset from the formation centre.

use bevy_ecs::prelude::*;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::components::*;
use crate::config::SimConfig;
use crate::error::SpawnError;
use crate::lifecycle::ArrowSpawn;
use crate::systems::formation::offset_from_center;
use crate::terrain::GroundQuery;

/// Description of a formation to spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationSpec {
    pub faction: Faction,
    pub kind: UnitKind,
    pub position: Vec3,
    pub forward: Vec3,
    pub unit_count: u32,
    #[serde(default)]
    pub waypoints: Vec<Vec3>,
    #[serde(default = "default_true")]
    pub enable_aggro: bool,
}

fn default_true() -> bool {
    true
}

impl FormationSpec {
    pub fn new(faction: Faction, kind: UnitKind, position: Vec3, unit_count: u32) -> Self {
        let forward = match faction {
            Faction::Blue => Vec3::Z,
            Faction::Red => Vec3::NEG_Z,
        };
        Self {
            faction,
            kind,
            position,
            forward,
            unit_count,
            waypoints: Vec::new(),
            enable_aggro: true,
        }
    }

    pub fn with_waypoints(mut self, waypoints: &[Vec3]) -> Self {
        self.waypoints = waypoints.to_vec();
        self
    }
}

/// Create a formation entity. Its units are materialized later by
/// [`materialize_units`].
pub fn spawn_formation(world: &mut World, spec: &FormationSpec, config: &SimConfig) -> Result<Entity, SpawnError> {
    if spec.unit_count == 0 {
        return Err(SpawnError::EmptyFormation);
    }
    let path = HighLevelPath::from_waypoints(&spec.waypoints)?;

    let forward = spec.forward.try_normalize().unwrap_or(Vec3::Z);
    let mut data = FormationData::new(spec.faction, spec.position, forward, spec.unit_count);
    data.enable_aggro = spec.enable_aggro;
    data.enable_high_level_path = !path.is_empty();

    let entity = world
        .spawn((
            FormationBundle {
                data,
                navigation: FormationNavigation::default(),
                agent: CrowdAgent {
                    position: spec.position,
                    speed: config.formation_speed,
                },
                navigator: CrowdNavigator {
                    requested_destination: spec.position,
                    steering_target: spec.position,
                    ..Default::default()
                },
                closest: ClosestFormation::default(),
                path,
                members: FormationMembers::with_capacity(spec.unit_count as usize),
                integrity: FormationIntegrity::default(),
            },
            PendingSpawn {
                remaining: spec.unit_count,
                kind: spec.kind,
            },
        ))
        .id();

    tracing::info!(
        ?entity,
        faction = spec.faction.name(),
        units = spec.unit_count,
        "formation spawned"
    );
    Ok(entity)
}

/// Materialize pending units, at most `units_per_frame` in total.
/// Returns how many were created.
pub fn materialize_units(world: &mut World, ground: &dyn GroundQuery, config: &SimConfig) -> u32 {
    let mut pending_query = world.query::<(Entity, &PendingSpawn)>();
    let pending: Vec<(Entity, PendingSpawn)> = pending_query.iter(world).map(|(e, p)| (e, *p)).collect();

    let mut budget = config.units_per_frame;
    let mut created = 0;
    for (formation, mut spawn) in pending {
        if budget == 0 {
            break;
        }
        let (Some(mut data), Some(mut members)) = (
            world.get::<FormationData>(formation).copied(),
            world.get::<FormationMembers>(formation).cloned(),
        ) else {
            continue;
        };

        while spawn.remaining > 0 && budget > 0 && data.is_active() && data.spawned_count < data.unit_count {
            let Some(slot) = members.first_free() else {
                break;
            };
            let offset = offset_from_center(slot as u32, data.width, data.forward, config.unit_spacing);
            let mut position = data.position + offset;
            position.y = ground.ground_height(position);

            let unit = world
                .spawn(UnitBundle {
                    transform: UnitTransform::new(position, data.forward, formation),
                    rigidbody: Rigidbody::default(),
                    bitmask: UnitBitmask::new(data.faction),
                    combat: CombatState::new(config.unit_health),
                    target: AttackTarget::default(),
                    animator: Animator::default(),
                    index: FormationIndex(slot as u32),
                    destination: Destination {
                        target: position,
                        speed: 0.0,
                    },
                    kind: spawn.kind,
                    alive: AliveMinion,
                })
                .id();
            members.slots[slot] = unit;
            data.spawned_count += 1;
            spawn.remaining -= 1;
            budget -= 1;
            created += 1;
        }

        let done = spawn.remaining == 0 || !data.is_active() || data.spawned_count >= data.unit_count;
        let mut entity = world.entity_mut(formation);
        entity.insert((data, members));
        if done {
            entity.remove::<PendingSpawn>();
        } else {
            entity.insert(spawn);
        }
    }

    if created > 0 {
        tracing::debug!(created, "units materialized");
    }
    created
}

pub fn spawn_arrow(world: &mut World, spawn: &ArrowSpawn) -> Entity {
    world
        .spawn(Arrow {
            position: spawn.position,
            velocity: spawn.velocity,
            active: true,
            faction: spawn.faction,
        })
        .id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::TerrainGrid;

    fn config(units_per_frame: u32) -> SimConfig {
        SimConfig {
            units_per_frame,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_formation_rejected() {
        let mut world = World::new();
        let spec = FormationSpec::new(Faction::Blue, UnitKind::Melee, Vec3::ZERO, 0);
        assert_eq!(
            spawn_formation(&mut world, &spec, &SimConfig::default()),
            Err(SpawnError::EmptyFormation)
        );
    }

    #[test]
    fn test_units_materialize_over_frames() {
        let mut world = World::new();
        let ground = TerrainGrid::flat(64, 64, 2.0);
        let config = config(4);
        let spec = FormationSpec::new(Faction::Red, UnitKind::Melee, Vec3::new(5.0, 0.0, 5.0), 10);
        let formation = spawn_formation(&mut world, &spec, &config).unwrap();

        assert_eq!(materialize_units(&mut world, &ground, &config), 4);
        assert_eq!(world.get::<FormationData>(formation).unwrap().spawned_count, 4);
        assert_eq!(materialize_units(&mut world, &ground, &config), 4);
        assert_eq!(materialize_units(&mut world, &ground, &config), 2);
        assert_eq!(materialize_units(&mut world, &ground, &config), 0);

        assert!(world.get::<PendingSpawn>(formation).is_none());
        let members = world.get::<FormationMembers>(formation).unwrap().clone();
        assert_eq!(members.occupied(), 10);

        let mut query = world.query::<(Entity, &FormationIndex)>();
        for (unit, index) in query.iter(&world) {
            assert_eq!(members.slots[index.0 as usize], unit);
        }
    }

    #[test]
    fn test_new_unit_takes_first_free_slot() {
        let mut world = World::new();
        let ground = TerrainGrid::flat(64, 64, 2.0);
        let config = config(1);
        let spec = FormationSpec::new(Faction::Blue, UnitKind::Ranged, Vec3::ZERO, 3);
        let formation = spawn_formation(&mut world, &spec, &config).unwrap();
        materialize_units(&mut world, &ground, &config);

        // Move the first unit to the back, leaving slot 0 free.
        let first = {
            let mut members = world.get_mut::<FormationMembers>(formation).unwrap();
            members.slots.swap(0, 2);
            members.slots[2]
        };

        materialize_units(&mut world, &ground, &config);
        let second = world.get::<FormationMembers>(formation).unwrap().slots[0];
        assert_ne!(second, NULL_HANDLE);
        assert_ne!(second, first);
        assert_eq!(world.get::<FormationIndex>(second), Some(&FormationIndex(0)));
    }

    #[test]
    fn test_path_capacity_enforced() {
        let mut world = World::new();
        let spec = FormationSpec::new(Faction::Blue, UnitKind::Melee, Vec3::ZERO, 5)
            .with_waypoints(&[Vec3::X; HIGH_LEVEL_PATH_CAPACITY + 1]);
        assert!(matches!(
            spawn_formation(&mut world, &spec, &SimConfig::default()),
            Err(SpawnError::PathTooLong { .. })
        ));
    }
}
