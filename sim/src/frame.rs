//! Per-frame snapshot of the entity population.
//!
//! At the start of a frame, component data is copied out of the `World` into
//! flat buffers indexed by slot. Jobs work exclusively on these buffers, so
//! the `World` is never touched while jobs are in flight. Once every fence
//! has completed, the buffers are written back and the lifecycle manager
//! applies structural changes.

use std::collections::HashMap;
use std::sync::Arc;

use bevy_ecs::prelude::*;
use glam::Vec3;

use crate::components::*;
use crate::error::JobError;
use crate::jobs::Buffer;
use crate::spatial::SpatialHash;

/// Scalars every job of a frame agrees on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub dt: f32,
    /// Simulation time at the start of the frame.
    pub time: f32,
    pub tick: u64,
    /// Archers loose this frame.
    pub archer_volley: bool,
}

/// A unit in free fall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlyingBody {
    pub transform: UnitTransform,
    pub rigidbody: Rigidbody,
    pub combat: CombatState,
    pub animator: Animator,
}

/// Read-only slot layout of a frame.
#[derive(Debug, Default)]
pub struct FrameIndex {
    pub units: Vec<Entity>,
    pub unit_kinds: Vec<UnitKind>,
    /// Formation slot of each unit, if its formation exists.
    pub unit_formation: Vec<Option<usize>>,
    pub unit_slot: HashMap<Entity, usize>,
    pub formations: Vec<Entity>,
    /// Unit slots grouped by formation slot.
    pub formation_units: Vec<Vec<usize>>,
    pub arrows: Vec<Entity>,
    pub flying: Vec<Entity>,
}

/// Shared buffers of one frame. Cloning is cheap and shares the data.
#[derive(Clone)]
pub struct FrameBuffers {
    pub index: Arc<FrameIndex>,

    pub transforms: Buffer<Vec<UnitTransform>>,
    pub velocities: Buffer<Vec<Rigidbody>>,
    pub bitmasks: Buffer<Vec<UnitBitmask>>,
    pub combat: Buffer<Vec<CombatState>>,
    pub targets: Buffer<Vec<AttackTarget>>,
    pub animators: Buffer<Vec<Animator>>,
    pub formation_indices: Buffer<Vec<FormationIndex>>,
    pub destinations: Buffer<Vec<Destination>>,

    pub formations: Buffer<Vec<FormationData>>,
    pub formation_nav: Buffer<Vec<FormationNavigation>>,
    pub agents: Buffer<Vec<CrowdAgent>>,
    pub navigators: Buffer<Vec<CrowdNavigator>>,
    pub closest: Buffer<Vec<ClosestFormation>>,
    pub paths: Buffer<Vec<HighLevelPath>>,
    pub members: Buffer<Vec<FormationMembers>>,
    pub integrity: Buffer<Vec<FormationIntegrity>>,

    pub arrows: Buffer<Vec<Arrow>>,
    pub arrow_ground: Buffer<Vec<f32>>,
    pub flying: Buffer<Vec<FlyingBody>>,
    pub flying_ground: Buffer<Vec<f32>>,

    /// Persistent across frames; rebuilt by the first stage.
    pub spatial: Buffer<SpatialHash>,
}

impl FrameBuffers {
    /// Copy the simulated population out of `world`.
    pub fn extract(world: &mut World, spatial: Buffer<SpatialHash>) -> Self {
        let mut index = FrameIndex::default();

        let mut formations = Vec::new();
        let mut formation_nav = Vec::new();
        let mut agents = Vec::new();
        let mut navigators = Vec::new();
        let mut closest = Vec::new();
        let mut paths = Vec::new();
        let mut members = Vec::new();
        let mut integrity = Vec::new();

        let mut formation_query = world.query::<(
            Entity,
            &FormationData,
            &FormationNavigation,
            &CrowdAgent,
            &CrowdNavigator,
            &ClosestFormation,
            &HighLevelPath,
            &FormationMembers,
            &FormationIntegrity,
        )>();
        let mut formation_slot = HashMap::new();
        for (entity, data, nav, agent, navigator, near, path, member, integ) in
            formation_query.iter(world)
        {
            formation_slot.insert(entity, index.formations.len());
            index.formations.push(entity);
            formations.push(*data);
            formation_nav.push(*nav);
            agents.push(*agent);
            navigators.push(*navigator);
            closest.push(*near);
            paths.push(*path);
            members.push(member.clone());
            integrity.push(*integ);
        }
        index.formation_units = vec![Vec::new(); index.formations.len()];

        let mut transforms = Vec::new();
        let mut velocities = Vec::new();
        let mut bitmasks = Vec::new();
        let mut combat = Vec::new();
        let mut targets = Vec::new();
        let mut animators = Vec::new();
        let mut formation_indices = Vec::new();
        let mut destinations = Vec::new();

        let mut unit_query = world
            .query_filtered::<(
                Entity,
                &UnitTransform,
                &Rigidbody,
                &UnitBitmask,
                &CombatState,
                &AttackTarget,
                &Animator,
                &FormationIndex,
                &Destination,
                &UnitKind,
            ), (With<AliveMinion>, Without<Flying>, Without<Launched>)>();
        for (entity, transform, body, bits, state, target, animator, slot, dest, kind) in
            unit_query.iter(world)
        {
            let unit = index.units.len();
            let formation = formation_slot.get(&transform.formation).copied();
            if let Some(f) = formation {
                index.formation_units[f].push(unit);
            }
            index.units.push(entity);
            index.unit_kinds.push(*kind);
            index.unit_formation.push(formation);
            index.unit_slot.insert(entity, unit);

            transforms.push(*transform);
            velocities.push(*body);
            bitmasks.push(*bits);
            combat.push(*state);
            targets.push(*target);
            animators.push(*animator);
            formation_indices.push(*slot);
            destinations.push(*dest);
        }

        let mut arrows = Vec::new();
        let mut arrow_query = world.query_filtered::<(Entity, &Arrow), Without<Dying>>();
        for (entity, arrow) in arrow_query.iter(world) {
            index.arrows.push(entity);
            arrows.push(*arrow);
        }

        let mut flying = Vec::new();
        let mut flying_query = world.query_filtered::<(
            Entity,
            &UnitTransform,
            &Rigidbody,
            &CombatState,
            &Animator,
        ), With<Flying>>();
        for (entity, transform, body, state, animator) in flying_query.iter(world) {
            index.flying.push(entity);
            flying.push(FlyingBody {
                transform: *transform,
                rigidbody: *body,
                combat: *state,
                animator: *animator,
            });
        }

        Self {
            index: Arc::new(index),
            transforms: Buffer::new("transforms", transforms),
            velocities: Buffer::new("velocities", velocities),
            bitmasks: Buffer::new("bitmasks", bitmasks),
            combat: Buffer::new("combat", combat),
            targets: Buffer::new("targets", targets),
            animators: Buffer::new("animators", animators),
            formation_indices: Buffer::new("formation_indices", formation_indices),
            destinations: Buffer::new("destinations", destinations),
            formations: Buffer::new("formations", formations),
            formation_nav: Buffer::new("formation_nav", formation_nav),
            agents: Buffer::new("agents", agents),
            navigators: Buffer::new("navigators", navigators),
            closest: Buffer::new("closest", closest),
            paths: Buffer::new("paths", paths),
            members: Buffer::new("members", members),
            integrity: Buffer::new("integrity", integrity),
            arrows: Buffer::new("arrows", arrows),
            arrow_ground: Buffer::new("arrow_ground", Vec::new()),
            flying: Buffer::new("flying", flying),
            flying_ground: Buffer::new("flying_ground", Vec::new()),
            spatial,
        }
    }

    pub fn unit_count(&self) -> usize {
        self.index.units.len()
    }

    pub fn formation_count(&self) -> usize {
        self.index.formations.len()
    }

    pub fn arrow_count(&self) -> usize {
        self.index.arrows.len()
    }

    pub fn flying_count(&self) -> usize {
        self.index.flying.len()
    }

    /// Positions handed to the ground raycast batch.
    pub fn arrow_positions(&self) -> Result<Vec<Vec3>, JobError> {
        Ok(self.arrows.read()?.iter().map(|a| a.position).collect())
    }

    pub fn flying_positions(&self) -> Result<Vec<Vec3>, JobError> {
        Ok(self.flying.read()?.iter().map(|b| b.transform.position).collect())
    }

    /// Names of the buffers a panicking job left poisoned.
    pub fn poisoned(&self) -> Vec<&'static str> {
        let checks = [
            (self.transforms.name(), self.transforms.is_poisoned()),
            (self.velocities.name(), self.velocities.is_poisoned()),
            (self.bitmasks.name(), self.bitmasks.is_poisoned()),
            (self.combat.name(), self.combat.is_poisoned()),
            (self.targets.name(), self.targets.is_poisoned()),
            (self.animators.name(), self.animators.is_poisoned()),
            (self.formation_indices.name(), self.formation_indices.is_poisoned()),
            (self.destinations.name(), self.destinations.is_poisoned()),
            (self.formations.name(), self.formations.is_poisoned()),
            (self.formation_nav.name(), self.formation_nav.is_poisoned()),
            (self.agents.name(), self.agents.is_poisoned()),
            (self.navigators.name(), self.navigators.is_poisoned()),
            (self.closest.name(), self.closest.is_poisoned()),
            (self.paths.name(), self.paths.is_poisoned()),
            (self.members.name(), self.members.is_poisoned()),
            (self.integrity.name(), self.integrity.is_poisoned()),
            (self.arrows.name(), self.arrows.is_poisoned()),
            (self.arrow_ground.name(), self.arrow_ground.is_poisoned()),
            (self.flying.name(), self.flying.is_poisoned()),
            (self.flying_ground.name(), self.flying_ground.is_poisoned()),
        ];
        checks
            .into_iter()
            .filter_map(|(name, poisoned)| poisoned.then_some(name))
            .collect()
    }

    /// Copy buffer contents back onto their entities. Entities despawned
    /// since extraction are skipped.
    pub fn write_back(&self, world: &mut World) -> Result<(), JobError> {
        let index = &self.index;

        {
            let transforms = self.transforms.read()?;
            let velocities = self.velocities.read()?;
            let bitmasks = self.bitmasks.read()?;
            let combat = self.combat.read()?;
            let targets = self.targets.read()?;
            let animators = self.animators.read()?;
            let indices = self.formation_indices.read()?;
            let destinations = self.destinations.read()?;

            for (unit, &entity) in index.units.iter().enumerate() {
                assign(world, entity, transforms[unit]);
                assign(world, entity, velocities[unit]);
                assign(world, entity, bitmasks[unit]);
                assign(world, entity, combat[unit]);
                assign(world, entity, targets[unit]);
                assign(world, entity, animators[unit]);
                assign(world, entity, indices[unit]);
                assign(world, entity, destinations[unit]);
            }
        }

        {
            let formations = self.formations.read()?;
            let formation_nav = self.formation_nav.read()?;
            let navigators = self.navigators.read()?;
            let closest = self.closest.read()?;
            let paths = self.paths.read()?;
            let members = self.members.read()?;
            let integrity = self.integrity.read()?;

            for (f, &entity) in index.formations.iter().enumerate() {
                assign(world, entity, formations[f]);
                assign(world, entity, formation_nav[f]);
                assign(world, entity, navigators[f]);
                assign(world, entity, closest[f]);
                assign(world, entity, paths[f]);
                assign(world, entity, integrity[f]);
                if let Some(mut slots) = world.get_mut::<FormationMembers>(entity) {
                    slots.slots.clone_from(&members[f].slots);
                }
            }
        }

        {
            let arrows = self.arrows.read()?;
            for (slot, &entity) in index.arrows.iter().enumerate() {
                assign(world, entity, arrows[slot]);
            }
        }

        {
            let flying = self.flying.read()?;
            for (slot, &entity) in index.flying.iter().enumerate() {
                let body = flying[slot];
                assign(world, entity, body.transform);
                assign(world, entity, body.rigidbody);
                assign(world, entity, body.combat);
                assign(world, entity, body.animator);
            }
        }

        Ok(())
    }
}

fn assign<T: Component>(world: &mut World, entity: Entity, value: T) {
    if let Some(mut component) = world.get_mut::<T>(entity) {
        *component = value;
    }
}
