//! Attack command queue.
//!
//! Melee swings and arrow hits never touch the victim's health directly.
//! They push an `AttackCommand` from whichever worker produced it; one serial
//! job drains the queue once those producers' fences have completed.
//!
//! ## Data Access
//! - Writes: combat

use std::sync::Arc;

use bevy_ecs::entity::Entity;
use crossbeam_queue::SegQueue;

use crate::frame::FrameBuffers;
use crate::jobs::{Fence, JobDesc, JobGraph};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackCommand {
    pub attacker: Entity,
    pub target: Entity,
    pub damage: f32,
}

/// Multi-producer queue of attack commands. Cloning shares the queue.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<SegQueue<AttackCommand>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: AttackCommand) {
        self.inner.push(command);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn pop(&self) -> Option<AttackCommand> {
        self.inner.pop()
    }
}

/// Apply every queued command. Commands against handles with no slot this
/// frame are dropped. Returns how many landed.
pub fn apply_commands<F>(queue: &CommandQueue, mut apply: F) -> usize
where
    F: FnMut(&AttackCommand) -> bool,
{
    let mut landed = 0;
    while let Some(command) = queue.pop() {
        if apply(&command) {
            landed += 1;
        }
    }
    landed
}

pub fn schedule_commands(
    graph: &JobGraph,
    frame: &FrameBuffers,
    queue: &CommandQueue,
    dependency: &Fence,
) -> Fence {
    let combat = frame.combat.clone();
    let index = Arc::clone(&frame.index);
    let queue = queue.clone();

    let desc = JobDesc::new("apply_attack_commands").writes([combat.id()]);

    graph.schedule(desc, dependency, move || {
        let mut combat = combat.write()?;
        let landed = apply_commands(&queue, |command| {
            let Some(&slot) = index.unit_slot.get(&command.target) else {
                return false;
            };
            combat[slot].health -= command.damage;
            true
        });
        if landed > 0 {
            tracing::trace!(landed, "attack commands applied");
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_target_is_noop() {
        let queue = CommandQueue::new();
        let known = Entity::from_raw(1);
        let gone = Entity::from_raw(2);
        for target in [known, gone, known] {
            queue.push(AttackCommand {
                attacker: Entity::from_raw(9),
                target,
                damage: 10.0,
            });
        }

        let mut health: HashMap<Entity, f32> = HashMap::from([(known, 100.0)]);
        let landed = apply_commands(&queue, |command| match health.get_mut(&command.target) {
            Some(hp) => {
                *hp -= command.damage;
                true
            }
            None => false,
        });

        assert_eq!(landed, 2);
        assert_eq!(health[&known], 80.0);
        assert!(queue.is_empty());
    }
}
