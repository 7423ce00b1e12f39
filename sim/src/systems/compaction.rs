//! Formation member compaction.
//!
//! Rebuilds each formation's member buffer from the units alive this frame,
//! then closes holes by pulling later members forward. Afterwards the first
//! `n` slots hold the `n` live members with no gaps. Moved units get their
//! stored formation index rewritten.
//!
//! The whole fixed-capacity buffer is compacted. Member counts shrink as units
//! die while survivors keep their old indices until this pass runs.
//!
//! ## Data Access
//! - Writes: members, formation_indices

use std::sync::Arc;

use bevy_ecs::entity::Entity;
use rayon::prelude::*;

use crate::components::*;
use crate::frame::FrameBuffers;
use crate::jobs::{Fence, JobDesc, JobGraph};

/// A live member as seen by compaction: handle, unit slot, stored index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveMember {
    pub entity: Entity,
    pub unit: usize,
    pub index: u32,
}

/// Compact one formation's buffer over its first `len` slots.
///
/// Returns `(unit slot, new index)` for every member that changed slot.
/// A member whose stored index is out of range or already taken is dropped
/// from the buffer (and trips an assertion in debug builds).
pub fn compact_members(members: &mut FormationMembers, len: usize, live: &[LiveMember]) -> Vec<(usize, u32)> {
    let len = len.min(members.capacity());
    members.slots.fill(NULL_HANDLE);
    let mut owners = vec![usize::MAX; len];

    for member in live {
        let index = member.index as usize;
        debug_assert!(
            index < len,
            "formation index {index} out of range for {len} slots"
        );
        if index >= len || members.slots[index] != NULL_HANDLE {
            continue;
        }
        members.slots[index] = member.entity;
        owners[index] = member.unit;
    }

    let mut moved = Vec::new();
    let mut next = 0;
    for hole in 0..len {
        if members.slots[hole] != NULL_HANDLE {
            continue;
        }
        next = next.max(hole + 1);
        while next < len && members.slots[next] == NULL_HANDLE {
            next += 1;
        }
        if next == len {
            break;
        }
        members.slots.swap(hole, next);
        owners.swap(hole, next);
        moved.push((owners[hole], hole as u32));
    }
    moved
}

pub fn schedule_compaction(graph: &JobGraph, frame: &FrameBuffers, dependency: &Fence) -> Fence {
    let members = frame.members.clone();
    let indices = frame.formation_indices.clone();
    let index = Arc::clone(&frame.index);

    let desc = JobDesc::new("formation_compaction").writes([members.id(), indices.id()]);

    graph.schedule_for(desc, frame.formation_count(), dependency, move || {
        let mut members = members.write()?;
        let mut indices = indices.write()?;

        let moves: Vec<(usize, u32)> = {
            let indices = &*indices;
            members
                .par_iter_mut()
                .enumerate()
                .flat_map_iter(|(f, buffer)| {
                    let live: Vec<LiveMember> = index.formation_units[f]
                        .iter()
                        .map(|&unit| LiveMember {
                            entity: index.units[unit],
                            unit,
                            index: indices[unit].0,
                        })
                        .collect();
                    let len = buffer.capacity();
                    compact_members(buffer, len, &live)
                })
                .collect()
        };

        for (unit, slot) in moves {
            indices[unit] = FormationIndex(slot);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(indices: &[u32]) -> Vec<LiveMember> {
        indices
            .iter()
            .enumerate()
            .map(|(unit, &index)| LiveMember {
                entity: Entity::from_raw(unit as u32 + 1),
                unit,
                index,
            })
            .collect()
    }

    #[test]
    fn test_compaction_leaves_no_holes() {
        let mut members = FormationMembers::with_capacity(10);
        let units = live(&[7, 2, 9, 4]);
        let moved = compact_members(&mut members, 10, &units);

        assert_eq!(members.occupied(), 4);
        for slot in 0..4 {
            assert_ne!(members.slots[slot], NULL_HANDLE, "hole at {slot}");
        }
        for slot in 4..10 {
            assert_eq!(members.slots[slot], NULL_HANDLE);
        }

        // Every moved unit now sits where its new index says.
        let mut final_index: Vec<u32> = units.iter().map(|u| u.index).collect();
        for (unit, slot) in moved {
            final_index[unit] = slot;
        }
        for (unit, member) in units.iter().enumerate() {
            assert_eq!(members.slots[final_index[unit] as usize], member.entity);
        }
    }

    #[test]
    fn test_packed_input_is_untouched() {
        let mut members = FormationMembers::with_capacity(5);
        let moved = compact_members(&mut members, 5, &live(&[0, 1, 2]));
        assert!(moved.is_empty());
        assert_eq!(members.occupied(), 3);
    }

    #[test]
    fn test_empty_formation() {
        let mut members = FormationMembers::with_capacity(4);
        members.slots[2] = Entity::from_raw(3);
        let moved = compact_members(&mut members, 4, &[]);
        assert!(moved.is_empty());
        assert_eq!(members.occupied(), 0);
    }

    #[test]
    fn test_len_bounds_the_buffer() {
        let mut members = FormationMembers::with_capacity(8);
        let moved = compact_members(&mut members, 3, &live(&[2]));
        assert_eq!(moved, vec![(0, 0)]);
        assert_eq!(members.slots[0], Entity::from_raw(1));
    }
}
