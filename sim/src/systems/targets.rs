//! Per-unit destinations from formation layout.
//!
//! A unit whose index lies inside its formation's materialized prefix walks
//! to its slot in the block; anything else holds where it stands. While a
//! formation is still materializing, its units move faster to catch up.
//!
//! ## Data Access
//! - Reads: formations, formation_indices, transforms
//! - Writes: destinations, bitmasks

use std::sync::Arc;

use rayon::prelude::*;

use crate::components::*;
use crate::config::SimConfig;
use crate::frame::FrameBuffers;
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::systems::formation::offset_from_center;

/// Whether the unit has room to take its slot.
#[inline]
pub fn can_move(index: FormationIndex, formation: &FormationData) -> bool {
    index.0 < formation.spawned_count
}

pub fn formation_speed(formation: &FormationData, config: &SimConfig) -> f32 {
    if formation.spawned_count == formation.unit_count {
        config.minion_speed
    } else {
        config.minion_speed * config.catch_up_multiplier
    }
}

/// Destination of one unit. `None` means hold position.
pub fn slot_destination(
    index: FormationIndex,
    formation: &FormationData,
    config: &SimConfig,
) -> Option<Destination> {
    if !formation.is_active() || !can_move(index, formation) {
        return None;
    }
    let offset = offset_from_center(index.0, formation.width, formation.forward, config.unit_spacing);
    Some(Destination {
        target: formation.position + offset,
        speed: formation_speed(formation, config),
    })
}

pub fn schedule_destinations(
    graph: &JobGraph,
    frame: &FrameBuffers,
    config: &Arc<SimConfig>,
    dependency: &Fence,
) -> Fence {
    let formations = frame.formations.clone();
    let indices = frame.formation_indices.clone();
    let transforms = frame.transforms.clone();
    let destinations = frame.destinations.clone();
    let bitmasks = frame.bitmasks.clone();
    let index = Arc::clone(&frame.index);
    let config = Arc::clone(config);

    let desc = JobDesc::new("unit_destinations")
        .reads([formations.id(), indices.id(), transforms.id()])
        .writes([destinations.id(), bitmasks.id()]);

    graph.schedule_for(desc, frame.unit_count(), dependency, move || {
        let formations = formations.read()?;
        let indices = indices.read()?;
        let transforms = transforms.read()?;
        let mut destinations = destinations.write()?;
        let mut bitmasks = bitmasks.write()?;

        destinations
            .par_iter_mut()
            .zip(bitmasks.par_iter_mut())
            .enumerate()
            .with_min_len(config.small_batch)
            .for_each(|(unit, (destination, bits))| {
                let slot = index.unit_formation[unit]
                    .and_then(|f| slot_destination(indices[unit], &formations[f], &config));
                match slot {
                    Some(dest) => {
                        *destination = dest;
                        bits.spawned = true;
                    }
                    None => {
                        destination.target = transforms[unit].position;
                    }
                }
            });
        Ok(())
    })
}
