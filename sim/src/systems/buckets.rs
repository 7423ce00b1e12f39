//! Spatial hash rebuild.
//!
//! ## Data Access
//! - Reads: transforms, bitmasks
//! - Writes: spatial hash
//!
//! First stage of every frame. Everything that looks up neighbours depends
//! on its fence.

use crate::frame::FrameBuffers;
use crate::jobs::{Fence, JobDesc, JobGraph};
use crate::spatial::SpatialEntry;

pub fn schedule_rebuild(graph: &JobGraph, frame: &FrameBuffers, dependency: &Fence) -> Fence {
    let transforms = frame.transforms.clone();
    let bitmasks = frame.bitmasks.clone();
    let spatial = frame.spatial.clone();

    let desc = JobDesc::new("rebuild_spatial_hash")
        .reads([transforms.id(), bitmasks.id()])
        .writes([spatial.id()]);

    graph.schedule_for(desc, frame.unit_count(), dependency, move || {
        let transforms = transforms.read()?;
        let bitmasks = bitmasks.read()?;
        let mut hash = spatial.write()?;

        let entries = transforms
            .iter()
            .zip(bitmasks.iter())
            .enumerate()
            .filter(|(_, (_, bits))| bits.alive)
            .map(|(index, (transform, bits))| SpatialEntry {
                index: index as u32,
                position: transform.position,
                faction: bits.faction,
            });
        hash.rebuild(entries, transforms.len());
        Ok(())
    })
}
