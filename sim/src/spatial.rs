//! Spatial hash over the alive unit population.
//!
//! Rebuilt from scratch once per frame. Each cell is a singly linked list
//! threaded through a flat entry array, so insertion is O(1) and a cell query
//! costs O(candidates-in-cell) rather than O(n).
//!
//! ## Hashing
//!
//! `key = floor(x/step) + W/2 + (floor(z/step) + H/2) * W` over a logical
//! field of `W x H` cells. Positions outside the field are not clamped: their
//! keys wrap and may alias cells on the far edge, so callers always re-check
//! distances on the candidates they get back.

use std::collections::HashMap;

use glam::Vec3;

use crate::components::Faction;
use crate::config::SimConfig;

const END: u32 = u32::MAX;

/// Entry in a spatial cell. Carries the position and faction the unit had at
/// rebuild time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialEntry {
    /// Slot of the unit in this frame's unit buffers.
    pub index: u32,
    pub position: Vec3,
    pub faction: Faction,
}

#[derive(Debug, Clone)]
pub struct SpatialHash {
    step: f32,
    width: i32,
    height: i32,
    /// Most recently inserted entry per cell key.
    heads: HashMap<i32, u32>,
    entries: Vec<SpatialEntry>,
    next: Vec<u32>,
}

impl SpatialHash {
    pub fn new(step: f32, width: i32, height: i32) -> Self {
        Self {
            step,
            width,
            height,
            heads: HashMap::new(),
            entries: Vec::new(),
            next: Vec::new(),
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.grid_step, config.grid_width, config.grid_height)
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    /// Quantized grid coordinates of a position.
    #[inline]
    pub fn cell_coords(&self, position: Vec3) -> (i32, i32) {
        (
            (position.x / self.step).floor() as i32,
            (position.z / self.step).floor() as i32,
        )
    }

    #[inline]
    pub fn cell_key(&self, qx: i32, qz: i32) -> i32 {
        qx.wrapping_add(self.width / 2)
            .wrapping_add(qz.wrapping_add(self.height / 2).wrapping_mul(self.width))
    }

    #[inline]
    pub fn hash(&self, position: Vec3) -> i32 {
        let (qx, qz) = self.cell_coords(position);
        self.cell_key(qx, qz)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.heads.len()
    }

    /// Drop all entries, keeping allocated storage.
    pub fn clear(&mut self) {
        self.heads.clear();
        self.entries.clear();
        self.next.clear();
    }

    /// Grow storage to hold at least `count` entries. Never shrinks.
    pub fn try_reserve(&mut self, count: usize) -> Result<(), std::collections::TryReserveError> {
        let additional = count.saturating_sub(self.entries.len());
        self.entries.try_reserve(additional)?;
        self.next.try_reserve(additional)?;
        self.heads.try_reserve(additional)?;
        Ok(())
    }

    pub fn insert(&mut self, entry: SpatialEntry) {
        let key = self.hash(entry.position);
        let slot = self.entries.len() as u32;
        self.entries.push(entry);
        let previous = self.heads.insert(key, slot).unwrap_or(END);
        self.next.push(previous);
    }

    /// Clear and reinsert. `count` is the expected number of entries and is
    /// used to size storage up front.
    pub fn rebuild<I>(&mut self, entries: I, count: usize)
    where
        I: IntoIterator<Item = SpatialEntry>,
    {
        self.clear();
        if self.entries.capacity() < count {
            tracing::warn!(
                from = self.entries.capacity(),
                to = count,
                "growing spatial hash"
            );
            self.entries.reserve(count);
            self.next.reserve(count);
        }
        for entry in entries {
            self.insert(entry);
        }
    }

    /// Units in the cell containing `position`, most recently inserted first.
    pub fn query_cell(&self, position: Vec3) -> CellIter<'_> {
        self.query_key(self.hash(position))
    }

    pub fn query_key(&self, key: i32) -> CellIter<'_> {
        CellIter {
            hash: self,
            cursor: self.heads.get(&key).copied().unwrap_or(END),
        }
    }

    /// Units within `radius` of `center` (horizontal distance), sweeping every
    /// cell the radius touches.
    pub fn query_radius(&self, center: Vec3, radius: f32) -> Vec<SpatialEntry> {
        let radius_sq = radius * radius;
        let (cx, cz) = self.cell_coords(center);
        let reach = (radius / self.step).ceil() as i32;

        let mut results = Vec::new();
        for dz in -reach..=reach {
            for dx in -reach..=reach {
                let key = self.cell_key(cx.wrapping_add(dx), cz.wrapping_add(dz));
                for entry in self.query_key(key) {
                    let offset = entry.position - center;
                    if offset.x * offset.x + offset.z * offset.z <= radius_sq {
                        results.push(*entry);
                    }
                }
            }
        }
        results
    }
}

/// First/next iteration over one cell.
pub struct CellIter<'a> {
    hash: &'a SpatialHash,
    cursor: u32,
}

impl<'a> Iterator for CellIter<'a> {
    type Item = &'a SpatialEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == END {
            return None;
        }
        let slot = self.cursor as usize;
        self.cursor = self.hash.next[slot];
        self.hash.entries.get(slot)
    }
}
