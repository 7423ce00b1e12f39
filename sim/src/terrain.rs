//! Terrain heightmap.
//!
//! Stands in for the physics world: projectiles and flying units ask it for
//! the ground height under them in one batched call per frame, and formation
//! agents are snapped onto it as their navigation surface.

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::navigation::NavSurface;

/// Ground raycasts, batched once per frame at the pipeline's rendezvous.
pub trait GroundQuery: Send + Sync {
    /// Height of the ground straight below (or above) `position`.
    fn ground_height(&self, position: Vec3) -> f32;

    /// Answer many downward raycasts at once. `out` is overwritten.
    fn raycast_batch(&self, positions: &[Vec3], out: &mut Vec<f32>) {
        out.clear();
        out.extend(positions.iter().map(|&p| self.ground_height(p)));
    }
}

/// Grid-based terrain heightmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainGrid {
    /// Width of the grid in cells.
    pub width: usize,
    /// Depth of the grid in cells.
    pub depth: usize,
    /// Size of each cell in world units.
    pub cell_size: f32,
    /// Origin offset (world position of cell 0,0).
    pub origin_x: f32,
    pub origin_z: f32,
    /// Heights (row-major order).
    pub heights: Vec<f32>,
}

impl TerrainGrid {
    /// Flat ground at height zero, centred on the origin.
    pub fn flat(width: usize, depth: usize, cell_size: f32) -> Self {
        let origin_x = -(width as f32 * cell_size) / 2.0;
        let origin_z = -(depth as f32 * cell_size) / 2.0;

        Self {
            width,
            depth,
            cell_size,
            origin_x,
            origin_z,
            heights: vec![0.0; width * depth],
        }
    }

    /// Gentle rolling hills with the given peak amplitude.
    pub fn rolling(width: usize, depth: usize, cell_size: f32, amplitude: f32) -> Self {
        let mut grid = Self::flat(width, depth, cell_size);
        for gz in 0..depth {
            for gx in 0..width {
                let (x, z) = grid.grid_to_world(gx, gz);
                let h = (x * 0.02).sin() * (z * 0.015).cos() + 0.5 * (x * 0.05 + z * 0.03).sin();
                grid.heights[gz * width + gx] = h * amplitude / 1.5;
            }
        }
        grid
    }

    fn cell_index(&self, gx: usize, gz: usize) -> Option<usize> {
        if gx < self.width && gz < self.depth {
            Some(gz * self.width + gx)
        } else {
            None
        }
    }

    /// Convert world coordinates to grid coordinates, clamped to the grid.
    pub fn world_to_grid(&self, world_x: f32, world_z: f32) -> (usize, usize) {
        let gx = ((world_x - self.origin_x) / self.cell_size).floor() as i32;
        let gz = ((world_z - self.origin_z) / self.cell_size).floor() as i32;

        let gx = gx.clamp(0, self.width as i32 - 1) as usize;
        let gz = gz.clamp(0, self.depth as i32 - 1) as usize;

        (gx, gz)
    }

    /// Convert grid coordinates to world coordinates (center of cell).
    pub fn grid_to_world(&self, gx: usize, gz: usize) -> (f32, f32) {
        let world_x = self.origin_x + (gx as f32 + 0.5) * self.cell_size;
        let world_z = self.origin_z + (gz as f32 + 0.5) * self.cell_size;
        (world_x, world_z)
    }

    /// Get height at a world position. Outside the grid the nearest edge
    /// cell answers.
    pub fn get_height_at(&self, world_x: f32, world_z: f32) -> f32 {
        // Simple nearest-neighbor for now
        let (gx, gz) = self.world_to_grid(world_x, world_z);
        self.cell_index(gx, gz)
            .and_then(|i| self.heights.get(i).copied())
            .unwrap_or(0.0)
    }

    pub fn set_height(&mut self, gx: usize, gz: usize, height: f32) {
        if let Some(i) = self.cell_index(gx, gz) {
            self.heights[i] = height;
        }
    }

    /// Get world bounds as (min_x, min_z, max_x, max_z).
    pub fn get_bounds(&self) -> (f32, f32, f32, f32) {
        let min_x = self.origin_x;
        let min_z = self.origin_z;
        let max_x = self.origin_x + self.width as f32 * self.cell_size;
        let max_z = self.origin_z + self.depth as f32 * self.cell_size;
        (min_x, min_z, max_x, max_z)
    }
}

impl GroundQuery for TerrainGrid {
    fn ground_height(&self, position: Vec3) -> f32 {
        self.get_height_at(position.x, position.z)
    }

    fn raycast_batch(&self, positions: &[Vec3], out: &mut Vec<f32>) {
        positions
            .par_iter()
            .map(|p| self.get_height_at(p.x, p.z))
            .collect_into_vec(out);
    }
}

impl NavSurface for TerrainGrid {
    fn sample_closest(&self, position: Vec3) -> Vec3 {
        let (min_x, min_z, max_x, max_z) = self.get_bounds();
        let x = position.x.clamp(min_x, max_x);
        let z = position.z.clamp(min_z, max_z);
        Vec3::new(x, self.get_height_at(x, z), z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terrain_grid_creation() {
        let grid = TerrainGrid::flat(100, 100, 2.0);
        assert_eq!(grid.width, 100);
        assert_eq!(grid.depth, 100);
        assert_eq!(grid.heights.len(), 10000);
    }

    #[test]
    fn test_world_to_grid() {
        let grid = TerrainGrid::flat(100, 100, 2.0);
        // Origin should be at (-100, -100)
        let (gx, gz) = grid.world_to_grid(0.0, 0.0);
        assert_eq!(gx, 50);
        assert_eq!(gz, 50);
    }

    #[test]
    fn test_height_outside_grid_uses_edge() {
        let mut grid = TerrainGrid::flat(10, 10, 1.0);
        grid.set_height(9, 9, 3.0);
        assert_eq!(grid.get_height_at(500.0, 500.0), 3.0);
    }

    #[test]
    fn test_raycast_batch_matches_single_queries() {
        let grid = TerrainGrid::rolling(64, 64, 2.0, 4.0);
        let positions: Vec<Vec3> = (0..50).map(|i| Vec3::new(i as f32 - 25.0, 10.0, i as f32 * 0.5)).collect();
        let mut out = Vec::new();
        grid.raycast_batch(&positions, &mut out);
        assert_eq!(out.len(), positions.len());
        for (p, h) in positions.iter().zip(&out) {
            assert_eq!(*h, grid.ground_height(*p));
        }
    }

    #[test]
    fn test_sample_closest_clamps_to_bounds() {
        let grid = TerrainGrid::flat(10, 10, 2.0);
        let p = grid.sample_closest(Vec3::new(100.0, 7.0, -3.0));
        assert_eq!(p, Vec3::new(10.0, 0.0, -3.0));
    }
}
