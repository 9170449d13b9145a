//! Dense pixel remapping.

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into_with, Interpolation};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemapError {
    #[error("map buffers hold {x} and {y} entries, expected {expected}")]
    MapSize { x: usize, y: usize, expected: usize },
}

/// Per-destination-pixel source coordinates, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemapTable {
    pub width: u32,
    pub height: u32,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl RemapTable {
    pub fn new(width: u32, height: u32, map_x: Vec<f32>, map_y: Vec<f32>) -> Result<Self, RemapError> {
        let expected = width as usize * height as usize;
        if map_x.len() != expected || map_y.len() != expected {
            return Err(RemapError::MapSize {
                x: map_x.len(),
                y: map_y.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            map_x,
            map_y,
        })
    }

    /// Build a table by evaluating `f(u, v) -> (x, y)` for every pixel.
    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> (f32, f32) + Sync,
    {
        let w = width.max(1);
        let coords: Vec<(f32, f32)> = (0..width * height)
            .into_par_iter()
            .map(|i| f(i % w, i / w))
            .collect();
        let (map_x, map_y) = coords.into_iter().unzip();
        Self {
            width,
            height,
            map_x,
            map_y,
        }
    }

    #[inline]
    pub fn get(&self, u: u32, v: u32) -> (f32, f32) {
        let i = v as usize * self.width as usize + u as usize;
        (self.map_x[i], self.map_y[i])
    }

    /// `map_x` as one vector per image row.
    pub fn rows_x(&self) -> Vec<Vec<f32>> {
        split_rows(&self.map_x, self.width)
    }

    /// `map_y` as one vector per image row.
    pub fn rows_y(&self) -> Vec<Vec<f32>> {
        split_rows(&self.map_y, self.width)
    }
}

fn split_rows(data: &[f32], width: u32) -> Vec<Vec<f32>> {
    data.chunks(width.max(1) as usize).map(<[f32]>::to_vec).collect()
}

/// Resample `src` through `table`. Pixels whose bilinear footprint leaves
/// `src` become 0.
pub fn remap_bilinear(src: &GrayImage, table: &RemapTable) -> GrayImage {
    let mut out = GrayImage::new(table.width, table.height);
    warp_into_with(
        src,
        |u, v| table.get(u as u32, v as u32),
        Interpolation::Bilinear,
        Luma([0]),
        &mut out,
    );
    out
}
