//! Per-timestep octree construction and scratch file emission

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;

use crate::core::{Error, Real, Result};
use crate::math::morton::decode_morton;
use crate::voxel::brick::Brick;
use crate::voxel::dataset::DatasetHeader;

/// Build one full octree per timestep and append its bricks to the
/// scratch file.
///
/// Scratch layout: `T` blocks of `N_octree` raw bricks each, no headers.
/// Within a block the Z-ordered leaves come first and the root brick is
/// last.
pub fn write_scratch(header: &DatasetHeader, input: &Path, scratch: &Path) -> Result<()> {
    let mut reader = BufReader::new(
        File::open(input)
            .map_err(|e| Error::Input(format!("cannot open {}: {}", input.display(), e)))?,
    );
    let mut writer = BufWriter::new(
        File::create(scratch)
            .map_err(|e| Error::Scratch(format!("cannot create {}: {}", scratch.display(), e)))?,
    );

    for t in 0..header.num_timesteps {
        let start = Instant::now();
        let voxels = header.read_timestep(&mut reader, t)?;
        let octree = build_octree(header, &voxels)?;
        for brick in &octree {
            brick
                .write_to(&mut writer)
                .map_err(|e| Error::Scratch(format!("write failed: {}", e)))?;
        }
        log::info!(
            "timestep {}/{}: {} octree bricks in {:.2?}",
            t + 1,
            header.num_timesteps,
            octree.len(),
            start.elapsed()
        );
    }
    writer
        .flush()
        .map_err(|e| Error::Scratch(format!("flush failed: {}", e)))?;
    Ok(())
}

/// Build the full octree for one timestep.
///
/// Returns `N_octree` bricks with children before parents: the `8^L`
/// Z-ordered base bricks first, then each filtered+combined interior
/// level, ending with the root. The eight children of any interior node
/// occupy eight consecutive slots.
pub fn build_octree(header: &DatasetHeader, voxels: &[Real]) -> Result<Vec<Brick>> {
    let num_leaves = header.num_base_bricks() as usize;
    let num_nodes = header.num_octree_nodes() as usize;

    // Leaf slot m holds the base brick at the decoded Morton coordinates
    let mut octree: Vec<Brick> = (0..num_leaves)
        .into_par_iter()
        .map(|m| {
            let (xb, yb, zb) = decode_morton(m as u32);
            carve_brick(header, voxels, xb, yb, zb)
        })
        .collect::<Result<_>>()?;

    octree.reserve_exact(num_nodes - num_leaves);
    let mut child_pos = 0;
    while octree.len() < num_nodes {
        let parent = Brick::coarsen(&octree[child_pos..child_pos + 8])?;
        octree.push(parent);
        child_pos += 8;
    }
    Ok(octree)
}

/// Copy the subvolume of base brick (xb, yb, zb) out of a flat
/// x-fastest timestep buffer
fn carve_brick(
    header: &DatasetHeader,
    voxels: &[Real],
    xb: u32,
    yb: u32,
    zb: u32,
) -> Result<Brick> {
    let b = header.brick_dims;
    let v = header.volume_dims;
    let mut out = Vec::with_capacity(header.brick_voxels());
    for z in 0..b.z {
        for y in 0..b.y {
            let row = ((zb * b.z + z) as usize * v.y as usize + (yb * b.y + y) as usize)
                * v.x as usize
                + (xb * b.x) as usize;
            out.extend_from_slice(&voxels[row..row + b.x as usize]);
        }
    }
    Brick::from_voxels(b, out)
}
