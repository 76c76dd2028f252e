//! Time BST assembly and final TSP file emission

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

use crate::core::{Error, Result};
use crate::voxel::brick::Brick;
use crate::voxel::dataset::DatasetHeader;

/// Assemble the full time BST over per-timestep leaf bricks.
///
/// Returns `2T - 1` bricks in level order: the root at index 0, the
/// leaves last in their input order. Every interior node is the
/// elementwise average of its two children.
pub fn build_time_tree(leaves: Vec<Brick>) -> Result<Vec<Brick>> {
    if leaves.is_empty() || !leaves.len().is_power_of_two() {
        return Err(Error::Invariant(format!(
            "time BST needs a power-of-two leaf count, got {}",
            leaves.len()
        )));
    }
    let num_nodes = 2 * leaves.len() - 1;

    let mut levels = Vec::new();
    let mut current = leaves;
    while current.len() > 1 {
        let mut parents = Vec::with_capacity(current.len() / 2);
        for pair in current.chunks_exact(2) {
            parents.push(Brick::average(&pair[0], &pair[1])?);
        }
        levels.push(current);
        current = parents;
    }
    levels.push(current);

    let mut nodes = Vec::with_capacity(num_nodes);
    for level in levels.into_iter().rev() {
        nodes.extend(level);
    }
    Ok(nodes)
}

/// Stream the scratch file and write the final TSP file.
///
/// The 44-byte header comes first, then one BST block per octree node.
/// Blocks are emitted in reverse octree-level order: the root's block
/// first, the `8^L` Z-ordered leaf blocks last. Within a block the
/// `2T - 1` bricks appear root-first.
pub fn write_tsp(header: &DatasetHeader, scratch: &Path, out: &Path) -> Result<()> {
    let mut reader = BufReader::new(
        File::open(scratch)
            .map_err(|e| Error::Scratch(format!("cannot open {}: {}", scratch.display(), e)))?,
    );
    let mut writer = BufWriter::new(
        File::create(out)
            .map_err(|e| Error::TspWrite(format!("cannot create {}: {}", out.display(), e)))?,
    );
    header
        .write_tsp_header(&mut writer)
        .map_err(|e| Error::TspWrite(format!("header write failed: {}", e)))?;

    let num_nodes = header.num_octree_nodes();
    let num_timesteps = header.num_timesteps as u64;
    let mut octree_pos = num_nodes;

    for depth in 0..=header.root_level() {
        let start = Instant::now();
        let level_nodes = 1u64 << (3 * depth);
        octree_pos -= level_nodes;

        for i in 0..level_nodes {
            let mut leaves = Vec::with_capacity(num_timesteps as usize);
            for ts in 0..num_timesteps {
                let offset = (octree_pos + i + ts * num_nodes) * header.brick_bytes();
                reader
                    .seek(SeekFrom::Start(offset))
                    .map_err(|e| Error::Scratch(format!("seek failed: {}", e)))?;
                let brick = Brick::read_from(&mut reader, header.brick_dims)
                    .map_err(|e| Error::Scratch(format!("brick read failed: {}", e)))?;
                leaves.push(brick);
            }
            let bst = build_time_tree(leaves)?;
            for brick in &bst {
                brick
                    .write_to(&mut writer)
                    .map_err(|e| Error::TspWrite(format!("write failed: {}", e)))?;
            }
        }
        log::info!(
            "octree depth {}: {} spatial nodes in {:.2?}",
            depth,
            level_nodes,
            start.elapsed()
        );
    }
    writer
        .flush()
        .map_err(|e| Error::TspWrite(format!("flush failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Real;
    use glam::uvec3;

    fn single(value: Real) -> Brick {
        Brick::new(uvec3(1, 1, 1), value)
    }

    fn values(nodes: &[Brick]) -> Vec<Real> {
        nodes.iter().map(|b| b.voxels()[0]).collect()
    }

    #[test]
    fn test_four_timesteps() {
        let leaves = vec![single(10.0), single(20.0), single(30.0), single(40.0)];
        let bst = build_time_tree(leaves).unwrap();
        // Root, then the level-1 pair, then the leaves
        assert_eq!(values(&bst), vec![25.0, 15.0, 35.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_single_timestep() {
        let bst = build_time_tree(vec![single(5.0)]).unwrap();
        assert_eq!(values(&bst), vec![5.0]);
    }

    #[test]
    fn test_interior_nodes_average_children() {
        let leaves: Vec<Brick> = (0..8).map(|v| single(v as Real)).collect();
        let bst = build_time_tree(leaves).unwrap();
        assert_eq!(bst.len(), 15);
        // q = average(leftChild, rightChild) for every interior index
        for parent in 0..7usize {
            let expected =
                Brick::average(&bst[2 * parent + 1], &bst[2 * parent + 2]).unwrap();
            assert_eq!(bst[parent].voxels(), expected.voxels());
        }
    }

    #[test]
    fn test_rejects_non_power_of_two_leaves() {
        let leaves = vec![single(1.0), single(2.0), single(3.0)];
        assert!(matches!(
            build_time_tree(leaves),
            Err(Error::Invariant(_))
        ));
    }
}
