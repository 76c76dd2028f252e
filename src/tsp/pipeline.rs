//! Pipeline driver: header, octree scratch pass, TSP emission

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use glam::UVec3;
use serde::Serialize;

use crate::core::{Error, REAL_SIZE, Result};
use crate::tsp::{octree, time_tree};
use crate::voxel::dataset::DatasetHeader;

/// Configuration for one preprocessing run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input volume file
    pub input: PathBuf,
    /// Output TSP file
    pub output: PathBuf,
    /// Cubic brick dimension in voxels (Bx = By = Bz)
    pub brick_dim: u32,
    /// Padding width recorded in the TSP header
    pub padding_width: u32,
    /// Structure tag recorded in the TSP header
    pub structure: u32,
}

/// Geometry and byte counts of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct TspSummary {
    pub volume_dims: [u32; 3],
    pub brick_dims: [u32; 3],
    pub brick_grid: [u32; 3],
    pub num_timesteps: u32,
    pub num_octree_nodes: u64,
    pub num_bst_nodes: u64,
    pub data_size: u32,
    pub output_bytes: u64,
}

/// Offline TSP tree construction pipeline.
///
/// Owns the scratch file between the octree and BST passes; the scratch
/// is removed on success and on every failure path.
pub struct TspPipeline {
    config: PipelineConfig,
}

/// Removes the scratch file when dropped
struct ScratchGuard(PathBuf);

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove scratch file {}: {}", self.0.display(), e);
            }
        }
    }
}

impl TspPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline: parse and validate the header, build the
    /// per-timestep octrees into the scratch file, assemble a time BST
    /// per octree node into the TSP file.
    pub fn construct(&self) -> Result<TspSummary> {
        let cfg = &self.config;
        let header = self.read_header()?;
        log::info!(
            "volume {}x{}x{}, {} timesteps, {} bricks/axis, {} octree nodes, {} BST nodes each",
            header.volume_dims.x,
            header.volume_dims.y,
            header.volume_dims.z,
            header.num_timesteps,
            header.brick_grid.x,
            header.num_octree_nodes(),
            header.num_bst_nodes()
        );

        let scratch = scratch_path(&cfg.output);
        let _guard = ScratchGuard(scratch.clone());
        octree::write_scratch(&header, &cfg.input, &scratch)?;
        time_tree::write_tsp(&header, &scratch, &cfg.output)?;

        Ok(TspSummary {
            volume_dims: header.volume_dims.to_array(),
            brick_dims: header.brick_dims.to_array(),
            brick_grid: header.brick_grid.to_array(),
            num_timesteps: header.num_timesteps,
            num_octree_nodes: header.num_octree_nodes(),
            num_bst_nodes: header.num_bst_nodes(),
            data_size: REAL_SIZE,
            output_bytes: header.tsp_bytes(),
        })
    }

    fn read_header(&self) -> Result<DatasetHeader> {
        let cfg = &self.config;
        let mut reader = BufReader::new(File::open(&cfg.input).map_err(|e| {
            Error::Input(format!("cannot open {}: {}", cfg.input.display(), e))
        })?);
        DatasetHeader::read(
            &mut reader,
            UVec3::splat(cfg.brick_dim),
            cfg.padding_width,
            cfg.structure,
        )
    }
}

/// Scratch file path placed next to the final output
fn scratch_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".scratch");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Real;
    use crate::voxel::dataset::TSP_HEADER_SIZE;

    fn write_input(path: &Path, timesteps: u32, volume: u32, voxels: &[Real]) {
        let mut bytes = Vec::new();
        for field in [1u32, timesteps, volume, volume, volume] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        for &v in voxels {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(path, &bytes).unwrap();
    }

    fn payload(path: &Path) -> Vec<Real> {
        let bytes = std::fs::read(path).unwrap();
        bytes[TSP_HEADER_SIZE as usize..]
            .chunks_exact(4)
            .map(|c| Real::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn config(dir: &Path, brick_dim: u32) -> PipelineConfig {
        PipelineConfig {
            input: dir.join("volume.raw"),
            output: dir.join("volume.tsp"),
            brick_dim,
            padding_width: 0,
            structure: 0,
        }
    }

    #[test]
    fn test_single_brick_single_timestep() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 2);
        let voxels: Vec<Real> = (1..=8).map(|v| v as Real).collect();
        write_input(&cfg.input, 1, 2, &voxels);

        let summary = TspPipeline::new(cfg.clone()).construct().unwrap();
        assert_eq!(summary.num_octree_nodes, 1);
        assert_eq!(summary.num_bst_nodes, 1);

        let len = std::fs::metadata(&cfg.output).unwrap().len();
        assert_eq!(len, TSP_HEADER_SIZE + 32);
        assert_eq!(len, summary.output_bytes);
        assert_eq!(payload(&cfg.output), voxels);
    }

    #[test]
    fn test_spatial_tree_emitted_root_first() {
        // 2x2x2 grid of single-voxel bricks: 9 BST blocks of one brick
        // each, root block first, then the Z-ordered leaves
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1);
        let voxels: Vec<Real> = (0..8).map(|v| v as Real).collect();
        write_input(&cfg.input, 1, 2, &voxels);

        TspPipeline::new(cfg.clone()).construct().unwrap();
        let values = payload(&cfg.output);
        assert_eq!(
            values,
            vec![3.5, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]
        );
    }

    #[test]
    fn test_time_tree_emitted_root_first() {
        // One spatial brick over four timesteps: payload is the 7-node
        // BST in level order
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1);
        write_input(&cfg.input, 4, 1, &[10.0, 20.0, 30.0, 40.0]);

        TspPipeline::new(cfg.clone()).construct().unwrap();
        assert_eq!(
            payload(&cfg.output),
            vec![25.0, 15.0, 35.0, 10.0, 20.0, 30.0, 40.0]
        );
    }

    #[test]
    fn test_constant_volume() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 2);
        let voxels = vec![7.0; 2 * 64];
        write_input(&cfg.input, 2, 4, &voxels);

        let summary = TspPipeline::new(cfg.clone()).construct().unwrap();
        assert_eq!(summary.num_octree_nodes, 9);
        assert_eq!(summary.num_bst_nodes, 3);

        let values = payload(&cfg.output);
        assert_eq!(values.len() * 4, 864);
        assert!(values.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_non_power_of_two_timesteps_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1);
        write_input(&cfg.input, 3, 1, &[1.0, 2.0, 3.0]);

        let err = TspPipeline::new(cfg.clone()).construct().unwrap_err();
        assert!(matches!(err, Error::TimestepCount(3)));
        assert!(!cfg.output.exists());
    }

    #[test]
    fn test_geometry_mismatch_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 4);
        write_input(&cfg.input, 1, 6, &vec![0.0; 216]);

        let err = TspPipeline::new(cfg.clone()).construct().unwrap_err();
        assert!(matches!(err, Error::Geometry(_)));
        assert!(!cfg.output.exists());
    }

    #[test]
    fn test_deterministic_output() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 2);
        let voxels: Vec<Real> = (0..128).map(|v| (v as Real).sin()).collect();
        write_input(&cfg.input, 2, 4, &voxels);

        TspPipeline::new(cfg.clone()).construct().unwrap();
        let first = std::fs::read(&cfg.output).unwrap();
        TspPipeline::new(cfg.clone()).construct().unwrap();
        let second = std::fs::read(&cfg.output).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scratch_removed_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1);
        write_input(&cfg.input, 1, 1, &[42.0]);

        TspPipeline::new(cfg.clone()).construct().unwrap();
        assert!(cfg.output.exists());
        assert!(!scratch_path(&cfg.output).exists());
    }

    #[test]
    fn test_scratch_removed_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1);
        // Prefix declares 8 voxels but the payload is truncated
        write_input(&cfg.input, 1, 2, &[0.0, 1.0, 2.0]);

        let err = TspPipeline::new(cfg.clone()).construct().unwrap_err();
        assert!(matches!(err, Error::Input(_)));
        assert!(!scratch_path(&cfg.output).exists());
        assert!(!cfg.output.exists());
    }
}
