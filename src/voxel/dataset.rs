//! Input volume header parsing and geometry validation

use std::io::{Read, Seek, SeekFrom, Write};

use glam::UVec3;

use crate::core::{Error, REAL_SIZE, Real, Result};

/// Byte offset at which the voxel payload begins: five u32 prefix fields
pub const PAYLOAD_OFFSET: u64 = 5 * std::mem::size_of::<u32>() as u64;

/// Size of the emitted TSP file header: eleven u32 fields
pub const TSP_HEADER_SIZE: u64 = 11 * std::mem::size_of::<u32>() as u64;

/// Morton encoding supports 10 bits per axis
const MAX_BRICK_GRID: u32 = 1 << 10;

/// Geometry descriptor for a time-varying volume dataset.
///
/// Populated once from the input file prefix plus the invocation
/// parameters, then immutable for the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct DatasetHeader {
    /// Structure tag, passed through to the TSP header
    pub structure: u32,
    /// Dimensionality tag from the input prefix
    pub data_dimensionality: u32,
    /// Brick dimensions in voxels
    pub brick_dims: UVec3,
    /// Brick counts per axis; all equal and a power of two
    pub brick_grid: UVec3,
    /// Volume dimensions in voxels
    pub volume_dims: UVec3,
    /// Number of timesteps; a power of two
    pub num_timesteps: u32,
    /// Brick padding width, passed through to the TSP header
    pub padding_width: u32,
}

impl DatasetHeader {
    /// Build and validate a header from known geometry
    pub fn new(
        structure: u32,
        data_dimensionality: u32,
        brick_dims: UVec3,
        volume_dims: UVec3,
        num_timesteps: u32,
        padding_width: u32,
    ) -> Result<Self> {
        for axis in 0..3 {
            let v = volume_dims[axis];
            let b = brick_dims[axis];
            if b == 0 || v % b != 0 {
                return Err(Error::Geometry(format!(
                    "volume dimension {} is not a multiple of brick dimension {} on axis {}",
                    v, b, axis
                )));
            }
        }
        let brick_grid = volume_dims / brick_dims;
        if brick_grid.x != brick_grid.y || brick_grid.y != brick_grid.z {
            return Err(Error::Geometry(format!(
                "brick grid {}x{}x{} is not cubic",
                brick_grid.x, brick_grid.y, brick_grid.z
            )));
        }
        if !brick_grid.x.is_power_of_two() {
            return Err(Error::Geometry(format!(
                "brick count {} per axis is not a power of two",
                brick_grid.x
            )));
        }
        if brick_grid.x > MAX_BRICK_GRID {
            return Err(Error::Geometry(format!(
                "brick count {} per axis exceeds the supported maximum {}",
                brick_grid.x, MAX_BRICK_GRID
            )));
        }
        if !num_timesteps.is_power_of_two() {
            return Err(Error::TimestepCount(num_timesteps));
        }
        Ok(Self {
            structure,
            data_dimensionality,
            brick_dims,
            brick_grid,
            volume_dims,
            num_timesteps,
            padding_width,
        })
    }

    /// Parse the input file prefix and validate the dataset geometry.
    ///
    /// The prefix holds five little-endian u32 fields:
    /// `dataDimensionality, T, Vx, Vy, Vz`. Brick dimensions, padding and
    /// structure come from the invocation.
    pub fn read<R: Read>(
        reader: &mut R,
        brick_dims: UVec3,
        padding_width: u32,
        structure: u32,
    ) -> Result<Self> {
        let mut prefix = [0u8; PAYLOAD_OFFSET as usize];
        reader
            .read_exact(&mut prefix)
            .map_err(|e| Error::Input(format!("cannot read volume prefix: {}", e)))?;
        let field = |i: usize| {
            u32::from_le_bytes([
                prefix[4 * i],
                prefix[4 * i + 1],
                prefix[4 * i + 2],
                prefix[4 * i + 3],
            ])
        };
        let data_dimensionality = field(0);
        let num_timesteps = field(1);
        let (vx, vy, vz) = (field(2), field(3), field(4));

        Self::new(
            structure,
            data_dimensionality,
            brick_dims,
            UVec3::new(vx, vy, vz),
            num_timesteps,
            padding_width,
        )
    }

    /// Octree level of the root; leaves are at level 0
    pub fn root_level(&self) -> u32 {
        self.brick_grid.x.trailing_zeros()
    }

    /// Number of base (leaf) bricks per timestep: 8^L
    pub fn num_base_bricks(&self) -> u64 {
        1u64 << (3 * self.root_level())
    }

    /// Bricks in one full octree: (8^(L+1) - 1) / 7
    pub fn num_octree_nodes(&self) -> u64 {
        ((1u64 << (3 * (self.root_level() + 1))) - 1) / 7
    }

    /// Nodes in one time BST: 2T - 1
    pub fn num_bst_nodes(&self) -> u64 {
        2 * self.num_timesteps as u64 - 1
    }

    /// Voxels per brick
    pub fn brick_voxels(&self) -> usize {
        (self.brick_dims.x * self.brick_dims.y * self.brick_dims.z) as usize
    }

    /// Bytes per brick on disk
    pub fn brick_bytes(&self) -> u64 {
        self.brick_voxels() as u64 * REAL_SIZE as u64
    }

    /// Voxels in one timestep of the input volume
    pub fn timestep_voxels(&self) -> usize {
        (self.volume_dims.x as u64 * self.volume_dims.y as u64 * self.volume_dims.z as u64)
            as usize
    }

    /// Bytes of one timestep's payload in the input file
    pub fn timestep_bytes(&self) -> u64 {
        self.timestep_voxels() as u64 * REAL_SIZE as u64
    }

    /// Total size of the scratch file: T octrees of raw bricks
    pub fn scratch_bytes(&self) -> u64 {
        self.num_timesteps as u64 * self.num_octree_nodes() * self.brick_bytes()
    }

    /// Total size of the emitted TSP file, header included
    pub fn tsp_bytes(&self) -> u64 {
        TSP_HEADER_SIZE + self.num_octree_nodes() * self.num_bst_nodes() * self.brick_bytes()
    }

    /// Read one timestep's voxel payload into a flat x-fastest buffer
    pub fn read_timestep<R: Read + Seek>(&self, reader: &mut R, t: u32) -> Result<Vec<Real>> {
        let offset = PAYLOAD_OFFSET + t as u64 * self.timestep_bytes();
        reader.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; self.timestep_bytes() as usize];
        reader
            .read_exact(&mut bytes)
            .map_err(|e| Error::Input(format!("timestep {} payload truncated: {}", t, e)))?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Emit the 44-byte TSP file header, all fields little-endian u32
    pub fn write_tsp_header<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let fields = [
            self.structure,
            self.data_dimensionality,
            self.brick_dims.x,
            self.brick_dims.y,
            self.brick_dims.z,
            self.brick_grid.x,
            self.brick_grid.y,
            self.brick_grid.z,
            self.num_timesteps,
            self.padding_width,
            REAL_SIZE,
        ];
        for field in fields {
            writer.write_all(&field.to_le_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::uvec3;

    fn prefix(dimensionality: u32, t: u32, vx: u32, vy: u32, vz: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [dimensionality, t, vx, vy, vz] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_read_and_derive() {
        let bytes = prefix(1, 2, 4, 4, 4);
        let header =
            DatasetHeader::read(&mut bytes.as_slice(), uvec3(2, 2, 2), 1, 0).unwrap();
        assert_eq!(header.data_dimensionality, 1);
        assert_eq!(header.num_timesteps, 2);
        assert_eq!(header.volume_dims, uvec3(4, 4, 4));
        assert_eq!(header.brick_grid, uvec3(2, 2, 2));
        assert_eq!(header.root_level(), 1);
        assert_eq!(header.num_base_bricks(), 8);
        assert_eq!(header.num_octree_nodes(), 9);
        assert_eq!(header.num_bst_nodes(), 3);
        assert_eq!(header.brick_voxels(), 8);
        assert_eq!(header.brick_bytes(), 32);
        assert_eq!(header.timestep_bytes(), 256);
        assert_eq!(header.scratch_bytes(), 2 * 9 * 32);
        assert_eq!(header.tsp_bytes(), 44 + 9 * 3 * 32);
    }

    #[test]
    fn test_minimum_configuration() {
        // L = 0, K = 0: one brick, one timestep
        let header =
            DatasetHeader::new(0, 1, uvec3(2, 2, 2), uvec3(2, 2, 2), 1, 0).unwrap();
        assert_eq!(header.root_level(), 0);
        assert_eq!(header.num_octree_nodes(), 1);
        assert_eq!(header.num_bst_nodes(), 1);
        assert_eq!(header.tsp_bytes(), 44 + 32);
    }

    #[test]
    fn test_rejects_non_power_of_two_timesteps() {
        let err =
            DatasetHeader::new(0, 1, uvec3(2, 2, 2), uvec3(2, 2, 2), 3, 0).unwrap_err();
        assert!(matches!(err, Error::TimestepCount(3)));
    }

    #[test]
    fn test_rejects_indivisible_volume() {
        let err =
            DatasetHeader::new(0, 1, uvec3(4, 4, 4), uvec3(6, 4, 4), 1, 0).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)));
    }

    #[test]
    fn test_rejects_non_cubic_grid() {
        let err =
            DatasetHeader::new(0, 1, uvec3(1, 1, 1), uvec3(4, 2, 2), 1, 0).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)));
    }

    #[test]
    fn test_rejects_non_power_of_two_grid() {
        let err =
            DatasetHeader::new(0, 1, uvec3(1, 1, 1), uvec3(3, 3, 3), 1, 0).unwrap_err();
        assert!(matches!(err, Error::Geometry(_)));
    }

    #[test]
    fn test_rejects_truncated_prefix() {
        let bytes = prefix(1, 1, 2, 2, 2);
        let err = DatasetHeader::read(&mut bytes[..12].as_ref(), uvec3(2, 2, 2), 0, 0)
            .unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[test]
    fn test_tsp_header_layout() {
        let header =
            DatasetHeader::new(7, 1, uvec3(8, 8, 8), uvec3(16, 16, 16), 4, 2).unwrap();
        let mut bytes = Vec::new();
        header.write_tsp_header(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, TSP_HEADER_SIZE);

        let fields: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        // structure, dataDimensionality, Bx, By, Bz, Nx, Ny, Nz, T,
        // paddingWidth, dataSize
        assert_eq!(fields, vec![7, 1, 8, 8, 8, 2, 2, 2, 4, 2, 4]);
    }
}
