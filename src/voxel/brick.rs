//! Dense scalar brick, the storage unit of the TSP tree

use std::io::{Read, Write};

use glam::UVec3;

use crate::core::{Error, Real, Result};

/// Dense 3D block of scalar voxels, x-fastest then y then z.
///
/// All bricks in a dataset share the same dimensions. Interior octree
/// bricks keep these dimensions while covering a larger spatial extent;
/// the resolution drop comes from [`Brick::filter`] + [`Brick::combine`].
#[derive(Debug, Clone, PartialEq)]
pub struct Brick {
    dims: UVec3,
    voxels: Vec<Real>,
}

impl Brick {
    /// Create a brick filled with a constant value
    pub fn new(dims: UVec3, fill: Real) -> Self {
        Self {
            dims,
            voxels: vec![fill; (dims.x * dims.y * dims.z) as usize],
        }
    }

    /// Create a brick from an existing voxel buffer
    pub fn from_voxels(dims: UVec3, voxels: Vec<Real>) -> Result<Self> {
        let expected = (dims.x * dims.y * dims.z) as usize;
        if voxels.len() != expected {
            return Err(Error::Invariant(format!(
                "brick buffer holds {} voxels, dimensions {}x{}x{} require {}",
                voxels.len(),
                dims.x,
                dims.y,
                dims.z,
                expected
            )));
        }
        Ok(Self { dims, voxels })
    }

    /// Brick dimensions in voxels
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// Number of voxels in the brick
    pub fn num_voxels(&self) -> usize {
        self.voxels.len()
    }

    /// On-disk payload size in bytes
    pub fn num_bytes(&self) -> usize {
        self.voxels.len() * std::mem::size_of::<Real>()
    }

    /// Raw voxel slice in layout order
    pub fn voxels(&self) -> &[Real] {
        &self.voxels
    }

    fn index(&self, x: u32, y: u32, z: u32) -> usize {
        assert!(
            x < self.dims.x && y < self.dims.y && z < self.dims.z,
            "voxel ({}, {}, {}) out of range for {}x{}x{} brick",
            x,
            y,
            z,
            self.dims.x,
            self.dims.y,
            self.dims.z
        );
        (x + y * self.dims.x + z * self.dims.x * self.dims.y) as usize
    }

    /// Get voxel at local coordinates
    pub fn get(&self, x: u32, y: u32, z: u32) -> Real {
        self.voxels[self.index(x, y, z)]
    }

    /// Set voxel at local coordinates
    pub fn set(&mut self, x: u32, y: u32, z: u32, value: Real) {
        let i = self.index(x, y, z);
        self.voxels[i] = value;
    }

    /// Half-resolution downsample into the lower octant.
    ///
    /// The result has the same dimensions; its voxel at (x, y, z) below
    /// the half-dims is the mean of the 2x2x2 block at (2x, 2y, 2z) of
    /// `self`. The other seven octants are zeroed and carry no contract;
    /// [`Brick::combine`] overwrites them.
    pub fn filter(&self) -> Brick {
        assert!(
            self.dims.x % 2 == 0 && self.dims.y % 2 == 0 && self.dims.z % 2 == 0,
            "filter requires even brick dimensions, got {}x{}x{}",
            self.dims.x,
            self.dims.y,
            self.dims.z
        );
        let half = self.dims / 2;
        let mut out = Brick::new(self.dims, 0.0);
        for z in 0..half.z {
            for y in 0..half.y {
                for x in 0..half.x {
                    let mut sum = 0.0;
                    for dz in 0..2 {
                        for dy in 0..2 {
                            for dx in 0..2 {
                                sum += self.get(2 * x + dx, 2 * y + dy, 2 * z + dz);
                            }
                        }
                    }
                    out.set(x, y, z, sum / 8.0);
                }
            }
        }
        out
    }

    /// Assemble eight filtered children into a parent brick.
    ///
    /// Child `i` occupies the octant whose 3-bit signature is `i`
    /// (bit 0 = x, bit 1 = y, bit 2 = z, matching Morton sibling order);
    /// its lower-octant block is copied there. The parent has the same
    /// dimensions and represents twice the linear extent.
    pub fn combine(children: &[Brick]) -> Result<Brick> {
        let dims = Self::check_family(children)?;
        if dims.x % 2 != 0 || dims.y % 2 != 0 || dims.z % 2 != 0 {
            return Err(Error::Invariant(format!(
                "combine requires even brick dimensions, got {}x{}x{}",
                dims.x, dims.y, dims.z
            )));
        }
        let half = dims / 2;
        let mut out = Brick::new(dims, 0.0);
        for (i, child) in children.iter().enumerate() {
            let ox = (i as u32 & 1) * half.x;
            let oy = ((i as u32 >> 1) & 1) * half.y;
            let oz = ((i as u32 >> 2) & 1) * half.z;
            for z in 0..half.z {
                for y in 0..half.y {
                    for x in 0..half.x {
                        out.set(ox + x, oy + y, oz + z, child.get(x, y, z));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Filter and combine in a single pass.
    ///
    /// Each parent voxel is the 2x2x2 mean of the corresponding block of
    /// the eight children laid out as octants, so the result is
    /// byte-identical to `combine` over eight `filter`ed children. Unlike
    /// that pair this also covers odd brick dimensions; for 1-voxel
    /// bricks the parent degenerates to the mean of all eight children.
    pub fn coarsen(children: &[Brick]) -> Result<Brick> {
        let dims = Self::check_family(children)?;
        let mut out = Brick::new(dims, 0.0);
        for pz in 0..dims.z {
            for py in 0..dims.y {
                for px in 0..dims.x {
                    let mut sum = 0.0;
                    for dz in 0..2 {
                        for dy in 0..2 {
                            for dx in 0..2 {
                                // Sample the virtual 2B volume formed by the
                                // eight children in octant order
                                let (sx, sy, sz) = (2 * px + dx, 2 * py + dy, 2 * pz + dz);
                                let (cx, cy, cz) = (sx / dims.x, sy / dims.y, sz / dims.z);
                                let child = &children[(cx | cy << 1 | cz << 2) as usize];
                                sum += child.get(sx % dims.x, sy % dims.y, sz % dims.z);
                            }
                        }
                    }
                    out.set(px, py, pz, sum / 8.0);
                }
            }
        }
        Ok(out)
    }

    /// Elementwise mean of two bricks
    pub fn average(a: &Brick, b: &Brick) -> Result<Brick> {
        if a.dims != b.dims {
            return Err(Error::Invariant(format!(
                "average dimension mismatch: {}x{}x{} vs {}x{}x{}",
                a.dims.x, a.dims.y, a.dims.z, b.dims.x, b.dims.y, b.dims.z
            )));
        }
        let voxels = a
            .voxels
            .iter()
            .zip(&b.voxels)
            .map(|(&x, &y)| (x + y) * 0.5)
            .collect();
        Ok(Brick {
            dims: a.dims,
            voxels,
        })
    }

    /// Write the raw voxel payload in layout order
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(bytemuck::cast_slice(&self.voxels))
    }

    /// Read a raw voxel payload of the given dimensions
    pub fn read_from<R: Read>(reader: &mut R, dims: UVec3) -> std::io::Result<Brick> {
        let num_bytes = (dims.x * dims.y * dims.z) as usize * std::mem::size_of::<Real>();
        let mut bytes = vec![0u8; num_bytes];
        reader.read_exact(&mut bytes)?;
        Ok(Brick {
            dims,
            voxels: bytemuck::pod_collect_to_vec(&bytes),
        })
    }

    fn check_family(children: &[Brick]) -> Result<UVec3> {
        if children.len() != 8 {
            return Err(Error::Invariant(format!(
                "expected 8 children, got {}",
                children.len()
            )));
        }
        let dims = children[0].dims;
        if children.iter().any(|c| c.dims != dims) {
            return Err(Error::Invariant(
                "children do not share identical brick dimensions".to_string(),
            ));
        }
        Ok(dims)
    }
}
