//! Reading and writing Qubicle `.qb` voxel files.
//!
//! Only uncompressed RGBA files are supported. Header integers are little endian, voxel
//! colors are stored as big endian `0xRRGGBBAA`.
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use bevy::math::{IVec3, UVec3};
use ndarray::Array3;

use crate::{
    error::{Result, TerrainError},
    ColorInt,
};

const VERSION: u32 = 257;
const COLOR_FORMAT_RGBA: u32 = 0;
const ORIENTATION_RIGHT_HANDED: u32 = 1;
const LAYER_NAME: &str = "Main World";
/// Largest layer accepted on read, in voxels.
const MAX_LAYER_VOXELS: usize = 1 << 28;

/// A dense grid of packed colors, indexed `[x, y, z]`. 0 is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelData {
    center: IVec3,
    colors: Array3<ColorInt>,
}

impl VoxelData {
    /// Wrap a flat `x` major color list of `size`.
    pub fn new(size: UVec3, center: IVec3, colors: Vec<ColorInt>) -> Result<Self> {
        let found = colors.len();
        let expected = voxel_count(size).ok_or(TerrainError::DimensionMismatch {
            expected: usize::MAX,
            found,
        })?;

        let colors = Array3::from_shape_vec(
            (size.x as usize, size.y as usize, size.z as usize),
            colors,
        )
        .map_err(|_| TerrainError::DimensionMismatch { expected, found })?;

        Ok(VoxelData { center, colors })
    }

    pub fn from_colors(center: IVec3, colors: Array3<ColorInt>) -> Self {
        VoxelData { center, colors }
    }

    pub fn size(&self) -> UVec3 {
        let (x, y, z) = self.colors.dim();
        UVec3::new(x as u32, y as u32, z as u32)
    }

    pub fn center(&self) -> IVec3 {
        self.center
    }

    pub fn colors(&self) -> &Array3<ColorInt> {
        &self.colors
    }

    /// Color at `pos`, 0 outside the grid.
    pub fn color(&self, pos: IVec3) -> ColorInt {
        Self::index(pos)
            .and_then(|index| self.colors.get(index))
            .copied()
            .unwrap_or(0)
    }

    /// Set the color at `pos`. Positions outside the grid are ignored.
    pub fn set_color(&mut self, pos: IVec3, color: ColorInt) {
        if let Some(voxel) = Self::index(pos).and_then(|index| self.colors.get_mut(index)) {
            *voxel = color;
        }
    }

    fn index(pos: IVec3) -> Option<[usize; 3]> {
        if pos.cmplt(IVec3::ZERO).any() {
            return None;
        }

        Some([pos.x as usize, pos.y as usize, pos.z as usize])
    }
}

/// Number of voxels in a grid of `size`, `None` on overflow.
fn voxel_count(size: UVec3) -> Option<usize> {
    (size.x as usize)
        .checked_mul(size.y as usize)?
        .checked_mul(size.z as usize)
}

fn read_error(e: std::io::Error) -> TerrainError {
    match e.kind() {
        ErrorKind::UnexpectedEof => TerrainError::Format("unexpected end of file".into()),
        _ => TerrainError::Io(e),
    }
}

fn read_bytes<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(read_error)?;
    Ok(buf)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    read_bytes(reader).map(u32::from_le_bytes)
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    read_bytes(reader).map(i32::from_le_bytes)
}

/// Read every layer of a `.qb` stream.
pub fn read_qb_from<R: Read>(reader: &mut R) -> Result<Vec<VoxelData>> {
    let _version = read_u32(reader)?;
    let color_format = read_u32(reader)?;
    let _orientation = read_u32(reader)?;
    let compression = read_u32(reader)?;
    let _visibility_mask = read_u32(reader)?;
    let layer_count = read_u32(reader)?;

    if compression != 0 {
        return Err(TerrainError::UnsupportedCompression(compression));
    }
    if color_format != COLOR_FORMAT_RGBA {
        return Err(TerrainError::Format(format!(
            "unsupported color format {}",
            color_format
        )));
    }

    let mut layers = Vec::new();
    for _ in 0..layer_count {
        let [name_len] = read_bytes::<_, 1>(reader)?;
        let name_len = name_len as i8;
        if name_len < 0 {
            return Err(TerrainError::Format(format!(
                "negative layer name length {}",
                name_len
            )));
        }
        let mut name = vec![0u8; name_len as usize];
        reader.read_exact(&mut name).map_err(read_error)?;

        let size_x = read_u32(reader)?;
        let size_z = read_u32(reader)?;
        let size_y = read_u32(reader)?;
        let center_x = read_i32(reader)?;
        let center_z = read_i32(reader)?;
        let center_y = read_i32(reader)?;

        let size = UVec3::new(size_x, size_y, size_z);
        match voxel_count(size) {
            Some(0) => {
                return Err(TerrainError::Format(format!("layer of size {} is empty", size)));
            }
            Some(count) if count <= MAX_LAYER_VOXELS => {}
            _ => {
                return Err(TerrainError::Format(format!(
                    "layer of size {} exceeds {} voxels",
                    size, MAX_LAYER_VOXELS
                )));
            }
        }

        let (sx, sy, sz) = (size_x as usize, size_y as usize, size_z as usize);
        let mut colors = Array3::zeros((sx, sy, sz));

        for x in 0..sx {
            for z in 0..sz {
                for y in (0..sy).rev() {
                    let color = u32::from_be_bytes(read_bytes(reader)?);
                    // Zero alpha is an empty voxel.
                    if color & 0xff != 0 {
                        colors[[x, y, z]] = color;
                    }
                }
            }
        }

        layers.push(VoxelData {
            center: IVec3::new(center_x, center_y, center_z),
            colors,
        });
    }

    Ok(layers)
}

/// Write `data` as a single layer `.qb` stream.
pub fn write_qb_to<W: Write>(writer: &mut W, data: &VoxelData) -> Result<()> {
    for field in [
        VERSION,
        COLOR_FORMAT_RGBA,
        ORIENTATION_RIGHT_HANDED,
        0, // compression
        0, // visibility mask
        1, // layers
    ] {
        writer.write_all(&field.to_le_bytes())?;
    }

    writer.write_all(&[LAYER_NAME.len() as u8])?;
    writer.write_all(LAYER_NAME.as_bytes())?;

    let size = data.size();
    for value in [size.x, size.z, size.y] {
        writer.write_all(&value.to_le_bytes())?;
    }
    let center = data.center();
    for value in [center.x, center.z, center.y] {
        writer.write_all(&value.to_le_bytes())?;
    }

    let (sx, sy, sz) = data.colors.dim();
    for x in 0..sx {
        for z in 0..sz {
            for y in (0..sy).rev() {
                let mut color = data.colors[[x, y, z]];
                if color & 0xff != 0 {
                    color |= 0xff;
                }
                writer.write_all(&color.to_be_bytes())?;
            }
        }
    }

    Ok(())
}

/// Read every layer of a `.qb` file.
pub fn read_qb(path: impl AsRef<Path>) -> Result<Vec<VoxelData>> {
    let mut reader = BufReader::new(File::open(path)?);
    read_qb_from(&mut reader)
}

/// Write `data` to a `.qb` file, replacing it if it exists.
pub fn write_qb(path: impl AsRef<Path>, data: &VoxelData) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_qb_to(&mut writer, data)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::Terrain;
    use crate::test_utils::{flat_terrain, test_biome, BROWN, DIRT, STONE};
    use std::io::Cursor;

    fn sample() -> VoxelData {
        let mut colors = Array3::zeros((3, 2, 4));
        colors[[0, 0, 0]] = 0x112233ff;
        colors[[2, 1, 3]] = 0xaabbcc80;
        colors[[1, 0, 2]] = 0x44556600;
        VoxelData::from_colors(IVec3::new(1, -2, 3), colors)
    }

    #[test]
    fn test_header_layout() {
        let mut bytes = Vec::new();
        write_qb_to(&mut bytes, &sample()).unwrap();

        let header: Vec<u32> = bytes[..24]
            .chunks(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(header, vec![257, 0, 1, 0, 0, 1]);

        assert_eq!(bytes[24], 10);
        assert_eq!(&bytes[25..35], b"Main World");

        let size: Vec<u32> = bytes[35..47]
            .chunks(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(size, vec![3, 4, 2]);

        let voxels = 3 * 2 * 4;
        assert_eq!(bytes.len(), 59 + voxels * 4);

        // x = 0, z = 0, y descending: first (0, 1, 0) then (0, 0, 0).
        assert_eq!(&bytes[59..63], &[0, 0, 0, 0]);
        assert_eq!(&bytes[63..67], &[0x11, 0x22, 0x33, 0xff]);
    }

    #[test]
    fn test_read_back() {
        let mut bytes = Vec::new();
        write_qb_to(&mut bytes, &sample()).unwrap();

        let layers = read_qb_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(layers.len(), 1);

        let data = &layers[0];
        assert_eq!(data.size(), UVec3::new(3, 2, 4));
        assert_eq!(data.center(), IVec3::new(1, -2, 3));
        assert_eq!(data.color(IVec3::new(0, 0, 0)), 0x112233ff);
        // Partial alpha is forced opaque, zero alpha stays empty.
        assert_eq!(data.color(IVec3::new(2, 1, 3)), 0xaabbccff);
        assert_eq!(data.color(IVec3::new(1, 0, 2)), 0);
    }

    #[test]
    fn test_rejects_compression() {
        let mut bytes = Vec::new();
        for field in [257u32, 0, 1, 1, 0, 1] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }

        assert!(matches!(
            read_qb_from(&mut Cursor::new(bytes)),
            Err(TerrainError::UnsupportedCompression(1))
        ));
    }

    #[test]
    fn test_rejects_truncated_and_negative_name() {
        let mut bytes = Vec::new();
        write_qb_to(&mut bytes, &sample()).unwrap();

        let truncated = bytes[..bytes.len() - 3].to_vec();
        assert!(matches!(
            read_qb_from(&mut Cursor::new(truncated)),
            Err(TerrainError::Format(_))
        ));

        let mut negative = bytes.clone();
        negative[24] = 0xf0;
        assert!(matches!(
            read_qb_from(&mut Cursor::new(negative)),
            Err(TerrainError::Format(_))
        ));
    }

    fn header_with_size(size: [u32; 3]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [257u32, 0, 1, 0, 0, 1] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes.push(0);
        for value in size {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&[0; 12]);
        bytes
    }

    #[test]
    fn test_rejects_bad_layer_sizes() {
        for size in [
            [u32::MAX, u32::MAX, u32::MAX],
            [1 << 16, 1 << 16, 1 << 16],
            [4096, 4096, 4096],
            [0, 4, 4],
        ] {
            let result = read_qb_from(&mut Cursor::new(header_with_size(size)));
            assert!(matches!(result, Err(TerrainError::Format(_))), "{:?}", size);
        }

        let mut small = header_with_size([1, 1, 1]);
        small.extend_from_slice(&0x5a3a1fffu32.to_be_bytes());
        let layers = read_qb_from(&mut Cursor::new(small)).unwrap();
        assert_eq!(layers[0].color(IVec3::ZERO), 0x5a3a1fff);
    }

    #[test]
    fn test_voxel_data_dimension_mismatch() {
        let result = VoxelData::new(UVec3::new(2, 2, 2), IVec3::ZERO, vec![0; 7]);
        assert!(matches!(
            result,
            Err(TerrainError::DimensionMismatch {
                expected: 8,
                found: 7
            })
        ));

        let data = VoxelData::new(UVec3::new(2, 1, 3), IVec3::ZERO, (0..6).collect()).unwrap();
        assert_eq!(data.color(IVec3::new(1, 0, 2)), 5);
        assert_eq!(data.color(IVec3::new(2, 0, 0)), 0);
    }

    #[test]
    fn test_terrain_round_trip() {
        let mut terrain = flat_terrain(UVec3::new(20, 18, 12), 5);
        terrain.set_tile(IVec3::new(3, 4, 5), STONE, 1).unwrap();
        terrain.set_tile(IVec3::new(19, 17, 11), STONE, 0).unwrap();
        terrain.paint(IVec3::new(7, 7, 4), DIRT, 2).unwrap();

        let path = std::env::temp_dir().join(format!("voxel_terrain_{}.qb", std::process::id()));
        terrain.qb_save(&path).unwrap();
        let loaded = Terrain::from_qb(&path, test_biome()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.size(), terrain.size());
        let size = terrain.size().as_ivec3();
        for x in 0..size.x {
            for y in 0..size.y {
                for z in 0..size.z {
                    let pos = IVec3::new(x, y, z);
                    let a = terrain.get_tile(pos).unwrap();
                    let b = loaded.get_tile(pos).unwrap();
                    assert_eq!(
                        (a.material_id(), a.color_id()),
                        (b.material_id(), b.color_id()),
                        "at {}",
                        pos
                    );
                }
            }
        }

        assert_eq!(
            loaded.get_tile(IVec3::new(1, 1, 1)).unwrap().color_id(),
            BROWN
        );
        assert_eq!(loaded.num_node_groups(), terrain.num_node_groups());
    }

    #[test]
    fn test_debug_save_is_readable() {
        let terrain = flat_terrain(UVec3::new(16, 16, 8), 4);
        let path =
            std::env::temp_dir().join(format!("voxel_terrain_debug_{}.qb", std::process::id()));

        terrain.qb_save_debug(&path).unwrap();
        let layers = read_qb(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_ne!(layers[0].color(IVec3::new(3, 3, 4)), 0);
        assert_eq!(terrain.get_voxel(IVec3::new(3, 3, 4)), 0);
    }
}
