//! 一致性层：校验和与存档差分
//!
//! 校验和用于多个模拟实例之间比对地形是否一致；差分存档只保存
//! 相对参考数据的按位异或结果，未改动的位置全部是零。

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

/// 顺序相关的轻量哈希，逐字节混入，不做最终混淆
///
/// 每一步对状态都是双射，因此单个字节的改变一定会改变结果。
pub fn lite_hash(bytes: &[u8], seed: u32) -> u32 {
    let mut hash = seed;
    for &b in bytes {
        hash = hash.wrapping_add(b as u32);
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash
}

/// 地形校验和：依次混入每个角点高度的位模式（小端），最后混入地图名
pub fn heightmap_checksum(heights: &[f32], map_name: &str) -> u32 {
    let checksum = heights
        .iter()
        .fold(0u32, |acc, h| lite_hash(&h.to_bits().to_le_bytes(), acc));
    lite_hash(map_name.as_bytes(), checksum)
}

/// 地形类型表中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainType {
    pub name: String,
    pub hardness: f32,
    pub tank_speed: f32,
    pub kbot_speed: f32,
    pub hover_speed: f32,
    pub ship_speed: f32,
}

impl Default for TerrainType {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            hardness: 1.0,
            tank_speed: 1.0,
            kbot_speed: 1.0,
            hover_speed: 1.0,
            ship_speed: 1.0,
        }
    }
}

/// 类型图校验和：类型图字节，然后每个地形类型的名字与移动参数
pub fn typemap_checksum(type_map: &[u8], terrain_types: &[TerrainType]) -> u32 {
    terrain_types
        .iter()
        .fold(lite_hash(type_map, 0), |acc, tt| {
            let acc = lite_hash(tt.name.as_bytes(), acc);
            [tt.hardness, tt.tank_speed, tt.kbot_speed, tt.hover_speed, tt.ship_speed]
                .iter()
                .fold(acc, |acc, v| lite_hash(&v.to_le_bytes(), acc))
        })
}

// ============================================================================
// 差分序列化
// ============================================================================

/// 双向序列化器：写时把值写出，读时把读到的值写回参数
pub trait DiffSerializer {
    fn is_writing(&self) -> bool;

    fn serialize_u32(&mut self, value: &mut u32) -> io::Result<()>;

    fn serialize_u8(&mut self, value: &mut u8) -> io::Result<()>;
}

/// 小端写出
pub struct DiffWriter<W: Write> {
    inner: W,
}

impl<W: Write> DiffWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> DiffSerializer for DiffWriter<W> {
    fn is_writing(&self) -> bool {
        true
    }

    fn serialize_u32(&mut self, value: &mut u32) -> io::Result<()> {
        self.inner.write_all(&value.to_le_bytes())
    }

    fn serialize_u8(&mut self, value: &mut u8) -> io::Result<()> {
        self.inner.write_all(&[*value])
    }
}

/// 小端读入
pub struct DiffReader<R: Read> {
    inner: R,
}

impl<R: Read> DiffReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> DiffSerializer for DiffReader<R> {
    fn is_writing(&self) -> bool {
        false
    }

    fn serialize_u32(&mut self, value: &mut u32) -> io::Result<()> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        *value = u32::from_le_bytes(buf);
        Ok(())
    }

    fn serialize_u8(&mut self, value: &mut u8) -> io::Result<()> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        *value = buf[0];
        Ok(())
    }
}

/// 高度差分：写时输出 `reference ^ target` 的位模式，读时把差分异或回 `target`
///
/// 读取前 `target` 的内容被忽略。
///
/// # Panics
/// 两个切片长度不同时 panic
pub fn serialize_height_diff<S: DiffSerializer>(
    s: &mut S,
    reference: &[f32],
    target: &mut [f32],
) -> io::Result<()> {
    assert_eq!(reference.len(), target.len(), "height diff length mismatch");

    let reference: &[u32] = bytemuck::cast_slice(reference);
    let target: &mut [u32] = bytemuck::cast_slice_mut(target);

    for (r, t) in reference.iter().zip(target.iter_mut()) {
        let mut diff = if s.is_writing() { r ^ *t } else { 0 };
        s.serialize_u32(&mut diff)?;
        if !s.is_writing() {
            *t = r ^ diff;
        }
    }
    Ok(())
}

/// 类型图差分，每格一个字节
pub fn serialize_type_diff<S: DiffSerializer>(
    s: &mut S,
    reference: &[u8],
    target: &mut [u8],
) -> io::Result<()> {
    assert_eq!(reference.len(), target.len(), "type map diff length mismatch");

    for (r, t) in reference.iter().zip(target.iter_mut()) {
        let mut diff = if s.is_writing() { r ^ *t } else { 0 };
        s.serialize_u8(&mut diff)?;
        if !s.is_writing() {
            *t = r ^ diff;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn sample_heights(n: usize) -> Vec<f32> {
        (0..n).map(|i| (i as f32 * 0.37).sin() * 100.0).collect()
    }

    #[test]
    fn test_checksum_is_reproducible() {
        let heights = sample_heights(81);
        assert_eq!(
            heightmap_checksum(&heights, "Ramp"),
            heightmap_checksum(&heights.clone(), "Ramp")
        );
        assert_ne!(
            heightmap_checksum(&heights, "Ramp"),
            heightmap_checksum(&heights, "Ramp2")
        );
    }

    #[test]
    fn test_checksum_detects_single_bit_flips() {
        let heights = sample_heights(33 * 33);
        let base = heightmap_checksum(&heights, "Flips");
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..200 {
            let mut flipped = heights.clone();
            let idx = rng.random_range(0..flipped.len());
            let bit = rng.random_range(0..32);
            flipped[idx] = f32::from_bits(flipped[idx].to_bits() ^ (1 << bit));
            assert_ne!(heightmap_checksum(&flipped, "Flips"), base, "collision at {idx}:{bit}");
        }
    }

    #[test]
    fn test_checksum_is_order_dependent() {
        let a = [1.0f32, 2.0];
        let b = [2.0f32, 1.0];
        assert_ne!(heightmap_checksum(&a, ""), heightmap_checksum(&b, ""));
    }

    #[test]
    fn test_typemap_checksum_folds_terrain_types() {
        let type_map = vec![0u8, 1, 1, 0];
        let mut types = vec![TerrainType::default()];
        let base = typemap_checksum(&type_map, &types);

        types[0].kbot_speed = 0.5;
        assert_ne!(typemap_checksum(&type_map, &types), base);
    }

    #[test]
    fn test_height_diff_round_trip() {
        let reference = sample_heights(50);
        let mut modified = reference.clone();
        modified[3] += 12.5;
        modified[49] = -0.0;

        let mut writer = DiffWriter::new(Vec::new());
        serialize_height_diff(&mut writer, &reference, &mut modified).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 50 * 4);

        let mut restored = vec![0.0; 50];
        let mut reader = DiffReader::new(bytes.as_slice());
        serialize_height_diff(&mut reader, &reference, &mut restored).unwrap();

        let bits = |v: &[f32]| v.iter().map(|h| h.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&restored), bits(&modified));
    }

    #[test]
    fn test_unchanged_diff_is_all_zero() {
        let reference = sample_heights(20);
        let mut target = reference.clone();
        let mut writer = DiffWriter::new(Vec::new());
        serialize_height_diff(&mut writer, &reference, &mut target).unwrap();
        assert!(writer.into_inner().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_type_diff_round_trip() {
        let reference = vec![0u8, 1, 2, 3];
        let mut current = vec![0u8, 7, 2, 255];

        let mut writer = DiffWriter::new(Vec::new());
        serialize_type_diff(&mut writer, &reference, &mut current).unwrap();
        let bytes = writer.into_inner();

        let mut restored = vec![0u8; 4];
        serialize_type_diff(&mut DiffReader::new(bytes.as_slice()), &reference, &mut restored)
            .unwrap();
        assert_eq!(restored, current);
    }

    #[test]
    fn test_truncated_stream_is_error() {
        let reference = vec![1.0f32; 4];
        let mut target = vec![0.0f32; 4];
        let mut reader = DiffReader::new(&[0u8; 6][..]);
        assert!(serialize_height_diff(&mut reader, &reference, &mut target).is_err());
    }
}
