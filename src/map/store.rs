//! 高度场存储
//!
//! 持有所有角点高度副本以及派生数组。派生数组只由管线重算，
//! 角点高度只由模拟层修改；表现副本只在 `sync_cosmetic_rect` 中写入。

use std::io;

use glam::Vec3;

use super::consistency::{serialize_height_diff, serialize_type_diff, DiffSerializer};
use super::dimensions::MapDimensions;
use super::rect::Rect;

/// 表现副本与同步副本的关系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaMode {
    /// 表现副本就是同步副本本身，不做拷贝
    Aliased,
    /// 表现副本是独立的一份拷贝，可以滞后于同步副本
    Distinct,
}

/// 表现（非同步）副本中带有独立拷贝的数组
#[derive(Debug, Clone)]
struct CosmeticReplica {
    corner_heights: Vec<f32>,
    face_normals: Vec<Vec3>,
    center_normals: Vec<Vec3>,
}

#[derive(Debug, Clone)]
enum Cosmetic {
    Aliased,
    Distinct(CosmeticReplica),
}

/// 交给派生几何管线的可变视图
///
/// 角点高度只读；其余每个切片只由一个阶段写入。
pub struct DerivedMut<'a> {
    pub corner_heights: &'a [f32],
    pub center_heights: &'a mut [f32],
    pub mip_heights: &'a mut [Vec<f32>],
    pub face_normals: &'a mut [Vec3],
    pub center_normals: &'a mut [Vec3],
    pub center_normals_2d: &'a mut [Vec3],
    pub slope_map: &'a mut [f32],
    /// 表现副本的 `(face_normals, center_normals)`，仅在独立拷贝模式下存在
    pub cosmetic_normals: Option<(&'a mut [Vec3], &'a mut [Vec3])>,
}

/// 高度场存储
#[derive(Debug, Clone)]
pub struct HeightFieldStore {
    dims: MapDimensions,

    /// 同步（权威）角点高度
    corner_heights: Vec<f32>,
    cosmetic: Cosmetic,
    /// 开局时的高度快照，存档差分的基准
    original_heights: Vec<f32>,
    /// 地图文件中的原始高度
    file_heights: Vec<f32>,

    center_heights: Vec<f32>,
    /// mip 第 1..N 层；第 0 层是 `center_heights`
    mip_heights: Vec<Vec<f32>>,

    /// 每个格子两个三角形面法线：[左上, 右下]
    face_normals: Vec<Vec3>,
    center_normals: Vec<Vec3>,
    center_normals_2d: Vec<Vec3>,
    /// 表现副本的顶点法线，每个角点一个
    vertex_normals: Vec<Vec3>,

    slope_map: Vec<f32>,
    type_map: Vec<u8>,
    file_type_map: Vec<u8>,
}

impl HeightFieldStore {
    /// 按固定尺寸分配所有数组
    ///
    /// 调用方负责保证 `corner_heights` 与 `type_map` 的长度与 `dims` 一致。
    pub fn new(
        dims: MapDimensions,
        corner_heights: Vec<f32>,
        type_map: Vec<u8>,
        mode: ReplicaMode,
        mip_levels: usize,
    ) -> Self {
        assert_eq!(corner_heights.len(), dims.corner_count());
        assert_eq!(type_map.len(), dims.half_count());

        let squares = dims.square_count();
        let mip_levels = mip_levels.clamp(1, dims.max_mip_levels());

        let mip_heights = (1..mip_levels)
            .map(|i| vec![0.0; ((dims.mapx >> i) * (dims.mapy >> i)) as usize])
            .collect();

        let cosmetic = match mode {
            ReplicaMode::Aliased => Cosmetic::Aliased,
            ReplicaMode::Distinct => Cosmetic::Distinct(CosmeticReplica {
                corner_heights: corner_heights.clone(),
                face_normals: vec![Vec3::Y; squares * 2],
                center_normals: vec![Vec3::Y; squares],
            }),
        };

        Self {
            dims,
            original_heights: corner_heights.clone(),
            file_heights: corner_heights.clone(),
            corner_heights,
            cosmetic,
            center_heights: vec![0.0; squares],
            mip_heights,
            face_normals: vec![Vec3::Y; squares * 2],
            center_normals: vec![Vec3::Y; squares],
            center_normals_2d: vec![Vec3::ZERO; squares],
            vertex_normals: vec![Vec3::Y; dims.corner_count()],
            slope_map: vec![0.0; dims.half_count()],
            file_type_map: type_map.clone(),
            type_map,
        }
    }

    pub fn dims(&self) -> &MapDimensions {
        &self.dims
    }

    pub fn mode(&self) -> ReplicaMode {
        match self.cosmetic {
            Cosmetic::Aliased => ReplicaMode::Aliased,
            Cosmetic::Distinct(_) => ReplicaMode::Distinct,
        }
    }

    // ========================================================================
    // 只读访问
    // ========================================================================

    /// 角点高度；`sync = false` 返回表现副本（别名模式下即同步副本）
    pub fn corner_heights(&self, sync: bool) -> &[f32] {
        match (&self.cosmetic, sync) {
            (Cosmetic::Distinct(replica), false) => &replica.corner_heights,
            _ => &self.corner_heights,
        }
    }

    pub fn corner_height(&self, x: i32, z: i32, sync: bool) -> f32 {
        self.corner_heights(sync)[self.dims.corner_index(x, z)]
    }

    pub fn original_heights(&self) -> &[f32] {
        &self.original_heights
    }

    pub fn file_heights(&self) -> &[f32] {
        &self.file_heights
    }

    /// 中心高度没有表现副本
    pub fn center_heights(&self) -> &[f32] {
        &self.center_heights
    }

    pub fn center_height(&self, x: i32, z: i32) -> f32 {
        self.center_heights[self.dims.square_index(x, z)]
    }

    /// mip 层数（含第 0 层）
    pub fn mip_levels(&self) -> usize {
        self.mip_heights.len() + 1
    }

    /// 第 `level` 层 mip，尺寸 `(mapx >> level) * (mapy >> level)`
    ///
    /// # Panics
    /// `level >= mip_levels()` 时 panic
    pub fn mip_level(&self, level: usize) -> &[f32] {
        assert!(
            level < self.mip_levels(),
            "mip level {level} out of range (have {})",
            self.mip_levels()
        );
        match level {
            0 => &self.center_heights,
            _ => &self.mip_heights[level - 1],
        }
    }

    pub fn face_normals(&self, sync: bool) -> &[Vec3] {
        match (&self.cosmetic, sync) {
            (Cosmetic::Distinct(replica), false) => &replica.face_normals,
            _ => &self.face_normals,
        }
    }

    pub fn center_normals(&self, sync: bool) -> &[Vec3] {
        match (&self.cosmetic, sync) {
            (Cosmetic::Distinct(replica), false) => &replica.center_normals,
            _ => &self.center_normals,
        }
    }

    pub fn center_normals_2d(&self) -> &[Vec3] {
        &self.center_normals_2d
    }

    pub fn vertex_normals(&self) -> &[Vec3] {
        &self.vertex_normals
    }

    /// 坡度图没有表现副本
    pub fn slope_map(&self) -> &[f32] {
        &self.slope_map
    }

    /// 半分辨率坐标 (hx, hz) 处的坡度
    pub fn slope(&self, hx: i32, hz: i32) -> f32 {
        assert!(
            (0..self.dims.hmapx).contains(&hx) && (0..self.dims.hmapy).contains(&hz),
            "slope cell ({hx}, {hz}) out of range"
        );
        self.slope_map[(hz * self.dims.hmapx + hx) as usize]
    }

    pub fn type_map(&self) -> &[u8] {
        &self.type_map
    }

    pub fn file_type_map(&self) -> &[u8] {
        &self.file_type_map
    }

    // ========================================================================
    // 可变访问（crate 内部）
    // ========================================================================

    pub(crate) fn corner_heights_mut(&mut self) -> &mut [f32] {
        &mut self.corner_heights
    }

    pub(crate) fn type_map_mut(&mut self) -> &mut [u8] {
        &mut self.type_map
    }

    /// 存档差分的三个部分，顺序固定
    pub(crate) fn serialize_diffs<S: DiffSerializer>(&mut self, s: &mut S) -> io::Result<()> {
        // 开局前的改动：地图文件 → 开局快照
        serialize_height_diff(s, &self.file_heights, &mut self.original_heights)?;
        // 对局中的改动：开局快照 → 同步副本
        serialize_height_diff(s, &self.original_heights, &mut self.corner_heights)?;
        serialize_type_diff(s, &self.file_type_map, &mut self.type_map)
    }

    pub(crate) fn derived_mut(&mut self) -> DerivedMut<'_> {
        let cosmetic_normals = match &mut self.cosmetic {
            Cosmetic::Aliased => None,
            Cosmetic::Distinct(replica) => Some((
                replica.face_normals.as_mut_slice(),
                replica.center_normals.as_mut_slice(),
            )),
        };

        DerivedMut {
            corner_heights: &self.corner_heights,
            center_heights: &mut self.center_heights,
            mip_heights: &mut self.mip_heights,
            face_normals: &mut self.face_normals,
            center_normals: &mut self.center_normals,
            center_normals_2d: &mut self.center_normals_2d,
            slope_map: &mut self.slope_map,
            cosmetic_normals,
        }
    }

    // ========================================================================
    // 表现副本同步
    // ========================================================================

    /// 把角点矩形内的同步数据拷入表现副本，并刷新其顶点法线
    ///
    /// 矩形是角点坐标；法线只拷贝四个角点都在矩形内的格子
    /// （右/下边界不含），否则会越过可见段进入相邻的视野格子。
    pub fn sync_cosmetic_rect(&mut self, rect: &Rect) {
        let dims = self.dims;
        let corners = rect.clamped(dims.mapx, dims.mapy);
        let squares = Rect::new(corners.x1, corners.z1, corners.x2 - 1, corners.z2 - 1);

        if let Cosmetic::Distinct(replica) = &mut self.cosmetic {
            for z in corners.z1..=corners.z2 {
                let row = (z * dims.mapxp1) as usize;
                let span = row + corners.x1 as usize..=row + corners.x2 as usize;
                replica.corner_heights[span.clone()].copy_from_slice(&self.corner_heights[span]);
            }

            // 零宽或零高的矩形没有完整的格子
            if squares.is_valid() {
                for z in squares.z1..=squares.z2 {
                    let row = (z * dims.mapx) as usize;
                    let span = row + squares.x1 as usize..=row + squares.x2 as usize;
                    replica.center_normals[span.clone()]
                        .copy_from_slice(&self.center_normals[span.clone()]);

                    let face_span = span.start() * 2..=span.end() * 2 + 1;
                    replica.face_normals[face_span.clone()]
                        .copy_from_slice(&self.face_normals[face_span]);
                }
            }
        }

        self.update_vertex_normals(&corners);
    }

    /// 整张图拷入表现副本
    pub fn copy_synced_to_unsynced(&mut self) {
        if let Cosmetic::Distinct(replica) = &mut self.cosmetic {
            replica.corner_heights.copy_from_slice(&self.corner_heights);
            replica.face_normals.copy_from_slice(&self.face_normals);
            replica.center_normals.copy_from_slice(&self.center_normals);
        }
        let dims = self.dims;
        self.update_vertex_normals(&Rect::new(0, 0, dims.mapx, dims.mapy));
    }

    /// 顶点法线 = 相邻格子所有面法线之和（归一化），基于表现副本
    fn update_vertex_normals(&mut self, corners: &Rect) {
        let dims = self.dims;
        let face_normals = match &self.cosmetic {
            Cosmetic::Distinct(replica) => &replica.face_normals,
            Cosmetic::Aliased => &self.face_normals,
        };

        for z in corners.z1..=corners.z2 {
            for x in corners.x1..=corners.x2 {
                let mut sum = Vec3::ZERO;

                for sz in (z - 1).max(0)..=z.min(dims.mapym1) {
                    for sx in (x - 1).max(0)..=x.min(dims.mapxm1) {
                        let idx = ((sz * dims.mapx + sx) * 2) as usize;
                        sum += face_normals[idx] + face_normals[idx + 1];
                    }
                }

                self.vertex_normals[(z * dims.mapxp1 + x) as usize] = sum.normalize_or_zero();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(mode: ReplicaMode) -> HeightFieldStore {
        let dims = MapDimensions::new(4, 4).unwrap();
        let heights = (0..dims.corner_count()).map(|i| i as f32).collect();
        HeightFieldStore::new(dims, heights, vec![0; dims.half_count()], mode, 7)
    }

    #[test]
    fn test_aliased_returns_synced_storage() {
        let mut s = store(ReplicaMode::Aliased);
        s.corner_heights_mut()[3] = 42.0;
        assert_eq!(s.corner_heights(false)[3], 42.0);
        assert!(std::ptr::eq(s.corner_heights(false), s.corner_heights(true)));
    }

    #[test]
    fn test_distinct_lags_until_synced() {
        let mut s = store(ReplicaMode::Distinct);
        s.corner_heights_mut()[6] = -5.0;
        assert_eq!(s.corner_height(1, 1, true), -5.0);
        assert_eq!(s.corner_height(1, 1, false), 6.0);

        s.sync_cosmetic_rect(&Rect::new(0, 0, 2, 2));
        assert_eq!(s.corner_height(1, 1, false), -5.0);
    }

    #[test]
    fn test_sync_rect_excludes_far_edge_squares() {
        let mut s = store(ReplicaMode::Distinct);
        let tilted = Vec3::new(1.0, 1.0, 0.0).normalize();
        for n in s.derived_mut().face_normals.iter_mut() {
            *n = tilted;
        }

        // 角点 [1, 3] 只完整覆盖格子 1 和 2
        s.sync_cosmetic_rect(&Rect::new(1, 1, 3, 2));
        let cosmetic = s.face_normals(false);
        let at = |x: usize, z: usize| cosmetic[(z * 4 + x) * 2];
        assert_eq!(at(1, 1), tilted);
        assert_eq!(at(2, 1), tilted);
        assert_eq!(at(3, 1), Vec3::Y);
        assert_eq!(at(1, 2), Vec3::Y);
        assert_eq!(at(0, 1), Vec3::Y);
    }

    #[test]
    fn test_mip_levels_clamped_to_map() {
        let s = store(ReplicaMode::Aliased);
        assert_eq!(s.mip_levels(), 3);
        assert_eq!(s.mip_level(1).len(), 4);
        assert_eq!(s.mip_level(2).len(), 1);
    }

    #[test]
    fn test_diff_sections_round_trip() {
        use crate::map::consistency::{DiffReader, DiffWriter};

        let mut s = store(ReplicaMode::Distinct);
        s.corner_heights_mut()[7] = 100.0;
        s.type_map_mut()[2] = 9;

        let mut writer = DiffWriter::new(Vec::new());
        s.serialize_diffs(&mut writer).unwrap();
        let bytes = writer.into_inner();
        // 两段高度差分 + 一段类型图差分
        assert_eq!(bytes.len(), 25 * 4 * 2 + 4);

        let mut restored = store(ReplicaMode::Distinct);
        restored
            .serialize_diffs(&mut DiffReader::new(bytes.as_slice()))
            .unwrap();
        assert_eq!(restored.corner_heights(true), s.corner_heights(true));
        assert_eq!(restored.type_map(), s.type_map());
        assert_eq!(restored.original_heights(), s.original_heights());
    }

    #[test]
    #[should_panic]
    fn test_corner_out_of_range_panics() {
        store(ReplicaMode::Aliased).corner_height(5, 0, true);
    }
}
