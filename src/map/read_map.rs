//! 高度图上下文
//!
//! `ReadMap` 持有一张地图的全部状态：尺寸、副本存储、派生数据、
//! 脏矩形队列、复制策略、包围盒与校验和。模拟层通过它修改高度并触发
//! 同步重算；渲染层每帧调用 [`ReadMap::update_draw`] 把变化同步到
//! 表现副本并通知观察者。

use std::io::{Read, Write};
use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::bounds::{BoundsTracker, HeightBounds};
use super::consistency::{
    heightmap_checksum, typemap_checksum, DiffReader, DiffSerializer, DiffWriter, TerrainType,
};
use super::dimensions::MapDimensions;
use super::observer::{HeightMapObserver, ObserverId, Observers};
use super::pipeline::{self, UpdateRects};
use super::rect::Rect;
use super::store::{HeightFieldStore, ReplicaMode};
use super::update_queue::UpdateQueue;
use super::visibility::{build_replication, Replication, Visibility};
use crate::config::{HeightMapConfig, ReplicationConfig};
use crate::error::{HeightMapError, HeightMapResult};

/// 存档头魔数 "HMDF"
const STATE_MAGIC: u32 = u32::from_le_bytes(*b"HMDF");
const STATE_VERSION: u32 = 1;

/// 加载器交给高度图的原始数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapSource {
    /// 地图名，参与校验和
    pub name: String,
    /// 地图文件名，用于格式判断
    pub file_name: String,
    /// 格子列数
    pub width: u32,
    /// 格子行数
    pub height: u32,
    /// `(width + 1) * (height + 1)` 个角点高度，行优先
    pub corner_heights: Vec<f32>,
    /// `(width / 2) * (height / 2)` 个地形类型索引
    pub type_map: Option<Vec<u8>>,
    pub terrain_types: Vec<TerrainType>,
}

impl MapSource {
    pub fn new(name: &str, width: u32, height: u32, corner_heights: Vec<f32>) -> Self {
        Self {
            name: name.to_string(),
            file_name: format!("{name}.smf"),
            width,
            height,
            corner_heights,
            type_map: None,
            terrain_types: vec![TerrainType::default()],
        }
    }

    pub fn with_type_map(mut self, type_map: Vec<u8>) -> Self {
        self.type_map = Some(type_map);
        self
    }

    pub fn with_terrain_types(mut self, terrain_types: Vec<TerrainType>) -> Self {
        self.terrain_types = terrain_types;
        self
    }

    pub fn with_file_name(mut self, file_name: &str) -> Self {
        self.file_name = file_name.to_string();
        self
    }
}

/// 高度图上下文
pub struct ReadMap {
    name: String,
    config: HeightMapConfig,
    dims: MapDimensions,
    store: HeightFieldStore,
    queue: UpdateQueue,
    replication: Box<dyn Replication>,
    observers: Observers,
    bounds: BoundsTracker,
    terrain_types: Vec<TerrainType>,
    /// 加载时计算的校验和
    map_checksum: u32,
    /// `None` 时使用 rayon 全局线程池
    pool: Option<rayon::ThreadPool>,
}

impl ReadMap {
    // ========================================================================
    // 加载
    // ========================================================================

    /// 校验原始数据并构建完整的高度图
    ///
    /// 任何校验失败都直接返回错误，不会产生半初始化的地图。
    pub fn load(source: MapSource, config: HeightMapConfig) -> HeightMapResult<Self> {
        let MapSource {
            name,
            file_name,
            width,
            height,
            corner_heights,
            type_map,
            terrain_types,
        } = source;

        let is_sm3 = Path::new(&file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sm3"));
        if is_sm3 {
            return Err(HeightMapError::UnsupportedFormat(format!(
                "{file_name}: SM3 maps are no longer supported"
            )));
        }

        if let ReplicationConfig::Gated { los_square_size: 0, .. } = config.replication {
            return Err(HeightMapError::InvalidConfig(
                "visibility cell size must be positive".to_string(),
            ));
        }

        let dims = MapDimensions::new(width, height)?;

        if corner_heights.len() != dims.corner_count() {
            return Err(HeightMapError::HeightBufferSize {
                expected: dims.corner_count(),
                actual: corner_heights.len(),
            });
        }
        if let Some(index) = corner_heights.iter().position(|h| !h.is_finite()) {
            return Err(HeightMapError::NonFiniteHeight { index });
        }

        let type_map = match type_map {
            Some(type_map) if type_map.len() != dims.half_count() => {
                return Err(HeightMapError::TypeMapSize {
                    expected: dims.half_count(),
                    actual: type_map.len(),
                });
            }
            Some(type_map) => type_map,
            None => {
                log::warn!(
                    "missing typemap for \"{}\" (dims=<{},{}>), using type 0 everywhere",
                    name,
                    dims.hmapx,
                    dims.hmapy
                );
                vec![0; dims.half_count()]
            }
        };

        let mode = match config.replication {
            ReplicationConfig::Direct => ReplicaMode::Aliased,
            ReplicationConfig::Gated { .. } => ReplicaMode::Distinct,
        };

        log::info!(
            "Loading map \"{}\" {}x{} ({} MB, {:?} replica)",
            name,
            dims.mapx,
            dims.mapy,
            memory_footprint(&dims, mode, config.mip_levels) / (1024 * 1024),
            mode
        );

        let pool = match config.worker_threads {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("heightmap-{i}"))
                    .build()?,
            ),
        };

        let store = HeightFieldStore::new(dims, corner_heights, type_map, mode, config.mip_levels);
        let bounds = BoundsTracker::new(store.corner_heights(true), config.bounds_pacing_period);
        let map_checksum = heightmap_checksum(store.corner_heights(true), &name);
        let replication = build_replication(&config.replication, &dims);

        let mut map = Self {
            name,
            config,
            dims,
            store,
            queue: UpdateQueue::new(),
            replication,
            observers: Observers::default(),
            bounds,
            terrain_types,
            map_checksum,
            pool,
        };

        map.update_synced(&map.full_rect());

        let init = map.bounds.init_bounds();
        log::info!(
            "map \"{}\" ready: heights [{:.1}, {:.1}], checksum {:#010x}",
            map.name,
            init.min,
            init.max,
            map.map_checksum
        );

        Ok(map)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HeightMapConfig {
        &self.config
    }

    pub fn dims(&self) -> &MapDimensions {
        &self.dims
    }

    pub fn store(&self) -> &HeightFieldStore {
        &self.store
    }

    pub fn terrain_types(&self) -> &[TerrainType] {
        &self.terrain_types
    }

    /// 覆盖整张图的角点矩形
    pub fn full_rect(&self) -> Rect {
        Rect::new(0, 0, self.dims.mapx, self.dims.mapy)
    }

    // ========================================================================
    // 查询
    // ========================================================================

    pub fn corner_heights(&self, sync: bool) -> &[f32] {
        self.store.corner_heights(sync)
    }

    pub fn corner_height(&self, x: i32, z: i32, sync: bool) -> f32 {
        self.store.corner_height(x, z, sync)
    }

    pub fn original_heights(&self) -> &[f32] {
        self.store.original_heights()
    }

    pub fn center_heights(&self) -> &[f32] {
        self.store.center_heights()
    }

    pub fn center_height(&self, x: i32, z: i32) -> f32 {
        self.store.center_height(x, z)
    }

    pub fn mip_levels(&self) -> usize {
        self.store.mip_levels()
    }

    pub fn mip_level(&self, level: usize) -> &[f32] {
        self.store.mip_level(level)
    }

    pub fn face_normals(&self, sync: bool) -> &[Vec3] {
        self.store.face_normals(sync)
    }

    pub fn center_normals(&self, sync: bool) -> &[Vec3] {
        self.store.center_normals(sync)
    }

    pub fn center_normals_2d(&self) -> &[Vec3] {
        self.store.center_normals_2d()
    }

    pub fn vertex_normals(&self) -> &[Vec3] {
        self.store.vertex_normals()
    }

    pub fn slope_map(&self) -> &[f32] {
        self.store.slope_map()
    }

    pub fn slope(&self, hx: i32, hz: i32) -> f32 {
        self.store.slope(hx, hz)
    }

    pub fn type_map(&self) -> &[u8] {
        self.store.type_map()
    }

    // ========================================================================
    // 修改（仅模拟层）
    // ========================================================================

    /// 修改同步角点高度；派生数据要等调用 `update_synced` 后才会更新
    pub fn set_height(&mut self, x: i32, z: i32, height: f32) {
        let idx = self.dims.corner_index(x, z);
        self.store.corner_heights_mut()[idx] = height;
        self.bounds.mark_modified();
    }

    pub fn add_height(&mut self, x: i32, z: i32, delta: f32) {
        let idx = self.dims.corner_index(x, z);
        self.store.corner_heights_mut()[idx] += delta;
        self.bounds.mark_modified();
    }

    /// 对角点矩形（含边界）内的每个角点调用 `f(x, z, &mut height)`
    pub fn adjust_heights<F>(&mut self, rect: &Rect, mut f: F)
    where
        F: FnMut(i32, i32, &mut f32),
    {
        self.assert_corner_rect(rect);
        let stride = self.dims.mapxp1;
        let heights = self.store.corner_heights_mut();

        for z in rect.z1..=rect.z2 {
            for x in rect.x1..=rect.x2 {
                f(x, z, &mut heights[(z * stride + x) as usize]);
            }
        }
        self.bounds.mark_modified();
    }

    /// 修改半分辨率坐标处的地形类型
    pub fn set_type(&mut self, hx: i32, hz: i32, terrain_type: u8) {
        assert!(
            (0..self.dims.hmapx).contains(&hx) && (0..self.dims.hmapy).contains(&hz),
            "type map cell ({hx}, {hz}) out of range"
        );
        let idx = (hz * self.dims.hmapx + hx) as usize;
        self.store.type_map_mut()[idx] = terrain_type;
    }

    // ========================================================================
    // 同步更新与表现副本
    // ========================================================================

    /// 角点矩形内的高度已修改，重算派生数据并把变化交给复制策略
    ///
    /// 覆盖整张图的矩形视为初始化：直接入队，不经可见性过滤。
    ///
    /// # Panics
    /// 矩形翻转或超出 `[0, mapx] x [0, mapy]` 时 panic
    pub fn update_synced(&mut self, rect: &Rect) {
        self.assert_corner_rect(rect);

        let dims = self.dims;
        let initialize = *rect == self.full_rect();
        let rects = UpdateRects::from_changed(&dims, rect);
        let chunking = self.config.row_chunking;
        let derived = self.store.derived_mut();

        match &self.pool {
            Some(pool) => pool.install(|| {
                pipeline::recompute(&dims, derived, &rects.center, initialize, &chunking)
            }),
            None => pipeline::recompute(&dims, derived, &rects.center, initialize, &chunking),
        }

        if initialize {
            self.queue.push(rects.corner);
        } else {
            self.replication.propagate(&rects, &mut self.queue);
        }
    }

    /// 每帧调用：取出至多 `max_updates_per_frame` 个矩形同步到表现副本，
    /// 全部同步完成后再依次通知观察者。返回处理的矩形数。
    pub fn update_draw(&mut self) -> usize {
        if self.queue.is_empty() {
            return 0;
        }

        let batch = self.queue.pop_batch(self.config.max_updates_per_frame);

        for rect in &batch {
            self.store.sync_cosmetic_rect(rect);
        }
        for rect in &batch {
            self.observers.notify(rect);
        }

        log::debug!(
            "synced {} height map rects to cosmetic replica, {} pending",
            batch.len(),
            self.queue.len()
        );
        batch.len()
    }

    /// 尚未同步到表现副本的矩形
    pub fn pending_updates(&self) -> &UpdateQueue {
        &self.queue
    }

    pub fn add_observer<O>(&mut self, observer: O) -> ObserverId
    where
        O: HeightMapObserver + 'static,
    {
        self.observers.add(Box::new(observer))
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// 强制把整张图同步到表现副本并通知观察者
    pub fn copy_synced_to_unsynced(&mut self) {
        self.store.copy_synced_to_unsynced();
        let full = self.full_rect();
        self.observers.notify(&full);
    }

    // ========================================================================
    // 视野
    // ========================================================================

    pub fn is_gated(&self) -> bool {
        self.replication.is_gated()
    }

    /// 门控复制时的视野表；直接复制时为 `None`
    pub fn visibility(&self) -> Option<&Visibility> {
        self.replication.visibility()
    }

    pub fn visibility_mut(&mut self) -> Option<&mut Visibility> {
        self.replication.visibility_mut()
    }

    /// 角点矩形所在的视野格子刚进入视野
    pub fn update_los(&mut self, rect: &Rect) {
        if self.visibility().is_some_and(Visibility::full_view) {
            return;
        }
        self.assert_corner_rect(rect);
        self.replication.recheck(rect, &mut self.queue);
    }

    /// 切换到全图视野并重新检查整张图
    pub fn become_spectator(&mut self) {
        if let Some(visibility) = self.replication.visibility_mut() {
            visibility.set_full_view(true);
        }
        let full = self.full_rect();
        self.replication.recheck(&full, &mut self.queue);
    }

    // ========================================================================
    // 包围盒与水面
    // ========================================================================

    /// 每个模拟步调用一次
    pub fn update_height_bounds_paced(&mut self, sync_frame: u32) {
        self.bounds
            .update_paced(sync_frame, self.store.corner_heights(true));
    }

    /// 立即全量重算
    pub fn update_height_bounds(&mut self) {
        self.bounds.update_full(self.store.corner_heights(true));
    }

    pub fn curr_height_bounds(&self) -> HeightBounds {
        self.bounds.current_bounds()
    }

    pub fn init_height_bounds(&self) -> HeightBounds {
        self.bounds.init_bounds()
    }

    pub fn is_above_water(&self) -> bool {
        self.curr_height_bounds().min > 0.0
    }

    pub fn is_under_water(&self) -> bool {
        self.curr_height_bounds().max < 0.0
    }

    pub fn has_visible_water(&self) -> bool {
        !self.config.void_water && !self.is_above_water()
    }

    pub fn has_only_void_water(&self) -> bool {
        self.config.void_water && self.is_under_water()
    }

    pub fn bounding_radius(&self) -> f32 {
        self.dims.bounding_radius()
    }

    // ========================================================================
    // 校验和与存档
    // ========================================================================

    /// 加载时的校验和
    pub fn map_checksum(&self) -> u32 {
        self.map_checksum
    }

    /// 当前同步高度的校验和
    pub fn calc_heightmap_checksum(&self) -> u32 {
        heightmap_checksum(self.store.corner_heights(true), &self.name)
    }

    pub fn calc_typemap_checksum(&self) -> u32 {
        typemap_checksum(self.store.type_map(), &self.terrain_types)
    }

    /// 写出存档：头部 + 开局前差分 + 对局中差分 + 类型图差分
    pub fn save_state<W: Write>(&mut self, writer: W) -> HeightMapResult<()> {
        let mut s = DiffWriter::new(writer);
        serialize_header(&mut s, &self.dims)?;
        self.store.serialize_diffs(&mut s)?;
        Ok(())
    }

    /// 读入存档并重建全部派生数据
    ///
    /// 读取失败时地图保持不变。
    pub fn load_state<R: Read>(&mut self, reader: R) -> HeightMapResult<()> {
        let mut s = DiffReader::new(reader);
        serialize_header(&mut s, &self.dims)?;

        let mut store = self.store.clone();
        store.serialize_diffs(&mut s)?;
        self.store = store;

        self.post_load();
        Ok(())
    }

    fn post_load(&mut self) {
        self.queue.clear();
        self.update_synced(&self.full_rect());
        self.store.copy_synced_to_unsynced();
        self.bounds.update_full(self.store.corner_heights(true));
        self.bounds.mark_modified();
        log::info!(
            "restored height map state for \"{}\", checksum {:#010x}",
            self.name,
            self.calc_heightmap_checksum()
        );
    }

    fn assert_corner_rect(&self, rect: &Rect) {
        assert!(
            rect.is_valid() && self.full_rect().contains_rect(rect),
            "corner rectangle {rect} outside map {}",
            self.full_rect()
        );
    }
}

/// 写时输出头部，读时校验头部与当前地图是否匹配
fn serialize_header<S: DiffSerializer>(s: &mut S, dims: &MapDimensions) -> HeightMapResult<()> {
    let expected = [STATE_MAGIC, STATE_VERSION, dims.mapx as u32, dims.mapy as u32];
    let mut header = expected;
    for value in &mut header {
        s.serialize_u32(value)?;
    }

    if header[0] != STATE_MAGIC {
        return Err(HeightMapError::state_mismatch("bad magic"));
    }
    if header[1] != STATE_VERSION {
        return Err(HeightMapError::state_mismatch(format!(
            "unsupported version {}",
            header[1]
        )));
    }
    if header[2..] != expected[2..] {
        return Err(HeightMapError::state_mismatch(format!(
            "saved for a {}x{} map, current map is {}x{}",
            header[2], header[3], dims.mapx, dims.mapy
        )));
    }
    Ok(())
}

/// 估算全部数组占用的字节数
fn memory_footprint(dims: &MapDimensions, mode: ReplicaMode, mip_levels: usize) -> usize {
    let f32_size = std::mem::size_of::<f32>();
    let vec3_size = std::mem::size_of::<Vec3>();
    let corners = dims.corner_count();
    let squares = dims.square_count();
    let halves = dims.half_count();

    let mip: usize = (1..mip_levels.clamp(1, dims.max_mip_levels()))
        .map(|i| ((dims.mapx >> i) * (dims.mapy >> i)) as usize)
        .sum();

    // 同步、文件、开局三份角点高度 + 顶点法线
    let mut bytes = corners * 3 * f32_size + corners * vec3_size;
    // 中心高度、mip、坡度、类型图（两份）
    bytes += (squares + mip + halves) * f32_size + halves * 2;
    // 面法线 x2、中心法线、二维中心法线
    bytes += squares * 4 * vec3_size;

    if mode == ReplicaMode::Distinct {
        bytes += corners * f32_size + squares * 3 * vec3_size;
    }
    bytes
}
