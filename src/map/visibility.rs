//! 可见性门控复制
//!
//! 同步更新结束后，变化区域如何进入表现副本由 [`Replication`] 决定：
//! - [`DirectReplication`]: 原样入队
//! - [`GatedReplication`]: 按视野格子拆分，只把当前可见且自上次访问后
//!   有变化的格子入队，其余延后到格子变为可见时再同步
//!
//! 视野格子的变化通过摘要计数器（同步/非同步各一个 `u8`）判断，
//! 计数器溢出回绕是预期行为。

use super::dimensions::MapDimensions;
use super::pipeline::UpdateRects;
use super::rect::Rect;
use super::update_queue::UpdateQueue;
use crate::config::ReplicationConfig;

/// 复制策略，构造时选定，之后不再切换
pub trait Replication: Send {
    fn is_gated(&self) -> bool;

    /// 一次非初始化的同步更新完成后调用
    fn propagate(&mut self, rects: &UpdateRects, queue: &mut UpdateQueue);

    /// 角点矩形内的视野发生变化（进入视野、成为观战者），重新检查
    fn recheck(&mut self, corner_rect: &Rect, queue: &mut UpdateQueue);

    fn visibility(&self) -> Option<&Visibility> {
        None
    }

    fn visibility_mut(&mut self) -> Option<&mut Visibility> {
        None
    }
}

/// 按配置构建复制策略
pub fn build_replication(config: &ReplicationConfig, dims: &MapDimensions) -> Box<dyn Replication> {
    match *config {
        ReplicationConfig::Direct => Box::new(DirectReplication),
        ReplicationConfig::Gated {
            los_square_size,
            use_digests,
        } => Box::new(GatedReplication::new(dims, los_square_size, use_digests)),
    }
}

/// 不做任何过滤
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectReplication;

impl Replication for DirectReplication {
    fn is_gated(&self) -> bool {
        false
    }

    fn propagate(&mut self, rects: &UpdateRects, queue: &mut UpdateQueue) {
        queue.push(rects.corner);
    }

    fn recheck(&mut self, _corner_rect: &Rect, _queue: &mut UpdateQueue) {}
}

/// 观察者当前能看到哪些视野格子
///
/// 由外部协作者每个相关 tick 写入。
#[derive(Debug, Clone)]
pub struct Visibility {
    size_x: i32,
    size_z: i32,
    visible: Vec<bool>,
    full_view: bool,
}

impl Visibility {
    pub fn new(size_x: i32, size_z: i32) -> Self {
        Self {
            size_x,
            size_z,
            visible: vec![false; (size_x * size_z) as usize],
            full_view: false,
        }
    }

    /// 视野格子列数与行数
    pub fn size(&self) -> (i32, i32) {
        (self.size_x, self.size_z)
    }

    /// 超出网格的坐标（角点矩形的右/下边界）钳制到最近的格子
    pub fn is_visible(&self, lmx: i32, lmz: i32) -> bool {
        if self.full_view {
            return true;
        }
        let x = lmx.clamp(0, self.size_x - 1);
        let z = lmz.clamp(0, self.size_z - 1);
        self.visible[(z * self.size_x + x) as usize]
    }

    pub fn set_visible(&mut self, lmx: i32, lmz: i32, visible: bool) {
        assert!(
            (0..self.size_x).contains(&lmx) && (0..self.size_z).contains(&lmz),
            "visibility cell ({lmx}, {lmz}) out of range"
        );
        self.visible[(lmz * self.size_x + lmx) as usize] = visible;
    }

    pub fn set_all(&mut self, visible: bool) {
        self.visible.fill(visible);
    }

    /// 整体替换可见性，长度必须等于 `size_x * size_z`
    pub fn copy_from(&mut self, visible: &[bool]) {
        self.visible.copy_from_slice(visible);
    }

    /// 观战者全图视野
    pub fn full_view(&self) -> bool {
        self.full_view
    }

    pub fn set_full_view(&mut self, full_view: bool) {
        self.full_view = full_view;
    }
}

/// 按视野过滤的复制
#[derive(Debug, Clone)]
pub struct GatedReplication {
    /// 一个视野格子覆盖的高度图格子数（边长）
    los_square_size: i32,
    use_digests: bool,
    visibility: Visibility,
    /// `(size_x + 1) * (size_z + 1)`，多出的一行一列对应地图右/下边界的角点
    synced_digests: Vec<u8>,
    unsynced_digests: Vec<u8>,
}

impl GatedReplication {
    pub fn new(dims: &MapDimensions, los_square_size: u32, use_digests: bool) -> Self {
        assert!(los_square_size > 0, "visibility cell size must be positive");
        let s = los_square_size as i32;
        let size_x = (dims.mapx + s - 1) / s;
        let size_z = (dims.mapy + s - 1) / s;
        let digest_len = ((size_x + 1) * (size_z + 1)) as usize;

        Self {
            los_square_size: s,
            use_digests,
            visibility: Visibility::new(size_x, size_z),
            synced_digests: vec![0; digest_len],
            unsynced_digests: vec![0; digest_len],
        }
    }

    pub fn los_square_size(&self) -> i32 {
        self.los_square_size
    }

    fn digest_index(&self, lmx: i32, lmz: i32) -> usize {
        let (size_x, _) = self.visibility.size();
        (lmz * (size_x + 1) + lmx) as usize
    }

    /// 高度变化：递增中心矩形覆盖的视野格子的同步摘要
    fn record_change(&mut self, center_rect: &Rect) {
        if !self.use_digests {
            return;
        }
        let los_rect = center_rect.divided(self.los_square_size);
        for lmz in los_rect.z1..=los_rect.z2 {
            for lmx in los_rect.x1..=los_rect.x2 {
                let idx = self.digest_index(lmx, lmz);
                self.synced_digests[idx] = self.synced_digests[idx].wrapping_add(1);
            }
        }
    }

    /// 自上次访问后是否有变化；访问即把非同步摘要追平
    fn has_view_changed(&mut self, lmx: i32, lmz: i32) -> bool {
        if !self.use_digests {
            return true;
        }
        let idx = self.digest_index(lmx, lmz);
        if self.unsynced_digests[idx] != self.synced_digests[idx] {
            self.unsynced_digests[idx] = self.synced_digests[idx];
            return true;
        }
        false
    }

    /// 把角点矩形按视野格子拆分，连续的可见且有变化的格子合并成一段
    fn split_visible(&mut self, corner_rect: &Rect, queue: &mut UpdateQueue) {
        let s = self.los_square_size;
        let los_rect = corner_rect.divided(s);

        for lmz in los_rect.z1..=los_rect.z2 {
            let hmz = lmz * s;
            let mut hmx = los_rect.x1 * s;
            let mut run = Rect::new(hmx, hmz, hmx, hmz + s);

            for lmx in los_rect.x1..=los_rect.x2 {
                hmx = lmx * s;

                if !self.visibility.is_visible(lmx, lmz) || !self.has_view_changed(lmx, lmz) {
                    flush_run(&mut run, corner_rect, hmx, hmz, s, queue);
                    continue;
                }

                run.x2 = hmx + s;
            }

            flush_run(&mut run, corner_rect, hmx, hmz, s, queue);
        }
    }
}

/// 输出当前段（裁剪到原始矩形内），并把段起点移到 `hmx` 所在格子之后
fn flush_run(run: &mut Rect, bounds: &Rect, hmx: i32, hmz: i32, s: i32, queue: &mut UpdateQueue) {
    if run.area() > 0 {
        let mut clipped = *run;
        clipped.clamp_in(bounds);
        if clipped.area() > 0 {
            queue.push(clipped);
        }
        *run = Rect::new(hmx + s, hmz, hmx + s, hmz + s);
    } else {
        run.x1 = hmx + s;
        run.x2 = hmx + s;
    }
}

impl Replication for GatedReplication {
    fn is_gated(&self) -> bool {
        true
    }

    fn propagate(&mut self, rects: &UpdateRects, queue: &mut UpdateQueue) {
        self.record_change(&rects.center);
        self.split_visible(&rects.corner, queue);
    }

    fn recheck(&mut self, corner_rect: &Rect, queue: &mut UpdateQueue) {
        self.split_visible(corner_rect, queue);
    }

    fn visibility(&self) -> Option<&Visibility> {
        Some(&self.visibility)
    }

    fn visibility_mut(&mut self) -> Option<&mut Visibility> {
        Some(&mut self.visibility)
    }
}
