//! 高度包围盒（最小/最大高度）
//!
//! 两种模式：
//! - 全量：一次扫描全部角点（加载时或显式请求）
//! - 分摊：把角点区间切成 `pacing_period` 个窗口，每个模拟步扫描一个；
//!   扫完最后一个窗口后提交结果。周期开始时若高度图自上个周期起
//!   没有被修改，则整个周期跳过。

/// 扫描时的通道宽度
pub const LANES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightBounds {
    pub min: f32,
    pub max: f32,
}

impl HeightBounds {
    /// 空包围盒，任何值参与合并后都会替换它
    pub const EMPTY: Self = Self {
        min: f32::MAX,
        max: f32::MIN,
    };

    pub fn include(&mut self, h: f32) {
        self.min = self.min.min(h);
        self.max = self.max.max(h);
    }
}

impl Default for HeightBounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// 分通道最小/最大值规约
///
/// 按 `LANES` 宽度逐元素取 min/max，再把各通道折叠为标量，
/// 最后用标量循环处理不足一个通道宽度的尾部。min/max 满足结合律
/// 与交换律，结果与顺序标量扫描完全一致。
pub fn scan_min_max(values: &[f32], init: HeightBounds) -> HeightBounds {
    let mut lane_min = [init.min; LANES];
    let mut lane_max = [init.max; LANES];

    let chunks = values.chunks_exact(LANES);
    let tail = chunks.remainder();

    for chunk in chunks {
        for lane in 0..LANES {
            lane_min[lane] = lane_min[lane].min(chunk[lane]);
            lane_max[lane] = lane_max[lane].max(chunk[lane]);
        }
    }

    let mut bounds = init;
    for lane in 0..LANES {
        bounds.min = bounds.min.min(lane_min[lane]);
        bounds.max = bounds.max.max(lane_max[lane]);
    }

    for &h in tail {
        bounds.include(h);
    }

    bounds
}

/// 同步角点高度的包围盒跟踪
#[derive(Debug, Clone)]
pub struct BoundsTracker {
    pacing_period: u32,
    /// 加载时的包围盒
    init: HeightBounds,
    /// 已提交的包围盒
    current: HeightBounds,
    /// 进行中的分摊扫描结果
    pending: HeightBounds,
    processing: bool,
    modified: bool,
}

impl BoundsTracker {
    /// 用全量扫描初始化
    pub fn new(heights: &[f32], pacing_period: u32) -> Self {
        let bounds = scan_min_max(heights, HeightBounds::EMPTY);
        Self {
            pacing_period: pacing_period.max(1),
            init: bounds,
            current: bounds,
            pending: HeightBounds::EMPTY,
            processing: false,
            modified: false,
        }
    }

    pub fn init_bounds(&self) -> HeightBounds {
        self.init
    }

    pub fn current_bounds(&self) -> HeightBounds {
        self.current
    }

    pub fn pacing_period(&self) -> u32 {
        self.pacing_period
    }

    /// 是否有分摊扫描周期正在进行
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// 高度图被修改，下个周期需要重新扫描
    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    /// 立即全量扫描并提交
    pub fn update_full(&mut self, heights: &[f32]) {
        self.current = scan_min_max(heights, HeightBounds::EMPTY);
    }

    /// 每个模拟步调用一次，扫描第 `frame % pacing_period` 个窗口
    pub fn update_paced(&mut self, frame: u32, heights: &[f32]) {
        let period = self.pacing_period as usize;
        let window = (frame % self.pacing_period) as usize;

        if window == 0 {
            self.processing = self.modified;
            self.modified = false;
            self.pending = HeightBounds::EMPTY;
        }

        if !self.processing {
            return;
        }

        let len = heights.len();
        let begin = window * len / period;
        let end = (window + 1) * len / period;
        self.pending = scan_min_max(&heights[begin..end], self.pending);

        if window + 1 == period {
            self.current = self.pending;
            self.processing = false;
            log::trace!(
                "height bounds committed: [{}, {}]",
                self.current.min,
                self.current.max
            );
        }
    }
}
