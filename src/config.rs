use serde::{Deserialize, Serialize};

use crate::error::HeightMapResult;

/// 每秒模拟步数，默认的包围盒分摊周期
pub const SIM_STEPS_PER_SECOND: u32 = 30;

/// 每帧最多同步到表现副本的矩形数
pub const MAX_UPDATES_PER_FRAME: usize = 128;

/// 默认 mip 层数（含第 0 层，即中心高度图）
pub const NUM_HEIGHT_MIP_MAPS: usize = 7;

/// 同步副本的变化如何到达表现副本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationConfig {
    /// 每次同步更新原样入队；表现副本即同步副本
    Direct,
    /// 按观察者视野过滤更新；表现副本是独立拷贝
    Gated {
        /// 一个视野格子的边长（高度图格子数）
        los_square_size: u32,
        /// 跳过自上次访问后摘要未变化的可见格子
        use_digests: bool,
    },
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::Direct
    }
}

/// 管线各阶段每个任务的最小工作量
///
/// 单位是格子数，管线会换算成整行。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowChunking {
    pub center_cells: usize,
    pub normal_cells: usize,
    pub slope_cells: usize,
}

impl Default for RowChunking {
    fn default() -> Self {
        Self {
            center_cells: 256,
            normal_cells: 64,
            slope_cells: 128,
        }
    }
}

impl RowChunking {
    /// 按行宽换算每个任务至少处理的行数
    pub fn min_rows(cells: usize, row_width: usize) -> usize {
        (cells / row_width.max(1)).max(1)
    }
}

/// 高度图运行配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightMapConfig {
    /// 表现副本的复制策略
    pub replication: ReplicationConfig,
    /// 每次 `update_draw` 最多处理的脏矩形数
    pub max_updates_per_frame: usize,
    /// 分摊包围盒扫描的窗口数（一个窗口对应一个模拟步）
    pub bounds_pacing_period: u32,
    /// mip 金字塔层数，超过地图允许的层数时自动截断
    pub mip_levels: usize,
    /// 地图是否使用 void water
    pub void_water: bool,
    /// 工作线程数，0 表示使用 rayon 全局线程池
    pub worker_threads: usize,
    pub row_chunking: RowChunking,
}

impl Default for HeightMapConfig {
    fn default() -> Self {
        Self {
            replication: ReplicationConfig::default(),
            max_updates_per_frame: MAX_UPDATES_PER_FRAME,
            bounds_pacing_period: SIM_STEPS_PER_SECOND,
            mip_levels: NUM_HEIGHT_MIP_MAPS,
            void_water: false,
            worker_threads: 0,
            row_chunking: RowChunking::default(),
        }
    }
}

impl HeightMapConfig {
    /// 启用摘要的视野门控复制
    pub fn gated(los_square_size: u32) -> Self {
        Self {
            replication: ReplicationConfig::Gated {
                los_square_size,
                use_digests: true,
            },
            ..Default::default()
        }
    }

    /// 从 JSON 解析配置，缺失的字段使用默认值
    pub fn from_json(json: &str) -> HeightMapResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> HeightMapResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HeightMapConfig::from_json(r#"{ "void_water": true }"#).unwrap();
        assert!(config.void_water);
        assert_eq!(config.max_updates_per_frame, MAX_UPDATES_PER_FRAME);
        assert_eq!(config.replication, ReplicationConfig::Direct);
    }

    #[test]
    fn test_gated_from_json() {
        let json = r#"{
            "replication": { "Gated": { "los_square_size": 4, "use_digests": false } },
            "bounds_pacing_period": 10
        }"#;
        let config = HeightMapConfig::from_json(json).unwrap();
        assert_eq!(
            config.replication,
            ReplicationConfig::Gated {
                los_square_size: 4,
                use_digests: false
            }
        );
        assert_eq!(config.bounds_pacing_period, 10);

        let back = HeightMapConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_bad_json_is_error() {
        assert!(HeightMapConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn test_min_rows() {
        assert_eq!(RowChunking::min_rows(256, 64), 4);
        assert_eq!(RowChunking::min_rows(64, 1024), 1);
    }
}
