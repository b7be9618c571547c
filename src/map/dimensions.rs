//! 地图尺寸常量

use crate::error::{HeightMapError, HeightMapResult};

/// 一个高度图格子的世界尺寸（弹性单位）
pub const SQUARE_SIZE: f32 = 8.0;

/// 地图尺寸派生常量，地图生命周期内不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapDimensions {
    /// 格子列数
    pub mapx: i32,
    /// 格子行数
    pub mapy: i32,
    pub mapxm1: i32,
    pub mapym1: i32,
    /// 角点高度图每行的采样数
    pub mapxp1: i32,
    pub mapyp1: i32,
    pub map_squares: i32,
    /// 半分辨率（坡度图、类型图）尺寸
    pub hmapx: i32,
    pub hmapy: i32,
    /// 不小于地图尺寸的 2 的幂
    pub pwr2mapx: i32,
    pub pwr2mapy: i32,
}

impl MapDimensions {
    /// 由格子数构建尺寸表
    ///
    /// 宽高必须是不小于 2 的偶数，坡度图与类型图按 2x2 格子采样。
    pub fn new(mapx: u32, mapy: u32) -> HeightMapResult<Self> {
        let invalid = |reason| HeightMapError::InvalidDimensions {
            width: mapx,
            height: mapy,
            reason,
        };

        if mapx < 2 || mapy < 2 {
            return Err(invalid("map must be at least 2x2 squares"));
        }
        if mapx % 2 != 0 || mapy % 2 != 0 {
            return Err(invalid("map dimensions must be even"));
        }
        if mapx > i16::MAX as u32 || mapy > i16::MAX as u32 {
            return Err(invalid("map dimensions too large"));
        }

        let (mapx, mapy) = (mapx as i32, mapy as i32);

        Ok(Self {
            mapx,
            mapy,
            mapxm1: mapx - 1,
            mapym1: mapy - 1,
            mapxp1: mapx + 1,
            mapyp1: mapy + 1,
            map_squares: mapx * mapy,
            hmapx: mapx / 2,
            hmapy: mapy / 2,
            pwr2mapx: (mapx as u32).next_power_of_two() as i32,
            pwr2mapy: (mapy as u32).next_power_of_two() as i32,
        })
    }

    /// 角点采样总数 `(mapx + 1) * (mapy + 1)`
    pub fn corner_count(&self) -> usize {
        (self.mapxp1 * self.mapyp1) as usize
    }

    /// 格子总数
    pub fn square_count(&self) -> usize {
        self.map_squares as usize
    }

    /// 半分辨率格子总数
    pub fn half_count(&self) -> usize {
        (self.hmapx * self.hmapy) as usize
    }

    /// 角点 (x, z) 的扁平索引
    ///
    /// # Panics
    /// 坐标超出 `[0, mapx] x [0, mapy]` 时 panic
    pub fn corner_index(&self, x: i32, z: i32) -> usize {
        assert!(
            (0..=self.mapx).contains(&x) && (0..=self.mapy).contains(&z),
            "corner ({x}, {z}) outside [0, {}] x [0, {}]",
            self.mapx,
            self.mapy
        );
        (z * self.mapxp1 + x) as usize
    }

    /// 格子 (x, z) 的扁平索引
    ///
    /// # Panics
    /// 坐标超出 `[0, mapx) x [0, mapy)` 时 panic
    pub fn square_index(&self, x: i32, z: i32) -> usize {
        assert!(
            (0..self.mapx).contains(&x) && (0..self.mapy).contains(&z),
            "square ({x}, {z}) outside [0, {}) x [0, {})",
            self.mapx,
            self.mapy
        );
        (z * self.mapx + x) as usize
    }

    /// 可支持的最大 mip 层数（最后一层至少 1x1）
    pub fn max_mip_levels(&self) -> usize {
        let min_side = self.mapx.min(self.mapy) as u32;
        (u32::BITS - min_side.leading_zeros()) as usize
    }

    /// 地图外接圆半径（世界单位）
    pub fn bounding_radius(&self) -> f32 {
        let w = self.mapx as f32 * SQUARE_SIZE;
        let h = self.mapy as f32 * SQUARE_SIZE;
        (w * w + h * h).sqrt() * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_sizes() {
        let dims = MapDimensions::new(12, 6).unwrap();
        assert_eq!(dims.mapxm1, 11);
        assert_eq!(dims.mapyp1, 7);
        assert_eq!(dims.map_squares, 72);
        assert_eq!((dims.hmapx, dims.hmapy), (6, 3));
        assert_eq!((dims.pwr2mapx, dims.pwr2mapy), (16, 8));
        assert_eq!(dims.corner_count(), 13 * 7);
    }

    #[test]
    fn test_rejects_odd_and_tiny() {
        assert!(MapDimensions::new(5, 4).is_err());
        assert!(MapDimensions::new(0, 4).is_err());
    }

    #[test]
    fn test_max_mip_levels() {
        assert_eq!(MapDimensions::new(4, 4).unwrap().max_mip_levels(), 3);
        assert_eq!(MapDimensions::new(64, 32).unwrap().max_mip_levels(), 6);
    }

    #[test]
    #[should_panic]
    fn test_square_index_out_of_range() {
        let dims = MapDimensions::new(4, 4).unwrap();
        dims.square_index(4, 0);
    }

    #[test]
    fn test_corner_index_includes_far_edge() {
        let dims = MapDimensions::new(4, 4).unwrap();
        assert_eq!(dims.corner_index(4, 4), 24);
    }
}
