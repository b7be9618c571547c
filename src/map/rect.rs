//! 高度图空间中的整数矩形
//!
//! 用矩形寻址角点或格子时两端都包含（`x1..=x2`）；
//! `width`/`area` 度量的是跨度（`x2 - x1`）。

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x1: i32,
    pub z1: i32,
    pub x2: i32,
    pub z2: i32,
}

impl Rect {
    pub const fn new(x1: i32, z1: i32, x2: i32, z2: i32) -> Self {
        Self { x1, z1, x2, z2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.z2 - self.z1
    }

    pub fn area(&self) -> i32 {
        self.width() * self.height()
    }

    /// x1 <= x2 且 z1 <= z2
    pub fn is_valid(&self) -> bool {
        self.x1 <= self.x2 && self.z1 <= self.z2
    }

    /// 向四周各扩展 `margin`
    pub fn expanded(&self, margin: i32) -> Self {
        Self::new(
            self.x1 - margin,
            self.z1 - margin,
            self.x2 + margin,
            self.z2 + margin,
        )
    }

    /// 把 x 坐标钳制到 `[0, max_x]`，z 坐标钳制到 `[0, max_z]`
    pub fn clamped(&self, max_x: i32, max_z: i32) -> Self {
        Self::new(
            self.x1.clamp(0, max_x),
            self.z1.clamp(0, max_z),
            self.x2.clamp(0, max_x),
            self.z2.clamp(0, max_z),
        )
    }

    /// 把坐标钳制进 `other`
    pub fn clamp_in(&mut self, other: &Rect) {
        self.x1 = self.x1.clamp(other.x1, other.x2);
        self.x2 = self.x2.clamp(other.x1, other.x2);
        self.z1 = self.z1.clamp(other.z1, other.z2);
        self.z2 = self.z2.clamp(other.z1, other.z2);
    }

    /// 坐标整体除以 `div`（向下取整）
    pub fn divided(&self, div: i32) -> Self {
        Self::new(
            self.x1.div_euclid(div),
            self.z1.div_euclid(div),
            self.x2.div_euclid(div),
            self.z2.div_euclid(div),
        )
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.x1 <= other.x1 && self.z1 <= other.z1 && self.x2 >= other.x2 && self.z2 >= other.z2
    }

    /// 两个矩形是否有面积为正的公共区域
    pub fn overlaps_area(&self, other: &Rect) -> bool {
        self.x1.max(other.x1) < self.x2.min(other.x2)
            && self.z1.max(other.z1) < self.z2.min(other.z2)
    }

    /// 并集，仅当它恰好覆盖两个输入时返回
    ///
    /// 行范围相同且列相接或重叠，或者反过来。
    pub fn exact_union(&self, other: &Rect) -> Option<Rect> {
        if self.contains_rect(other) {
            return Some(*self);
        }
        if other.contains_rect(self) {
            return Some(*other);
        }
        if self.z1 == other.z1
            && self.z2 == other.z2
            && self.x1 <= other.x2
            && other.x1 <= self.x2
        {
            return Some(Rect::new(
                self.x1.min(other.x1),
                self.z1,
                self.x2.max(other.x2),
                self.z2,
            ));
        }
        if self.x1 == other.x1
            && self.x2 == other.x2
            && self.z1 <= other.z2
            && other.z1 <= self.z2
        {
            return Some(Rect::new(
                self.x1,
                self.z1.min(other.z1),
                self.x2,
                self.z2.max(other.z2),
            ));
        }
        None
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{} .. {},{}]", self.x1, self.z1, self.x2, self.z2)
    }
}
