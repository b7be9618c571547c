//! 派生几何管线
//!
//! 中心高度 → mip 金字塔 → 面法线 → 坡度图，严格按此顺序逐阶段执行。
//! 每个阶段内部按行切分为互不重叠的可变切片并行计算，阶段之间由
//! rayon 的 `for_each` 返回形成屏障，因此不需要任何锁。

use glam::Vec3;
use rayon::prelude::*;

use super::dimensions::{MapDimensions, SQUARE_SIZE};
use super::rect::Rect;
use super::store::DerivedMut;
use crate::config::RowChunking;

/// 一次同步更新涉及的两个矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRects {
    /// 格子坐标，钳制到 `[0, mapxm1] x [0, mapym1]`
    pub center: Rect,
    /// 角点坐标，钳制到 `[0, mapx] x [0, mapy]`
    pub corner: Rect,
}

impl UpdateRects {
    /// 向外扩一格（邻接依赖），再分别钳制到格子与角点范围
    pub fn from_changed(dims: &MapDimensions, rect: &Rect) -> Self {
        let expanded = rect.expanded(1);
        Self {
            center: expanded.clamped(dims.mapxm1, dims.mapym1),
            corner: expanded.clamped(dims.mapx, dims.mapy),
        }
    }
}

/// 在 `center_rect` 上依次重算全部派生数据
///
/// `initialize` 为真时同时写入表现副本的法线（首次加载，不经可见性过滤）。
pub fn recompute(
    dims: &MapDimensions,
    derived: DerivedMut<'_>,
    center_rect: &Rect,
    initialize: bool,
    chunking: &RowChunking,
) {
    let DerivedMut {
        corner_heights,
        center_heights,
        mip_heights,
        face_normals,
        center_normals,
        center_normals_2d,
        slope_map,
        cosmetic_normals,
    } = derived;

    update_center_heights(
        dims,
        corner_heights,
        center_heights,
        center_rect,
        RowChunking::min_rows(chunking.center_cells, dims.mapx as usize),
    );
    update_mip_heights(dims, center_heights, mip_heights, center_rect);
    update_face_normals(
        dims,
        corner_heights,
        FaceNormalsMut {
            face: &mut *face_normals,
            center: &mut *center_normals,
            center_2d: &mut *center_normals_2d,
        },
        center_rect,
        RowChunking::min_rows(chunking.normal_cells, dims.mapx as usize),
    );
    if initialize {
        if let Some((face, center)) = cosmetic_normals {
            seed_cosmetic_normals(dims, face_normals, center_normals, face, center, center_rect);
        }
    }
    // 必须在面法线之后
    update_slope_map(
        dims,
        face_normals,
        slope_map,
        center_rect,
        RowChunking::min_rows(chunking.slope_cells, dims.hmapx as usize),
    );
}

/// 中心高度 = 四个角点的平均值
pub fn update_center_heights(
    dims: &MapDimensions,
    corners: &[f32],
    centers: &mut [f32],
    rect: &Rect,
    min_rows: usize,
) {
    let row_len = dims.mapx as usize;
    let stride = dims.mapxp1 as usize;
    let rows = &mut centers[rect.z1 as usize * row_len..(rect.z2 as usize + 1) * row_len];

    rows.par_chunks_mut(row_len)
        .enumerate()
        .with_min_len(min_rows)
        .for_each(|(dz, row)| {
            let z = rect.z1 as usize + dz;

            for x in rect.x1 as usize..=rect.x2 as usize {
                let idx_tl = z * stride + x;
                let idx_bl = idx_tl + stride;

                let height = corners[idx_tl]
                    + corners[idx_tl + 1]
                    + corners[idx_bl]
                    + corners[idx_bl + 1];
                row[x] = height * 0.25;
            }
        });
}

/// 自底向上重算 mip 金字塔
///
/// 每层只重算与 `rect` 相交的 2x2 块；起点向下对齐到偶数，
/// 奇数宽度层的最后一列/行没有父节点，直接跳过。
pub fn update_mip_heights(
    dims: &MapDimensions,
    centers: &[f32],
    mips: &mut [Vec<f32>],
    rect: &Rect,
) {
    for level in 0..mips.len() {
        let (top, sub): (&[f32], &mut [f32]) = if level == 0 {
            (centers, mips[0].as_mut_slice())
        } else {
            let (lower, upper) = mips.split_at_mut(level);
            (lower[level - 1].as_slice(), upper[0].as_mut_slice())
        };

        let top_w = dims.mapx >> level;
        let top_h = dims.mapy >> level;
        let sub_w = (top_w >> 1) as usize;

        let sx = (rect.x1 >> level) & !1;
        let ex = (rect.x2 >> level).min(top_w - 1);
        let sz = (rect.z1 >> level) & !1;
        let ez = (rect.z2 >> level).min(top_h - 1);

        for z in (sz..=ez).step_by(2) {
            if z + 1 >= top_h {
                break;
            }
            for x in (sx..=ex).step_by(2) {
                if x + 1 >= top_w {
                    break;
                }
                let at = |x: i32, z: i32| top[(z * top_w + x) as usize];

                let height = at(x, z) + at(x, z + 1) + at(x + 1, z) + at(x + 1, z + 1);
                sub[(z / 2) as usize * sub_w + (x / 2) as usize] = height * 0.25;
            }
        }
    }
}

/// 法线阶段写入的三个数组
pub struct FaceNormalsMut<'a> {
    pub face: &'a mut [Vec3],
    pub center: &'a mut [Vec3],
    pub center_2d: &'a mut [Vec3],
}

/// 由原始角点高度计算每个格子的两个三角形法线
///
/// 法线矩形在 `rect` 基础上再外扩一格。
pub fn update_face_normals(
    dims: &MapDimensions,
    corners: &[f32],
    out: FaceNormalsMut<'_>,
    rect: &Rect,
    min_rows: usize,
) {
    let r = normals_rect(dims, rect);
    let row_len = dims.mapx as usize;
    let stride = dims.mapxp1 as usize;
    let (z1, z2) = (r.z1 as usize, r.z2 as usize + 1);

    let face_rows = &mut out.face[z1 * row_len * 2..z2 * row_len * 2];
    let center_rows = &mut out.center[z1 * row_len..z2 * row_len];
    let center_2d_rows = &mut out.center_2d[z1 * row_len..z2 * row_len];

    face_rows
        .par_chunks_mut(row_len * 2)
        .zip(center_rows.par_chunks_mut(row_len))
        .zip(center_2d_rows.par_chunks_mut(row_len))
        .enumerate()
        .with_min_len(min_rows)
        .for_each(|(dz, ((face_row, center_row), center_2d_row))| {
            let z = z1 + dz;

            for x in r.x1 as usize..=r.x2 as usize {
                let idx_tl = z * stride + x;
                let idx_bl = idx_tl + stride;

                let h_tl = corners[idx_tl];
                let h_tr = corners[idx_tl + 1];
                let h_bl = corners[idx_bl];
                let h_br = corners[idx_bl + 1];

                // 左上三角形: e1 = (SQ, hTR - hTL, 0), e2 = (0, hBL - hTL, SQ), n = e2 x e1
                let fn_tl = Vec3::new(-(h_tr - h_tl), SQUARE_SIZE, -(h_bl - h_tl)).normalize();
                // 右下三角形: e3 = (-SQ, hBL - hBR, 0), e4 = (0, hTR - hBR, -SQ), n = e4 x e3
                let fn_br = Vec3::new(h_bl - h_br, SQUARE_SIZE, h_tr - h_br).normalize();

                face_row[x * 2] = fn_tl;
                face_row[x * 2 + 1] = fn_br;

                let sum = fn_tl + fn_br;
                center_row[x] = sum.normalize();
                center_2d_row[x] = Vec3::new(sum.x, 0.0, sum.z).normalize_or_zero();
            }
        });
}

/// 坡度图，半分辨率，每个单元取 2x2 格子共 8 个面法线
pub fn update_slope_map(
    dims: &MapDimensions,
    face_normals: &[Vec3],
    slope_map: &mut [f32],
    rect: &Rect,
    min_rows: usize,
) {
    let sx = (rect.x1 / 2 - 1).max(0);
    let ex = (rect.x2 / 2 + 1).min(dims.hmapx - 1);
    let sz = (rect.z1 / 2 - 1).max(0);
    let ez = (rect.z2 / 2 + 1).min(dims.hmapy - 1);

    let row_len = dims.hmapx as usize;
    let mapx = dims.mapx as usize;
    let rows = &mut slope_map[sz as usize * row_len..(ez as usize + 1) * row_len];

    rows.par_chunks_mut(row_len)
        .enumerate()
        .with_min_len(min_rows)
        .for_each(|(dz, row)| {
            let z = sz as usize + dz;

            for x in sx as usize..=ex as usize {
                let idx0 = (z * 2) * mapx + x * 2;
                let idx1 = idx0 + mapx;

                let ys = [
                    face_normals[idx0 * 2].y,
                    face_normals[idx0 * 2 + 1].y,
                    face_normals[(idx0 + 1) * 2].y,
                    face_normals[(idx0 + 1) * 2 + 1].y,
                    face_normals[idx1 * 2].y,
                    face_normals[idx1 * 2 + 1].y,
                    face_normals[(idx1 + 1) * 2].y,
                    face_normals[(idx1 + 1) * 2 + 1].y,
                ];

                let avg_slope = ys.iter().fold(0.0f32, |acc, &y| acc + y) * 0.125;
                let max_slope = ys[1..].iter().fold(ys[0], |acc, &y| acc.min(y));

                // 软混合，避免单个小坑把整块判为不可通行
                let lerp = max_slope / avg_slope;
                let slope = max_slope + (avg_slope - max_slope) * lerp;

                row[x] = 1.0 - slope;
            }
        });
}

fn normals_rect(dims: &MapDimensions, rect: &Rect) -> Rect {
    rect.expanded(1).clamped(dims.mapxm1, dims.mapym1)
}

fn seed_cosmetic_normals(
    dims: &MapDimensions,
    face: &[Vec3],
    center: &[Vec3],
    cosmetic_face: &mut [Vec3],
    cosmetic_center: &mut [Vec3],
    rect: &Rect,
) {
    let r = normals_rect(dims, rect);
    for z in r.z1..=r.z2 {
        let row = (z * dims.mapx) as usize;
        let span = row + r.x1 as usize..row + r.x2 as usize + 1;

        cosmetic_center[span.clone()].copy_from_slice(&center[span.clone()]);
        cosmetic_face[span.start * 2..span.end * 2]
            .copy_from_slice(&face[span.start * 2..span.end * 2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_corners(dims: &MapDimensions) -> Vec<f32> {
        (0..dims.mapyp1)
            .flat_map(|_| (0..dims.mapxp1).map(|x| x as f32))
            .collect()
    }

    #[test]
    fn test_update_rects_expand_and_clamp() {
        let dims = MapDimensions::new(8, 8).unwrap();
        let rects = UpdateRects::from_changed(&dims, &Rect::new(0, 3, 8, 4));
        assert_eq!(rects.center, Rect::new(0, 2, 7, 5));
        assert_eq!(rects.corner, Rect::new(0, 2, 8, 5));
    }

    #[test]
    fn test_center_heights_of_ramp() {
        let dims = MapDimensions::new(4, 4).unwrap();
        let corners = ramp_corners(&dims);
        let mut centers = vec![0.0; dims.square_count()];
        update_center_heights(&dims, &corners, &mut centers, &Rect::new(0, 0, 3, 3), 1);

        for z in 0..4 {
            for x in 0..4 {
                assert_eq!(centers[z * 4 + x], x as f32 + 0.5);
            }
        }
    }

    #[test]
    fn test_flat_cell_normal_is_up() {
        let dims = MapDimensions::new(2, 2).unwrap();
        let corners = vec![3.0; dims.corner_count()];
        let mut face = vec![Vec3::ZERO; 8];
        let mut center = vec![Vec3::ZERO; 4];
        let mut center_2d = vec![Vec3::ONE; 4];

        update_face_normals(
            &dims,
            &corners,
            FaceNormalsMut {
                face: &mut face,
                center: &mut center,
                center_2d: &mut center_2d,
            },
            &Rect::new(0, 0, 1, 1),
            1,
        );

        assert!(face.iter().all(|n| *n == Vec3::Y));
        assert!(center.iter().all(|n| *n == Vec3::Y));
        assert!(center_2d.iter().all(|n| *n == Vec3::ZERO));
    }

    #[test]
    fn test_sloped_face_normals_tilt_downhill() {
        let dims = MapDimensions::new(2, 2).unwrap();
        let corners = ramp_corners(&dims);
        let mut face = vec![Vec3::ZERO; 8];
        let mut center = vec![Vec3::ZERO; 4];
        let mut center_2d = vec![Vec3::ZERO; 4];

        update_face_normals(
            &dims,
            &corners,
            FaceNormalsMut {
                face: &mut face,
                center: &mut center,
                center_2d: &mut center_2d,
            },
            &Rect::new(0, 0, 1, 1),
            1,
        );

        let expected = Vec3::new(-1.0, SQUARE_SIZE, 0.0).normalize();
        for n in &face {
            assert!((*n - expected).length() < 1e-6);
        }
        assert!((center_2d[0] - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_slope_of_flat_map_is_zero() {
        let dims = MapDimensions::new(4, 4).unwrap();
        let face = vec![Vec3::Y; dims.square_count() * 2];
        let mut slope = vec![1.0; dims.half_count()];
        update_slope_map(&dims, &face, &mut slope, &Rect::new(0, 0, 3, 3), 1);
        assert!(slope.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_single_pit_is_softened() {
        // 一个陡面 + 七个平面：混合后的坡度小于最陡面
        let dims = MapDimensions::new(2, 2).unwrap();
        let mut face = vec![Vec3::Y; 8];
        face[0] = Vec3::new(1.0, 1.0, 0.0).normalize();
        let mut slope = vec![0.0; 1];
        update_slope_map(&dims, &face, &mut slope, &Rect::new(0, 0, 1, 1), 1);

        let steepest = 1.0 - face[0].y;
        assert!(slope[0] > 0.0);
        assert!(slope[0] < steepest);
    }

    #[test]
    fn test_partial_mip_update_keeps_invariant() {
        let dims = MapDimensions::new(8, 8).unwrap();
        let mut centers: Vec<f32> = (0..64).map(|i| (i * 7 % 13) as f32).collect();
        let mut mips = vec![vec![0.0; 16], vec![0.0; 4], vec![0.0; 1]];
        update_mip_heights(&dims, &centers, &mut mips, &Rect::new(0, 0, 7, 7));

        // 只改动第 2 列（偶数起点、偶数终点）
        centers[2 * 8 + 2] = 100.0;
        update_mip_heights(&dims, &centers, &mut mips, &Rect::new(2, 2, 2, 2));

        let expected = (centers[2 * 8 + 2]
            + centers[3 * 8 + 2]
            + centers[2 * 8 + 3]
            + centers[3 * 8 + 3])
            * 0.25;
        assert_eq!(mips[0][1 * 4 + 1], expected);
    }
}
