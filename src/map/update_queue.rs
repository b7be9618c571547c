//! 脏矩形队列
//!
//! 记录已写入同步副本、尚未同步到表现副本的角点矩形。入队时只做
//! 精确合并（合并结果不会覆盖任何原本不在队列中的区域），因此
//! 可见性过滤后的矩形合并后依旧不会触及不可见的格子。

use std::collections::VecDeque;

use super::rect::Rect;

#[derive(Debug, Clone, Default)]
pub struct UpdateQueue {
    rects: VecDeque<Rect>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队；能与已有矩形精确合并时合并，合并结果占据最早的位置
    pub fn push(&mut self, rect: Rect) {
        assert!(rect.is_valid(), "inverted update rectangle {rect}");

        let mut merged = rect;
        let mut slot: Option<usize> = None;

        while let Some((idx, union)) = self
            .rects
            .iter()
            .enumerate()
            .find_map(|(idx, pending)| pending.exact_union(&merged).map(|u| (idx, u)))
        {
            self.rects.remove(idx);
            merged = union;
            slot = Some(slot.map_or(idx, |s| s.min(idx)));
        }

        match slot {
            Some(idx) => self.rects.insert(idx, merged),
            None => self.rects.push_back(merged),
        }
    }

    /// 从队首取出至多 `max_count` 个矩形
    pub fn pop_batch(&mut self, max_count: usize) -> Vec<Rect> {
        let n = max_count.min(self.rects.len());
        self.rects.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rect> {
        self.rects.iter()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contained_rect_is_dropped() {
        let mut queue = UpdateQueue::new();
        queue.push(Rect::new(0, 0, 8, 8));
        queue.push(Rect::new(2, 2, 4, 4));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next(), Some(&Rect::new(0, 0, 8, 8)));
    }

    #[test]
    fn test_adjacent_row_runs_fuse() {
        let mut queue = UpdateQueue::new();
        queue.push(Rect::new(0, 0, 4, 4));
        queue.push(Rect::new(10, 10, 12, 12));
        queue.push(Rect::new(4, 0, 8, 4));

        let rects: Vec<_> = queue.iter().copied().collect();
        assert_eq!(rects, vec![Rect::new(0, 0, 8, 4), Rect::new(10, 10, 12, 12)]);
    }

    #[test]
    fn test_chained_merge() {
        let mut queue = UpdateQueue::new();
        queue.push(Rect::new(0, 0, 4, 4));
        queue.push(Rect::new(8, 0, 12, 4));
        // 填补空隙后三段合为一段
        queue.push(Rect::new(4, 0, 8, 4));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next(), Some(&Rect::new(0, 0, 12, 4)));
    }

    #[test]
    fn test_diagonal_overlap_is_kept_separate() {
        let mut queue = UpdateQueue::new();
        queue.push(Rect::new(0, 0, 4, 4));
        queue.push(Rect::new(2, 2, 6, 6));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_batch_is_bounded_and_ordered() {
        let mut queue = UpdateQueue::new();
        for i in 0..5 {
            queue.push(Rect::new(i * 10, 0, i * 10 + 2, 2));
        }
        let batch = queue.pop_batch(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], Rect::new(0, 0, 2, 2));
        assert_eq!(batch[2], Rect::new(20, 0, 22, 2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_batch(10).len(), 2);
        assert!(queue.is_empty());
    }
}
