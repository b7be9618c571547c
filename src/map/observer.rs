//! 表现副本的矩形变化通知

use super::rect::Rect;

/// 每个同步到表现副本的矩形调用一次
///
/// 调用时 `rect` 内的表现数据已经是最新的。
pub trait HeightMapObserver: Send {
    fn unsynced_height_map_update(&mut self, rect: &Rect);
}

impl<F> HeightMapObserver for F
where
    F: FnMut(&Rect) + Send,
{
    fn unsynced_height_map_update(&mut self, rect: &Rect) {
        self(rect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct Observers {
    next_id: u64,
    entries: Vec<(ObserverId, Box<dyn HeightMapObserver>)>,
}

impl Observers {
    pub fn add(&mut self, observer: Box<dyn HeightMapObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, observer));
        id
    }

    /// 返回是否找到并移除
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn notify(&mut self, rect: &Rect) {
        for (_, observer) in &mut self.entries {
            observer.unsynced_height_map_update(rect);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_notify_and_remove() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::default();

        let sink = Arc::clone(&seen);
        let id = observers.add(Box::new(move |rect: &Rect| {
            sink.lock().unwrap().push(*rect);
        }));

        observers.notify(&Rect::new(0, 0, 1, 1));
        assert!(observers.remove(id));
        assert!(!observers.remove(id));
        observers.notify(&Rect::new(2, 2, 3, 3));

        assert_eq!(*seen.lock().unwrap(), vec![Rect::new(0, 0, 1, 1)]);
    }
}
