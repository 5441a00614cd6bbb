//! Buffer-then-flush queue for remote ICE candidates.

/// A queue with a gate: items pushed while the gate is closed are held in
/// arrival order; opening the gate drains them exactly once, and every
/// later push passes straight through.
#[derive(Debug)]
pub struct GatedQueue<T> {
    pending: Vec<T>,
    open: bool,
}

impl<T> GatedQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            open: false,
        }
    }

    /// Offers an item. Returns it back when the gate is open, `None` when
    /// it was buffered.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.open {
            Some(item)
        } else {
            self.pending.push(item);
            None
        }
    }

    /// Opens the gate and drains everything buffered so far, in arrival
    /// order.
    pub fn open(&mut self) -> Vec<T> {
        self.open = true;
        std::mem::take(&mut self.pending)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<T> Default for GatedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_until_opened() {
        let mut queue = GatedQueue::new();
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), None);
        assert_eq!(queue.push(3), None);
        assert!(!queue.is_open());
        assert_eq!(queue.open(), vec![1, 2, 3]);
        assert!(queue.is_open());
    }

    #[test]
    fn passes_through_once_open() {
        let mut queue = GatedQueue::new();
        queue.push("early");
        assert_eq!(queue.open(), vec!["early"]);
        assert_eq!(queue.push("late"), Some("late"));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn reopening_drains_nothing_new() {
        let mut queue: GatedQueue<u8> = GatedQueue::new();
        queue.push(7);
        assert_eq!(queue.open(), vec![7]);
        assert!(queue.open().is_empty());
    }
}
