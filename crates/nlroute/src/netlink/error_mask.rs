//! Per-request sets of expected kernel errors.

use std::collections::HashSet;

/// Number of recent sequence numbers that keep their error mask.
pub const ERROR_WINDOW_SIZE: u32 = 16;

/// Errno values (positive) a request expects and does not want logged.
pub type ErrorMask = HashSet<i32>;

/// Ring of error masks indexed by `sequence % ERROR_WINDOW_SIZE`.
///
/// A slot is only valid while its sequence is one of the last
/// `ERROR_WINDOW_SIZE` issued; older or future sequences are rejected
/// using wrapping arithmetic. Reading a slot empties it.
#[derive(Debug, Default)]
pub struct ErrorMaskWindow {
    slots: [ErrorMask; ERROR_WINDOW_SIZE as usize],
}

impl ErrorMaskWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `seq` is inside the window that ends at `current`.
    pub fn in_window(current: u32, seq: u32) -> bool {
        current.wrapping_sub(seq) < ERROR_WINDOW_SIZE
    }

    /// Store `mask` for `seq`. Returns false if `seq` is outside the window.
    pub fn set(&mut self, current: u32, seq: u32, mask: ErrorMask) -> bool {
        if !Self::in_window(current, seq) {
            return false;
        }
        self.slots[Self::slot(seq)] = mask;
        true
    }

    /// Take the mask stored for `seq`, leaving the slot empty.
    ///
    /// Out-of-window sequences yield an empty mask.
    pub fn take(&mut self, current: u32, seq: u32) -> ErrorMask {
        if !Self::in_window(current, seq) {
            return ErrorMask::new();
        }
        std::mem::take(&mut self.slots[Self::slot(seq)])
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(ErrorMask::clear);
    }

    fn slot(seq: u32) -> usize {
        (seq % ERROR_WINDOW_SIZE) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(errnos: &[i32]) -> ErrorMask {
        errnos.iter().copied().collect()
    }

    #[test]
    fn test_set_and_take_once() {
        let mut window = ErrorMaskWindow::new();
        assert!(window.set(100, 100, mask(&[libc::EEXIST])));

        assert_eq!(window.take(100, 100), mask(&[libc::EEXIST]));
        assert!(window.take(100, 100).is_empty());
    }

    #[test]
    fn test_window_bounds() {
        let mut window = ErrorMaskWindow::new();
        let current = 100;

        // Oldest sequence still in the window.
        assert!(window.set(current, current - 15, mask(&[libc::ESRCH])));
        // One step too old, and one in the future.
        assert!(!window.set(current, current - 16, mask(&[libc::ESRCH])));
        assert!(!window.set(current, current + 1, mask(&[libc::ESRCH])));

        assert_eq!(window.take(current, current - 15), mask(&[libc::ESRCH]));
        assert!(window.take(current, current + 1).is_empty());
    }

    #[test]
    fn test_window_wraps() {
        let mut window = ErrorMaskWindow::new();
        let seq = u32::MAX - 2;
        assert!(window.set(seq, seq, mask(&[libc::ENODEV])));

        // The counter wrapped past zero but seq is still recent.
        let current = 5;
        assert!(ErrorMaskWindow::in_window(current, seq));
        assert_eq!(window.take(current, seq), mask(&[libc::ENODEV]));
    }

    #[test]
    fn test_stale_slot_is_not_read() {
        let mut window = ErrorMaskWindow::new();
        window.set(3, 3, mask(&[libc::EEXIST]));

        // Sixteen sequences later the slot is out of reach for seq 3.
        assert!(window.take(19, 3).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut window = ErrorMaskWindow::new();
        window.set(1, 1, mask(&[libc::EEXIST]));
        window.clear();
        assert!(window.take(1, 1).is_empty());
    }
}
