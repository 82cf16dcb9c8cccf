//! Shared packet buffers.
//!
//! A [`Frame`] is a reference-counted byte buffer plus a head offset and the
//! interface the frame is currently attributed to. Cloning a frame shares the
//! buffer; the first mutation through a shared frame copies the visible bytes.

use std::sync::Arc;

use crate::device::IfIndex;

#[derive(Debug, Clone)]
pub struct Frame {
    buf: Arc<Vec<u8>>,
    head: usize,
    dev: IfIndex,
}

impl Frame {
    pub fn new(dev: IfIndex, data: Vec<u8>) -> Self {
        Frame {
            buf: Arc::new(data),
            head: 0,
            dev,
        }
    }

    pub fn from_slice(dev: IfIndex, data: &[u8]) -> Self {
        Self::new(dev, data.to_vec())
    }

    /// Interface the frame is attributed to.
    pub fn dev(&self) -> IfIndex {
        self.dev
    }

    pub fn set_dev(&mut self, dev: IfIndex) {
        self.dev = dev;
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    /// Make sure this frame is the buffer's only owner.
    ///
    /// Returns `true` if the visible bytes had to be copied.
    pub fn make_exclusive(&mut self) -> bool {
        if Arc::get_mut(&mut self.buf).is_some() {
            return false;
        }
        self.buf = Arc::new(self.data().to_vec());
        self.head = 0;
        true
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.make_exclusive();
        let head = self.head;
        &mut Arc::make_mut(&mut self.buf)[head..]
    }

    /// Drop `n` bytes from the front. Returns `false` (and leaves the frame
    /// untouched) if the frame is shorter than `n`.
    pub fn pull(&mut self, n: usize) -> bool {
        if n > self.len() {
            return false;
        }
        self.head += n;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_moves_head() {
        let mut frame = Frame::new(IfIndex(1), vec![1, 2, 3, 4, 5]);
        assert!(frame.pull(2));
        assert_eq!(frame.data(), &[3, 4, 5]);
        assert_eq!(frame.len(), 3);

        assert!(!frame.pull(4));
        assert_eq!(frame.data(), &[3, 4, 5]);

        assert!(frame.pull(3));
        assert!(frame.is_empty());
    }

    #[test]
    fn test_clone_shares_until_written() {
        let mut original = Frame::new(IfIndex(1), vec![0xaa; 8]);
        let mut copy = original.clone();

        copy.data_mut()[0] = 0x55;

        assert_eq!(original.data()[0], 0xaa);
        assert_eq!(copy.data()[0], 0x55);
        // Both now own their buffer
        assert!(!copy.make_exclusive());
        assert!(!original.make_exclusive());
    }

    #[test]
    fn test_make_exclusive_copies_only_visible_bytes() {
        let original = Frame::new(IfIndex(1), vec![1, 2, 3, 4]);
        let mut copy = original.clone();
        copy.pull(1);

        assert!(copy.make_exclusive());
        assert_eq!(copy.data(), &[2, 3, 4]);
        assert!(!copy.make_exclusive());
        assert_eq!(original.data(), &[1, 2, 3, 4]);
    }


    #[test]
    fn test_set_dev() {
        let mut frame = Frame::from_slice(IfIndex(2), &[0u8; 4]);
        assert_eq!(frame.dev(), IfIndex(2));
        frame.set_dev(IfIndex(42));
        assert_eq!(frame.dev(), IfIndex(42));
    }
}
