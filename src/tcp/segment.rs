//! A single queued out-of-order TCP segment.
//!
//! The source links these through `prev`/`next` pointers drawn from a free
//! pool (DESIGN NOTES, "Cyclic structures"). A TCP stream rarely queues more
//! than a few dozen segments at once, so this crate keeps them in a small
//! sorted `Vec` instead -- no pointers, no pool, no possibility of a cycle.

#[derive(Debug, Clone)]
pub struct Segment {
    pub seq: u32,
    pub bytes: Vec<u8>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
