//! Per-direction TCP stream reassembly, grounded in
//! `examples/original_source/net/ip/tcp/stream.{h,cpp}`: an ordered queue of
//! out-of-order segments, a running next-expected sequence number, and a
//! caller-supplied payload/gap callback pair.
//!
//! The source links queued segments through pointers drawn from a free
//! pool; this crate keeps them in a small sorted `Vec` (see
//! [`super::segment`]) since streams rarely queue more than a handful of
//! segments before the gap in front of them closes.

use super::connection::{Direction, TcpConnection};
use super::seq;
use super::segment::Segment;

/// Per-engine callback surface, owned by the caller rather than reached
/// through a global function pointer (DESIGN NOTES, "Global statics and
/// callback pointers").
pub trait StreamCallbacks {
    type UserToken;

    /// Called once, on the first packet seen in a given direction. Returning
    /// `None` marks the stream `ignore`d: no further callbacks fire for it.
    fn begin_stream(&mut self, conn: &TcpConnection, dir: Direction) -> Option<Self::UserToken>;

    /// Delivers `bytes` at `stream_offset` (relative to the first byte of
    /// this stream). Returning `false` marks the stream `ignore`d.
    fn on_payload(
        &mut self,
        token: &mut Self::UserToken,
        conn: &TcpConnection,
        dir: Direction,
        bytes: &[u8],
        stream_offset: u64,
    ) -> bool;

    /// Reports an unrecoverable gap of `gap_size` bytes at `stream_offset`,
    /// forced open because the out-of-order queue hit its cap. Returning
    /// `false` marks the stream `ignore`d.
    fn on_gap(
        &mut self,
        token: &mut Self::UserToken,
        conn: &TcpConnection,
        dir: Direction,
        gap_size: u32,
        stream_offset: u64,
    ) -> bool;

    fn end_stream(&mut self, token: Self::UserToken, conn: &TcpConnection, dir: Direction);
}

/// Reassembly state for one direction of one TCP connection.
#[derive(Debug)]
pub struct TcpStream<U> {
    next_expected: u32,
    initialized: bool,
    stream_offset: u64,
    queue: Vec<Segment>,
    token: Option<U>,
    began: bool,
    ignore: bool,
}

impl<U> Default for TcpStream<U> {
    fn default() -> Self {
        Self {
            next_expected: 0,
            initialized: false,
            stream_offset: 0,
            queue: Vec::new(),
            token: None,
            began: false,
            ignore: false,
        }
    }
}

impl<U> TcpStream<U> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    pub fn queued_segments(&self) -> usize {
        self.queue.len()
    }

    /// Feeds one packet's payload into the stream. `seq` and `syn` come from
    /// the TCP header; `payload` is the segment's data (possibly empty).
    pub fn insert<C>(
        &mut self,
        seq_num: u32,
        syn: bool,
        payload: &[u8],
        callbacks: &mut C,
        conn: &TcpConnection,
        dir: Direction,
        max_queued_segments: usize,
    ) where
        C: StreamCallbacks<UserToken = U>,
    {
        if self.ignore {
            return;
        }
        if !self.began {
            match callbacks.begin_stream(conn, dir) {
                Some(token) => {
                    self.token = Some(token);
                    self.began = true;
                }
                None => {
                    self.ignore = true;
                    return;
                }
            }
        }
        if !self.initialized {
            self.next_expected = if syn { seq_num.wrapping_add(1) } else { seq_num };
            self.initialized = true;
        }
        if syn || payload.is_empty() {
            return;
        }

        if seq_num == self.next_expected {
            self.deliver(payload.to_vec(), callbacks, conn, dir);
            self.drain(callbacks, conn, dir);
        } else if seq::less_than(seq_num, self.next_expected) {
            let end = seq_num.wrapping_add(payload.len() as u32);
            if seq::greater_than(end, self.next_expected) {
                let shift = self.next_expected.wrapping_sub(seq_num) as usize;
                self.deliver(payload[shift..].to_vec(), callbacks, conn, dir);
                self.drain(callbacks, conn, dir);
            }
            // else: entirely a retransmit of data already delivered; drop.
        } else {
            queue_insert(&mut self.queue, seq_num, payload.to_vec());
            if self.queue.len() > max_queued_segments {
                self.force_gap(callbacks, conn, dir);
            }
        }
    }

    /// Flushes any queued segments by forcing gaps, then closes the stream.
    /// Called once the owning connection reaches `Closed` or `Failure`.
    pub fn terminate<C>(&mut self, callbacks: &mut C, conn: &TcpConnection, dir: Direction)
    where
        C: StreamCallbacks<UserToken = U>,
    {
        if !self.began {
            return;
        }
        while !self.queue.is_empty() && !self.ignore {
            self.force_gap(callbacks, conn, dir);
        }
        if let Some(token) = self.token.take() {
            callbacks.end_stream(token, conn, dir);
        }
        self.began = false;
    }

    fn deliver<C>(&mut self, bytes: Vec<u8>, callbacks: &mut C, conn: &TcpConnection, dir: Direction)
    where
        C: StreamCallbacks<UserToken = U>,
    {
        if self.ignore || bytes.is_empty() {
            return;
        }
        let len = bytes.len();
        let offset = self.stream_offset;
        let token = self.token.as_mut().expect("stream began before delivering");
        let ok = callbacks.on_payload(token, conn, dir, &bytes, offset);
        self.next_expected = self.next_expected.wrapping_add(len as u32);
        self.stream_offset += len as u64;
        if !ok {
            self.ignore = true;
        }
    }

    fn drain<C>(&mut self, callbacks: &mut C, conn: &TcpConnection, dir: Direction)
    where
        C: StreamCallbacks<UserToken = U>,
    {
        loop {
            if self.ignore {
                break;
            }
            let Some(head) = self.queue.first() else { break };
            if seq::greater_than(head.seq, self.next_expected) {
                break;
            }
            let head = self.queue.remove(0);
            let shift = self.next_expected.wrapping_sub(head.seq) as usize;
            if shift < head.bytes.len() {
                self.deliver(head.bytes[shift..].to_vec(), callbacks, conn, dir);
            }
        }
    }

    /// Forces the gap in front of the lowest queued segment open, reports it,
    /// then drains whatever now lines up with the advanced `next_expected`.
    fn force_gap<C>(&mut self, callbacks: &mut C, conn: &TcpConnection, dir: Direction)
    where
        C: StreamCallbacks<UserToken = U>,
    {
        if self.ignore {
            return;
        }
        let Some(head) = self.queue.first() else { return };
        let gap_size = head.seq.wrapping_sub(self.next_expected);
        let stream_offset = self.stream_offset;
        let token = self.token.as_mut().expect("stream began before gapping");
        let ok = callbacks.on_gap(token, conn, dir, gap_size, stream_offset);
        self.stream_offset += gap_size as u64;
        self.next_expected = head.seq;
        if !ok {
            self.ignore = true;
            return;
        }
        self.drain(callbacks, conn, dir);
    }
}

/// Inserts `bytes` (starting at sequence `seq`) into a queue kept sorted
/// ascending by sequence number, trimming overlap against already-queued
/// segments rather than rejecting outright:
///
/// - Walking from the tail backward, a segment that ends at or before a
///   queued segment's start is not touched; one whose tail runs into a
///   queued segment has its tail trimmed to abut it.
/// - Once the insertion point is found, an exact duplicate of the preceding
///   segment is dropped; a front overlap has its front trimmed instead.
fn queue_insert(queue: &mut Vec<Segment>, seq_num: u32, mut bytes: Vec<u8>) {
    if bytes.is_empty() {
        return;
    }
    let mut i = queue.len();
    let idx;
    let mut seq_num = seq_num;
    loop {
        if i == 0 {
            idx = 0;
            break;
        }
        let cur_seq = queue[i - 1].seq;
        let cur_len = queue[i - 1].bytes.len();
        let cur_end = cur_seq.wrapping_add(cur_len as u32);

        if seq::greater_or_equal(seq_num, cur_seq) {
            if seq_num == cur_seq && bytes.len() == cur_len {
                return; // exact duplicate of the preceding segment
            }
            if seq::less_than(seq_num, cur_end) {
                let trim = cur_end.wrapping_sub(seq_num) as usize;
                if trim >= bytes.len() {
                    return; // fully covered by the preceding segment
                }
                bytes.drain(..trim);
                seq_num = cur_end;
            }
            idx = i;
            break;
        } else {
            let new_end = seq_num.wrapping_add(bytes.len() as u32);
            if seq::less_or_equal(new_end, cur_seq) {
                i -= 1;
                continue;
            }
            let keep = cur_seq.wrapping_sub(seq_num) as usize;
            if keep == 0 {
                return;
            }
            bytes.truncate(keep);
            i -= 1;
        }
    }
    if !bytes.is_empty() {
        queue.insert(idx, Segment { seq: seq_num, bytes });
    }
}
