//! Reference-counted packet buffers.
//!
//! Inbound `+IPD` payloads and outbound send data travel as [`PacketBuf`]
//! chains: a sequence of shared byte segments forming one logical stream
//! without contiguous storage. Appending a chain to another is O(1)
//! amortised and never copies payload bytes; sharing a chain only bumps the
//! per-segment reference counts. Memory returns to the heap when the last
//! chain referencing a segment is dropped.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;

/// One shared byte segment with a live sub-range.
#[derive(Clone)]
pub(crate) struct Segment {
    pub(crate) data: Arc<[u8]>,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl Segment {
    fn bytes(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// A chain of reference-counted byte segments.
#[derive(Clone, Default)]
pub struct PacketBuf {
    pub(crate) segs: VecDeque<Segment>,
    len: usize,
}

impl PacketBuf {
    /// Empty chain, allocates nothing.
    pub const fn new() -> Self {
        Self {
            segs: VecDeque::new(),
            len: 0,
        }
    }

    /// Chain with a single zeroed segment of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Copies `data` into a fresh single-segment chain.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    pub(crate) fn from_vec(data: alloc::vec::Vec<u8>) -> Self {
        let len = data.len();
        let mut segs = VecDeque::with_capacity(1);
        if len > 0 {
            segs.push_back(Segment {
                data: data.into(),
                start: 0,
                end: len,
            });
        }
        Self { segs, len }
    }

    /// Total number of bytes in the chain.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `other` to the end of this chain without copying payload.
    pub fn concat(&mut self, other: PacketBuf) {
        self.len += other.len;
        self.segs.extend(other.segs);
    }

    /// New chain referencing the same segments. Each segment's reference
    /// count increases by one.
    pub fn share(&self) -> PacketBuf {
        self.clone()
    }

    /// Byte at chain position `index`.
    pub fn get_at(&self, index: usize) -> Option<u8> {
        let mut pos = index;
        for seg in &self.segs {
            if pos < seg.len() {
                return Some(seg.bytes()[pos]);
            }
            pos -= seg.len();
        }
        None
    }

    /// First position `>= from` where `needle` matches, crossing segment
    /// boundaries. O(chain length × needle length) worst case.
    pub fn strfind(&self, needle: &[u8], from: usize) -> Option<usize> {
        if needle.is_empty() || self.len < needle.len() {
            return None;
        }
        'outer: for at in from..=(self.len - needle.len()) {
            for (i, want) in needle.iter().enumerate() {
                if self.get_at(at + i) != Some(*want) {
                    continue 'outer;
                }
            }
            return Some(at);
        }
        None
    }

    /// True if the chain starts with `prefix` at position `from`.
    pub fn starts_with(&self, prefix: &[u8], from: usize) -> bool {
        prefix
            .iter()
            .enumerate()
            .all(|(i, want)| self.get_at(from + i) == Some(*want))
    }

    /// Linearises up to `dst.len()` bytes starting at chain position `from`.
    /// Returns the number of bytes copied.
    pub fn copy_to(&self, dst: &mut [u8], from: usize) -> usize {
        let mut skip = from;
        let mut copied = 0;
        for seg in &self.segs {
            let bytes = seg.bytes();
            if skip >= bytes.len() {
                skip -= bytes.len();
                continue;
            }
            let avail = &bytes[skip..];
            skip = 0;
            let n = avail.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&avail[..n]);
            copied += n;
            if copied == dst.len() {
                break;
            }
        }
        copied
    }

    /// Drops `n` bytes from the front of the chain. Segments that become
    /// empty are released; a partially consumed head keeps its storage but
    /// narrows its live range.
    pub fn advance(&mut self, mut n: usize) {
        n = n.min(self.len);
        self.len -= n;
        while n > 0 {
            let head = match self.segs.front_mut() {
                Some(seg) => seg,
                None => return,
            };
            if n >= head.len() {
                n -= head.len();
                self.segs.pop_front();
            } else {
                head.start += n;
                n = 0;
            }
        }
    }

    /// Shared tail of the chain starting at byte `n`.
    pub fn skip_to(&self, n: usize) -> PacketBuf {
        let mut tail = self.share();
        tail.advance(n);
        tail
    }

    /// Splits the chain at `n` bytes: `self` keeps the tail, the head is
    /// returned. Used to slice outbound data into modem-sized units.
    pub fn split_off_front(&mut self, n: usize) -> PacketBuf {
        let n = n.min(self.len);
        let mut head = self.share();
        head.truncate(n);
        self.advance(n);
        head
    }

    fn truncate(&mut self, n: usize) {
        if n >= self.len {
            return;
        }
        let mut remaining = n;
        let mut keep = 0;
        for seg in self.segs.iter_mut() {
            if remaining == 0 {
                break;
            }
            if seg.len() > remaining {
                seg.end = seg.start + remaining;
            }
            remaining -= seg.len().min(remaining);
            keep += 1;
        }
        self.segs.truncate(keep);
        self.len = n;
    }

    /// Full linear copy, mostly for assertions.
    pub fn to_vec(&self) -> alloc::vec::Vec<u8> {
        let mut out = vec![0; self.len];
        self.copy_to(&mut out, 0);
        out
    }

    /// Iterates the live byte slices of the chain in order.
    pub fn slices(&self) -> impl Iterator<Item = &[u8]> {
        self.segs.iter().map(|s| s.bytes())
    }
}

impl core::fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketBuf")
            .field("len", &self.len)
            .field("segments", &self.segs.len())
            .finish()
    }
}
