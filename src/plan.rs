//! Splitting of byte ranges into alignment bounded pieces.
//!
//! Page program wraps around inside the addressed page, so a program burst must never cross a
//! page boundary. Erases work on whole sectors. Both constraints are the same walk over a
//! range with a different unit, which is what [`Chunks`] does.

/// A contiguous piece of the address space
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub addr: u32,
    pub len: u32,
}

impl Span {
    pub fn end(&self) -> u32 {
        self.addr + self.len
    }
}

/// Iterator over the pieces of `[addr, addr + len)` that stay within one `unit` aligned block.
///
/// The first piece runs up to the next unit boundary, the following ones are whole units and the
/// last one is clipped to the end of the range. An empty range yields nothing.
#[derive(Debug, Clone)]
pub struct Chunks {
    cursor: u32,
    end: u32,
    unit: u32,
}

impl Chunks {
    /// `unit` must be non zero and `addr + len` must not overflow
    pub fn new(addr: u32, len: u32, unit: u32) -> Self {
        debug_assert!(unit != 0);
        Self {
            cursor: addr,
            end: addr + len,
            unit,
        }
    }
}

impl Iterator for Chunks {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.cursor >= self.end {
            return None;
        }
        let unit_remain = self.unit - self.cursor % self.unit;
        let len = unit_remain.min(self.end - self.cursor);
        let span = Span {
            addr: self.cursor,
            len,
        };
        self.cursor += len;
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.cursor >= self.end {
            return (0, Some(0));
        }
        let first = self.cursor - self.cursor % self.unit;
        let n = (self.end - first).div_ceil(self.unit) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}

/// Program bursts for writing `len` bytes at `addr`
pub fn page_bursts(addr: u32, len: u32, page_size: u32) -> Chunks {
    Chunks::new(addr, len, page_size)
}

/// Sector strides to probe and erase before writing `len` bytes at `addr`
pub fn sector_strides(addr: u32, len: u32, sector_size: u32) -> Chunks {
    Chunks::new(addr, len, sector_size)
}

/// Start of the `unit` aligned block containing `addr`
pub fn align_down(addr: u32, unit: u32) -> u32 {
    addr - addr % unit
}
