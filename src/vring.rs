//! Legacy split virtqueues, device side.
//!
//! A vring is three areas laid out back to back in shared memory:
//!
//! ```text
//! desc   num x { addr: u64, len: u32, flags: u16, next: u16 }
//! avail  { flags: u16, idx: u16, ring: [u16; num], used_event: u16 }
//! used   { flags: u16, idx: u16, ring: [{ id: u32, len: u32 }; num], avail_event: u16 }
//! ```
//!
//! with the used area starting on the vring's alignment.  The host (driver)
//! owns the descriptor table and the avail ring; the PRU (device) owns the
//! used ring.  Each side only ever writes its own cursor, so no locking is
//! needed.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::mem::{MemoryIo, align_up};
use crate::rsc::BoundVring;
use crate::{Error, Result};

/// Size of one descriptor table entry.
pub const VRING_DESC_SIZE: u32 = 16;

/// Size of one used ring element.
pub const VRING_USED_ELEM_SIZE: u32 = 8;

/// Descriptor continues via `next`.
pub const VRING_DESC_F_NEXT: u16 = 1;

/// Descriptor is device write-only.
pub const VRING_DESC_F_WRITE: u16 = 2;

/// Driver does not want to be interrupted when buffers are used.
pub const VRING_AVAIL_F_NO_INTERRUPT: u16 = 1;

/// Addresses of the parts of one vring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VringLayout {
    pub desc: u32,
    pub avail: u32,
    pub used: u32,
    pub num: u16,
}

impl VringLayout {
    pub fn new(da: u32, num: u32, align: u32) -> Self {
        let avail = da + num * VRING_DESC_SIZE;
        let used = align_up(avail + 2 * (3 + num), align);
        Self {
            desc: da,
            avail,
            used,
            num: num as u16,
        }
    }

    /// Total bytes occupied by a vring of `num` buffers.
    pub fn size(num: u32, align: u32) -> u32 {
        let layout = Self::new(0, num, align);
        layout.used + 2 * 3 + VRING_USED_ELEM_SIZE * num
    }

    pub fn desc_addr(&self, index: u16) -> u32 {
        self.desc + index as u32 * VRING_DESC_SIZE
    }

    pub fn avail_flags_addr(&self) -> u32 {
        self.avail
    }

    pub fn avail_idx_addr(&self) -> u32 {
        self.avail + 2
    }

    /// Slot for a free-running index; wraps at `num`.
    pub fn avail_ring_addr(&self, idx: u16) -> u32 {
        self.avail + 4 + 2 * (idx & self.mask()) as u32
    }

    pub fn used_flags_addr(&self) -> u32 {
        self.used
    }

    pub fn used_idx_addr(&self) -> u32 {
        self.used + 2
    }

    /// Slot for a free-running index; wraps at `num`.
    pub fn used_elem_addr(&self, idx: u16) -> u32 {
        self.used + 4 + VRING_USED_ELEM_SIZE * (idx & self.mask()) as u32
    }

    fn mask(&self) -> u16 {
        self.num - 1
    }
}

/// Buffer taken off the avail ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvailBuf {
    /// Descriptor index, handed back in [`Virtqueue::add_used_buf()`]
    pub head: u16,
    pub addr: u32,
    pub len: u32,
}

/// Device side of one vring.
pub struct Virtqueue<M: MemoryIo> {
    io: M,
    layout: VringLayout,
    last_avail_idx: u16,
    used_idx: u16,
}

impl<M: MemoryIo> Virtqueue<M> {
    pub fn new(io: M, vring: &BoundVring) -> Self {
        Self {
            io,
            layout: VringLayout::new(vring.da, vring.num, vring.align),
            last_avail_idx: 0,
            used_idx: 0,
        }
    }

    pub fn layout(&self) -> &VringLayout {
        &self.layout
    }

    /// Take the next buffer the host made available, if any.
    ///
    /// A malformed entry is consumed before [`Error::BadDescriptor`] is
    /// returned, so the next call moves on to the entry after it.  An
    /// in-range descriptor is also handed back to the host unused.
    pub fn get_avail_buf(&mut self) -> Result<Option<AvailBuf>> {
        let avail_idx = self.io.read_u16(self.layout.avail_idx_addr())?;
        if avail_idx == self.last_avail_idx {
            return Ok(None);
        }

        let head = self
            .io
            .read_u16(self.layout.avail_ring_addr(self.last_avail_idx))?;
        self.last_avail_idx = self.last_avail_idx.wrapping_add(1);
        if head >= self.layout.num {
            warn!("Descriptor {head} out of range, skipped");
            return Err(Error::BadDescriptor);
        }

        let desc = self.layout.desc_addr(head);
        let addr_lo = self.io.read_u32(desc)?;
        let addr_hi = self.io.read_u32(desc + 4)?;
        let len = self.io.read_u32(desc + 8)?;
        if addr_hi != 0 {
            warn!("Descriptor {head} above 4GB, returned unused");
            self.add_used_buf(head, 0)?;
            return Err(Error::BadDescriptor);
        }

        Ok(Some(AvailBuf {
            head,
            addr: addr_lo,
            len,
        }))
    }

    /// Return the most recently taken buffer unused.  The host never
    /// retracts avail entries, so it is still there.
    pub fn put_back(&mut self) {
        self.last_avail_idx = self.last_avail_idx.wrapping_sub(1);
    }

    /// Hand a buffer back to the host, `len` bytes of it written.
    pub fn add_used_buf(&mut self, head: u16, len: u32) -> Result<()> {
        if head >= self.layout.num {
            return Err(Error::BadDescriptor);
        }
        let elem = self.layout.used_elem_addr(self.used_idx);
        self.io.write_u32(elem, head as u32)?;
        self.io.write_u32(elem + 4, len)?;

        // Publish the element by bumping the index last
        self.used_idx = self.used_idx.wrapping_add(1);
        self.io.write_u16(self.layout.used_idx_addr(), self.used_idx)
    }

    /// Whether the host wants an interrupt for used buffers.
    pub fn needs_kick(&mut self) -> Result<bool> {
        let flags = self.io.read_u16(self.layout.avail_flags_addr())?;
        Ok(flags & VRING_AVAIL_F_NO_INTERRUPT == 0)
    }
}
