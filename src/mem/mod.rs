//! Access to memory shared between the PRU and the host, and to the PRU's
//! memory-mapped peripherals.
//!
//! Addresses are absolute, as seen by whoever owns the accessor: the PRU's
//! local view for [`MemoryIo`] implementations running on the coprocessor,
//! the host's view for [`AsyncMemoryIo`] implementations.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncMemoryIo, ReaderWriterIo};
pub use sync::{MemoryIo, RamIo};

use crate::{Error, Result};

/// Round `addr` up to the next multiple of `align`, which must be a power
/// of two.
pub const fn align_up(addr: u32, align: u32) -> u32 {
    (addr + align - 1) & !(align - 1)
}

pub(crate) fn check_aligned(addr: u32, align: u32) -> Result<()> {
    if align == 0 || !align.is_power_of_two() || addr % align != 0 {
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}
