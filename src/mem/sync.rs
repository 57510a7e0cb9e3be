//! Synchronous memory access - used by the firmware.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

use crate::Result;

/// Trait for accessing shared memory and device registers from the PRU.
///
/// Each sized access must be performed as a single access of that width, as
/// the PRU-ICSS registers and the virtio ring indices are only coherent when
/// accessed that way.
pub trait MemoryIo {
    /// Single byte read
    fn read_u8(&mut self, addr: u32) -> Result<u8>;

    /// Single half-word read
    fn read_u16(&mut self, addr: u32) -> Result<u16>;

    /// Single word read
    fn read_u32(&mut self, addr: u32) -> Result<u32>;

    /// Single byte write
    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()>;

    /// Single half-word write
    fn write_u16(&mut self, addr: u32, value: u16) -> Result<()>;

    /// Single word write
    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Bulk read access, no need for atomicity
    fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_u8(addr + i as u32)?;
        }
        Ok(())
    }

    /// Bulk write access, no need for atomicity
    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        for (i, byte) in data.iter().enumerate() {
            self.write_u8(addr + i as u32, *byte)?;
        }
        Ok(())
    }
}

/// Memory I/O implementation using direct volatile access.  Used on the PRU,
/// where every address in its local map, and the OCP port beyond it, is
/// directly dereferenceable.
#[derive(Clone, Copy)]
pub struct RamIo;

impl RamIo {
    /// Create a new RamIo instance.
    ///
    /// ```rust
    /// use ui1203_pru::mem::RamIo;
    /// static RAM_IO: RamIo = RamIo::new();
    /// ```
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {}
    }
}

impl MemoryIo for RamIo {
    fn read_u8(&mut self, addr: u32) -> Result<u8> {
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u8) })
    }

    fn read_u16(&mut self, addr: u32) -> Result<u16> {
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u16) })
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        Ok(unsafe { core::ptr::read_volatile(addr as usize as *const u32) })
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u8, value) };
        Ok(())
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u16, value) };
        Ok(())
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) };
        Ok(())
    }
}
