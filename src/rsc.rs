//! Resource table and interrupt map read by the remoteproc loader.
//!
//! The loader parses [`RESOURCE_TABLE`] before the firmware starts, allocates
//! the two vrings it asks for, and writes their device addresses and notify
//! ids back into the table.  Later, once the host's RPMsg driver is up, it
//! sets [`VIRTIO_CONFIG_S_DRIVER_OK`] in the vdev status byte.  Until then
//! the vring entries hold [`FW_RSC_ADDR_ANY`] and must not be used.
//!
//! The firmware never writes the table.  It reads it through [`RscTable`],
//! which hands out [`UnboundVring`]s that can only be turned into
//! [`BoundVring`]s with the [`HostReady`] token returned by
//! [`RscTable::poll_ready()`].

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

use core::cell::UnsafeCell;
use core::mem::{offset_of, size_of};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::intc::{HOST_INTERRUPT_ARM_TO_PRU, INTC_CHANNEL_ARM_TO_PRU, SYSEVT_ARM_TO_PRU};
use crate::mem::{MemoryIo, check_aligned};
use crate::{Error, Result};

/// Only version 1 resource tables are understood by the loader.
pub const RSC_VERSION: u32 = 1;

/// Resource type of a virtio device entry.
pub const TYPE_VDEV: u32 = 3;

/// Virtio device id of an RPMsg device.
pub const VIRTIO_ID_RPMSG: u32 = 7;

/// Placeholder for an address the loader fills in.
pub const FW_RSC_ADDR_ANY: u32 = 0xFFFF_FFFF;

/// Name service notifications feature bit.
pub const VIRTIO_RPMSG_F_NS: u32 = 0;

/// Features offered by this firmware.
pub const RPMSG_FEATURES: u32 = 1 << VIRTIO_RPMSG_F_NS;

/// Vdev status bits, written by the host.
pub const VIRTIO_CONFIG_S_ACKNOWLEDGE: u8 = 1 << 0;
pub const VIRTIO_CONFIG_S_DRIVER: u8 = 1 << 1;
pub const VIRTIO_CONFIG_S_DRIVER_OK: u8 = 1 << 2;

/// Number of buffers in each vring.  Must be a power of two.
pub const VRING_NUM: u32 = 16;

/// Alignment of the used ring within each vring.
pub const VRING_ALIGN: u32 = 16;

/// Number of table entries.
pub const NUM_ENTRIES: usize = 1;

/// Number of vrings; the transport supports exactly two.
pub const NUM_VRINGS: usize = 2;

/// Interrupt map resource type.
pub const IRQ_MAP_TYPE: u8 = 0;

/// Header common to every resource table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableHeader {
    pub ver: u32,
    pub num: u32,
    pub reserved: [u32; 2],
}

/// Virtio device entry (`fw_rsc_vdev`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VdevDescriptor {
    pub rsc_type: u32,
    pub id: u32,
    pub notify_id: u32,
    /// Features offered by the device (firmware)
    pub dfeatures: u32,
    /// Features accepted by the guest (host driver)
    pub gfeatures: u32,
    pub config_len: u32,
    /// Written by the host as its driver comes up
    pub status: u8,
    pub num_of_vrings: u8,
    pub reserved: [u8; 2],
}

/// Vring entry (`fw_rsc_vdev_vring`), packed straight after the vdev entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VringDescriptor {
    /// Device address, [`FW_RSC_ADDR_ANY`] until the loader allocates it
    pub da: u32,
    pub align: u32,
    /// Capacity in buffers
    pub num: u32,
    /// Filled in by the loader
    pub notify_id: u32,
    pub reserved: u32,
}

/// The firmware's resource table: one RPMsg vdev with two vrings.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceTable {
    pub header: TableHeader,
    pub offset: [u32; NUM_ENTRIES],
    pub vdev: VdevDescriptor,
    pub vring0: VringDescriptor,
    pub vring1: VringDescriptor,
}

const _: () = assert!(size_of::<ResourceTable>() == 88);

impl VringDescriptor {
    pub const fn unresolved(num: u32, align: u32) -> Self {
        Self {
            da: FW_RSC_ADDR_ANY,
            align,
            num,
            notify_id: 0,
            reserved: 0,
        }
    }
}

impl ResourceTable {
    /// The table as shipped in the firmware image, before the loader has
    /// touched it.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            header: TableHeader {
                ver: RSC_VERSION,
                num: NUM_ENTRIES as u32,
                reserved: [0, 0],
            },
            offset: [Self::vdev_offset()],
            vdev: VdevDescriptor {
                rsc_type: TYPE_VDEV,
                id: VIRTIO_ID_RPMSG,
                notify_id: 0,
                dfeatures: RPMSG_FEATURES,
                gfeatures: 0,
                config_len: 0,
                status: 0,
                num_of_vrings: NUM_VRINGS as u8,
                reserved: [0, 0],
            },
            vring0: VringDescriptor::unresolved(VRING_NUM, VRING_ALIGN),
            vring1: VringDescriptor::unresolved(VRING_NUM, VRING_ALIGN),
        }
    }

    pub const fn vdev_offset() -> u32 {
        offset_of!(ResourceTable, vdev) as u32
    }

    pub const fn status_offset() -> u32 {
        Self::vdev_offset() + offset_of!(VdevDescriptor, status) as u32
    }

    pub const fn gfeatures_offset() -> u32 {
        Self::vdev_offset() + offset_of!(VdevDescriptor, gfeatures) as u32
    }

    pub const fn vring_offset(index: usize) -> u32 {
        match index {
            0 => offset_of!(ResourceTable, vring0) as u32,
            _ => offset_of!(ResourceTable, vring1) as u32,
        }
    }

    /// Check the invariants the loader relies on.
    pub fn validate(&self) -> Result<()> {
        if self.header.ver != RSC_VERSION {
            return Err(Error::InvalidTable);
        }
        if self.header.num as usize != self.offset.len() {
            return Err(Error::InvalidTable);
        }
        if self.offset[0] != Self::vdev_offset() {
            return Err(Error::InvalidTable);
        }
        if self.vdev.rsc_type != TYPE_VDEV || self.vdev.id != VIRTIO_ID_RPMSG {
            return Err(Error::InvalidTable);
        }
        if self.vdev.num_of_vrings as usize != NUM_VRINGS {
            return Err(Error::InvalidTable);
        }
        for vring in [&self.vring0, &self.vring1] {
            if !vring.num.is_power_of_two() || !vring.align.is_power_of_two() {
                return Err(Error::InvalidTable);
            }
        }
        Ok(())
    }

    /// Raw bytes of the table, as the loader sees them.
    pub fn as_bytes(&self) -> &[u8] {
        // ResourceTable is repr(C) and has no padding.
        unsafe {
            core::slice::from_raw_parts(self as *const Self as *const u8, size_of::<Self>())
        }
    }

    /// Parse a table read out of the PRU's memory.  Not validated.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < size_of::<Self>() {
            return Err(Error::BufferTooSmall);
        }
        let word =
            |off: usize| u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        let vdev = Self::vdev_offset() as usize;
        let vring = |index: usize| {
            let base = Self::vring_offset(index) as usize;
            VringDescriptor {
                da: word(base),
                align: word(base + 4),
                num: word(base + 8),
                notify_id: word(base + 12),
                reserved: word(base + 16),
            }
        };
        let status = Self::status_offset() as usize;
        Ok(Self {
            header: TableHeader {
                ver: word(0),
                num: word(4),
                reserved: [word(8), word(12)],
            },
            offset: [word(16)],
            vdev: VdevDescriptor {
                rsc_type: word(vdev),
                id: word(vdev + 4),
                notify_id: word(vdev + 8),
                dfeatures: word(vdev + 12),
                gfeatures: word(vdev + 16),
                config_len: word(vdev + 20),
                status: buf[status],
                num_of_vrings: buf[status + 1],
                reserved: [buf[status + 2], buf[status + 3]],
            },
            vring0: vring(0),
            vring1: vring(1),
        })
    }
}

/// One system event routed into the PRU (`ch_map`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrqMapEntry {
    pub sysevt: u8,
    pub channel: u8,
    pub host_int: u8,
}

/// Interrupt routing requested from the loader (`pru_irq_rsc`).  Only
/// interrupts going to the PRU are listed.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrqMap {
    pub map_type: u8,
    pub num_evts: u8,
    pub map: [IrqMapEntry; 1],
}

impl IrqMap {
    pub fn validate(&self) -> Result<()> {
        if self.map_type != IRQ_MAP_TYPE || self.num_evts as usize != self.map.len() {
            return Err(Error::InvalidTable);
        }
        Ok(())
    }
}

/// Cell for data the loader or host writes behind the firmware's back.
///
/// Never read through a reference; take [`HostShared::addr()`] and use a
/// [`MemoryIo`] so every access is volatile.
#[repr(transparent)]
pub struct HostShared<T>(UnsafeCell<T>);

// The firmware is single threaded and only performs volatile reads.
unsafe impl<T> Sync for HostShared<T> {}

impl<T> HostShared<T> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Device address of the contents.
    pub fn addr(&self) -> u32 {
        self.0.get() as usize as u32
    }
}

#[used]
#[cfg_attr(target_os = "none", unsafe(link_section = ".resource_table"))]
pub static RESOURCE_TABLE: HostShared<ResourceTable> = HostShared::new(ResourceTable::new());

// Read by the loader only; nothing in the firmware references it.
#[used]
#[cfg_attr(target_os = "none", unsafe(link_section = ".pru_irq_map"))]
pub static IRQ_MAP: IrqMap = IrqMap {
    map_type: IRQ_MAP_TYPE,
    num_evts: 1,
    map: [IrqMapEntry {
        sysevt: SYSEVT_ARM_TO_PRU,
        channel: INTC_CHANNEL_ARM_TO_PRU,
        host_int: HOST_INTERRUPT_ARM_TO_PRU,
    }],
};

/// Proof that the host set DRIVER_OK.  Only [`RscTable::poll_ready()`]
/// creates one.
#[derive(Debug, Clone, Copy)]
pub struct HostReady {
    _private: (),
}

/// A vring entry the loader may not have filled in yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnboundVring {
    index: usize,
    addr: u32,
}

/// A vring entry after the loader filled it in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundVring {
    pub da: u32,
    pub align: u32,
    pub num: u32,
    pub notify_id: u32,
}

impl UnboundVring {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Read the loader's allocation for this vring.
    pub fn resolve<M: MemoryIo>(&self, io: &mut M, _ready: &HostReady) -> Result<BoundVring> {
        let da = io.read_u32(self.addr + offset_of!(VringDescriptor, da) as u32)?;
        let align = io.read_u32(self.addr + offset_of!(VringDescriptor, align) as u32)?;
        let num = io.read_u32(self.addr + offset_of!(VringDescriptor, num) as u32)?;
        let notify_id = io.read_u32(self.addr + offset_of!(VringDescriptor, notify_id) as u32)?;

        if da == FW_RSC_ADDR_ANY {
            return Err(Error::Unresolved);
        }
        if !num.is_power_of_two() || num > u16::MAX as u32 {
            return Err(Error::InvalidTable);
        }
        check_aligned(da, align)?;

        debug!(
            "vring{} bound at {da:#010X}, {num} buffers, notify id {notify_id}",
            self.index
        );
        Ok(BoundVring {
            da,
            align,
            num,
            notify_id,
        })
    }
}

/// The firmware's view of a resource table in memory.
pub struct RscTable<M: MemoryIo> {
    io: M,
    base: u32,
}

impl<M: MemoryIo> RscTable<M> {
    /// Table at an explicit address.
    pub fn new(io: M, base: u32) -> Self {
        Self { io, base }
    }

    /// The table linked into this image.
    pub fn linked(io: M) -> Self {
        Self::new(io, RESOURCE_TABLE.addr())
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Current vdev status byte.
    pub fn status(&mut self) -> Result<u8> {
        self.io.read_u8(self.base + ResourceTable::status_offset())
    }

    /// Features the host driver accepted.
    pub fn gfeatures(&mut self) -> Result<u32> {
        self.io.read_u32(self.base + ResourceTable::gfeatures_offset())
    }

    /// Non-blocking readiness gate.
    pub fn poll_ready(&mut self) -> Result<Option<HostReady>> {
        if self.status()? & VIRTIO_CONFIG_S_DRIVER_OK != 0 {
            Ok(Some(HostReady { _private: () }))
        } else {
            Ok(None)
        }
    }

    pub fn vring(&self, index: usize) -> UnboundVring {
        UnboundVring {
            index,
            addr: self.base + ResourceTable::vring_offset(index),
        }
    }
}
