//! Firmware core for a PRU coprocessor that talks to its Linux host over
//! RPMsg and decodes a UI-1203 style meter bitstream with cycle-counted
//! timing.
//!
//! The PRU (Programmable Real-time Unit) sits beside the ARM host on AM335x
//! parts.  The host's remoteproc loader reads a resource table out of the
//! firmware image, allocates two virtio rings in shared memory, writes their
//! addresses back into the table and finally sets a status bit saying the
//! RPMsg driver is ready.  From then on the two sides exchange small packets
//! through the rings, notifying each other by raising system events on the
//! PRU-ICSS interrupt controller.
//!
//! The second half of the crate is the meter decoder: the PRU generates a
//! clock line itself, samples a single data line a fixed number of cycles
//! after each edge, and assembles start/data/parity/stop framed words.
//!
//! `no_std`.  The `async` feature (default) adds a host-side peer which
//! requires `alloc`; compile the firmware with `--no-default-features`.
//!
//! ## Architecture
//!
//! - **Resource table** ([`rsc`]) - static data the loader parses before the
//!   firmware runs.  Vring descriptors are two-phase: an [`rsc::UnboundVring`]
//!   only becomes an [`rsc::BoundVring`] after the readiness gate has been
//!   passed, so the rings cannot be touched before the loader filled them in.
//! - **Event router** ([`intc`]) - raise, check and acknowledge the two
//!   system events shared with the host.
//! - **Virtqueues** ([`vring`]) - the device side of a legacy split virtqueue.
//! - **RPMsg transport** ([`rpmsg`]) - send/receive over the pair of
//!   virtqueues and the name-service announcement.
//! - **Meter decoder** ([`meter`]) - the framed bit decoder and its timed
//!   sampling driver.
//! - **Control loop** ([`firmware`]) - reset, wait for host, announce, then
//!   service messages and the meter forever.
//! - **Hardware** ([`hw`]) - PRU-ICSS register bindings for the traits above.
//! - **Host peer** (`host`, feature `async`) - the loader and host RPMsg
//!   driver halves, used for bench testing over a debug interface.
//!
//! All hardware access goes through [`mem::MemoryIo`], so every component can
//! be exercised against a simulated register file.
//!
//! ## Getting Started
//!
//! **Firmware**:
//! 1. Link the crate into the PRU image; [`rsc::RESOURCE_TABLE`] and
//!    [`rsc::IRQ_MAP`] land in the `.resource_table` and `.pru_irq_map`
//!    sections the loader expects.
//! 2. Build a [`firmware::Firmware`] with [`mem::RamIo`] and a
//!    [`firmware::Config`] and call [`firmware::Firmware::run()`].
//!
//! **Host**:
//! 1. Implement [`io::Reader`] and [`io::Writer`] for your access path to the
//!    PRU's memory.
//! 2. Create an `AsyncRpmsgHost`, then `attach()`, `provision()` and
//!    `set_driver_ok()`.
//! 3. `wait_announcement()` for the firmware's channel, then `request()`.
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async host peer and memory traits (requires
//!   `alloc`).

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "async")]
extern crate alloc;

pub mod firmware;
#[cfg(feature = "async")]
pub mod host;
pub mod hw;
pub mod intc;
pub mod io;
pub mod mem;
pub mod meter;
pub mod rpmsg;
pub mod rsc;
pub mod vring;

#[cfg(test)]
pub(crate) mod sim;

/// Firmware errors
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// Host has not marked the virtual device ready
    ResourceNotReady,
    /// Name-service announcement was not accepted
    HandshakeUnacknowledged,
    /// No free buffer in the outbound ring
    RingFull,
    /// Parity bit did not match the data bits
    ParityMismatch,
    /// Start or stop bit missing
    FramingError,
    /// Receive buffer is full
    BufferFull,
    /// Payload too large for a ring buffer
    PayloadTooLarge,
    /// Buffer too small for operation
    BufferTooSmall,
    /// Loader has not filled in a ring descriptor
    Unresolved,
    /// Resource table is malformed
    InvalidTable,
    /// System event number out of range
    InvalidEvent,
    /// Configuration value out of range
    InvalidConfig,
    /// Host posted a descriptor that does not fit the ring
    BadDescriptor,
    /// Address not aligned
    NotAligned,
    /// Bounded retry exhausted
    Timeout,
    /// I/O error
    Io,
}

/// Type to represent the result of a firmware operation
pub type Result<T> = core::result::Result<T, Error>;
