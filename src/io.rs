//! Async I/O traits for reaching the PRU's memory from the host.
//!
//! These are the lowest layer the host-side peer is built on.  They are
//! byte oriented and know nothing about virtio or RPMsg; wrap an
//! implementation pair in [`crate::mem::ReaderWriterIo`] to get an
//! [`crate::mem::AsyncMemoryIo`].
//!
//! # Possible implementations
//!
//! - On the BeagleBone itself: read/write through a `/dev/mem` mapping of the
//!   PRU-ICSS and the DDR carveout
//! - From a bench PC: read/write over JTAG or another debug interface
//! - In tests: read/write a simulated memory image
//!
//! # Address Space
//!
//! The methods use absolute addresses.  The implementation is responsible
//! for translating these into whatever it uses internally (mmap offsets,
//! debug port transactions, etc.).

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

/// Reader trait.
pub trait Reader {
    /// The error type returned by read operations.
    ///
    /// This allows implementations to use their own error types
    /// (e.g., `std::io::Error` for `/dev/mem`, custom errors for JTAG).
    type Error: core::fmt::Debug;

    /// Read bytes at the specified absolute address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The absolute address to read from (e.g., `0x4A30_0000`)
    /// * `buf` - Buffer to fill with the read data
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The address is outside the mapped regions
    /// - The underlying read operation fails
    fn read(
        &mut self,
        addr: u32,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// Writer trait.
pub trait Writer {
    /// The error type returned by write operations.
    type Error: core::fmt::Debug;

    /// Write bytes at the specified absolute address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The absolute address to write to
    /// * `data` - Data to write
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The address is outside the mapped regions
    /// - The underlying write operation fails
    fn write(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}
