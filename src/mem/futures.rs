//! Asynchronous memory access - typically used by a Host.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;

use crate::io::{Reader, Writer};
use crate::{Error, Result};

/// Trait for accessing the PRU's memory from the host.
///
/// Async version, typically used for accessing the PRU over a debug
/// interface, `/dev/mem` or another asynchronous path.
#[async_trait(?Send)]
pub trait AsyncMemoryIo {
    /// Bulk read access
    async fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Bulk write access
    async fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Little-endian half-word read
    async fn read_u16(&mut self, addr: u32) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(addr, &mut buf).await?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Little-endian word read
    async fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Little-endian half-word write
    async fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        self.write_bytes(addr, &value.to_le_bytes()).await
    }

    /// Little-endian word write
    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_bytes(addr, &value.to_le_bytes()).await
    }
}

/// Memory I/O implementation using [`crate::io::Reader`] and
/// [`crate::io::Writer`] traits.
pub struct ReaderWriterIo<'a, R: Reader, W: Writer> {
    reader: &'a mut R,
    writer: &'a mut W,
}

impl<'a, R: Reader, W: Writer> ReaderWriterIo<'a, R, W> {
    /// Create new instance
    pub fn new(reader: &'a mut R, writer: &'a mut W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait(?Send)]
impl<R: Reader, W: Writer> AsyncMemoryIo for ReaderWriterIo<'_, R, W> {
    async fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.reader.read(addr, buf).await.map_err(|_| Error::Io)
    }

    async fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.writer.write(addr, data).await.map_err(|_| Error::Io)
    }
}
