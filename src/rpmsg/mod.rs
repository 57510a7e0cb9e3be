//! RPMsg messages carried in vring buffers.
//!
//! Every buffer starts with a 16 byte header followed by the payload:
//!
//! ```text
//! src: u32, dst: u32, reserved: u32, len: u16, flags: u16, data[len]
//! ```
//!
//! Endpoint addresses are opaque numbers.  Address [`RPMSG_NS_ADDR`] is the
//! host's name service, which learns about firmware channels from
//! [`NsMessage`]s sent to it.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

pub mod transport;

pub use transport::Transport;

use crate::{Error, Result};

/// Size of every buffer in both vrings.
pub const RPMSG_BUF_SIZE: usize = 512;

/// Size of [`RpmsgHeader`] on the wire.
pub const RPMSG_HDR_SIZE: usize = 16;

/// Largest payload a buffer carries.
pub const RPMSG_MAX_PAYLOAD: usize = RPMSG_BUF_SIZE - RPMSG_HDR_SIZE;

/// Address of the host's name service.
pub const RPMSG_NS_ADDR: u32 = 53;

/// Size of the name and description fields of a name service message.
pub const RPMSG_NAME_SIZE: usize = 32;

/// Size of [`NsMessage`] on the wire.
pub const RPMSG_NS_SIZE: usize = 2 * RPMSG_NAME_SIZE + 8;

/// Name service flags.
pub const RPMSG_NS_CREATE: u32 = 0;
pub const RPMSG_NS_DESTROY: u32 = 1;

/// Buffer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpmsgHeader {
    pub src: u32,
    pub dst: u32,
    pub len: u16,
    pub flags: u16,
}

impl RpmsgHeader {
    pub fn to_bytes(&self) -> [u8; RPMSG_HDR_SIZE] {
        let mut buf = [0u8; RPMSG_HDR_SIZE];
        buf[0..4].copy_from_slice(&self.src.to_le_bytes());
        buf[4..8].copy_from_slice(&self.dst.to_le_bytes());
        // 8..12 reserved
        buf[12..14].copy_from_slice(&self.len.to_le_bytes());
        buf[14..16].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; RPMSG_HDR_SIZE]) -> Self {
        Self {
            src: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            dst: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            len: u16::from_le_bytes([buf[12], buf[13]]),
            flags: u16::from_le_bytes([buf[14], buf[15]]),
        }
    }
}

/// Name, description and port of the firmware's one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelIdentity {
    /// Selects the host driver; `rpmsg-pru` probes `rpmsg_pru`
    pub name: &'static str,
    pub desc: &'static str,
    pub port: u32,
}

impl Default for ChannelIdentity {
    fn default() -> Self {
        Self {
            name: "rpmsg-pru",
            desc: "Channel 30",
            port: 30,
        }
    }
}

/// Name service announcement body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsMessage {
    pub name: [u8; RPMSG_NAME_SIZE],
    pub desc: [u8; RPMSG_NAME_SIZE],
    pub addr: u32,
    pub flags: u32,
}

impl NsMessage {
    /// Names longer than the field are rejected rather than truncated, as
    /// the host matches drivers on the exact name.
    pub fn new(identity: &ChannelIdentity, flags: u32) -> Result<Self> {
        Ok(Self {
            name: fixed_str(identity.name)?,
            desc: fixed_str(identity.desc)?,
            addr: identity.port,
            flags,
        })
    }

    pub fn to_bytes(&self) -> [u8; RPMSG_NS_SIZE] {
        let mut buf = [0u8; RPMSG_NS_SIZE];
        buf[..RPMSG_NAME_SIZE].copy_from_slice(&self.name);
        buf[RPMSG_NAME_SIZE..2 * RPMSG_NAME_SIZE].copy_from_slice(&self.desc);
        buf[64..68].copy_from_slice(&self.addr.to_le_bytes());
        buf[68..72].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < RPMSG_NS_SIZE {
            return Err(Error::BufferTooSmall);
        }
        let mut name = [0u8; RPMSG_NAME_SIZE];
        let mut desc = [0u8; RPMSG_NAME_SIZE];
        name.copy_from_slice(&buf[..RPMSG_NAME_SIZE]);
        desc.copy_from_slice(&buf[RPMSG_NAME_SIZE..2 * RPMSG_NAME_SIZE]);
        Ok(Self {
            name,
            desc,
            addr: u32::from_le_bytes([buf[64], buf[65], buf[66], buf[67]]),
            flags: u32::from_le_bytes([buf[68], buf[69], buf[70], buf[71]]),
        })
    }

    /// Name up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        until_nul(&self.name)
    }

    /// Description up to the first NUL.
    pub fn desc_bytes(&self) -> &[u8] {
        until_nul(&self.desc)
    }
}

fn fixed_str(s: &str) -> Result<[u8; RPMSG_NAME_SIZE]> {
    // Leave room for the terminating NUL.
    if s.len() >= RPMSG_NAME_SIZE {
        return Err(Error::PayloadTooLarge);
    }
    let mut out = [0u8; RPMSG_NAME_SIZE];
    out[..s.len()].copy_from_slice(s.as_bytes());
    Ok(out)
}

fn until_nul(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    &field[..end]
}

/// A received message.
#[derive(Clone)]
pub struct Message {
    pub src: u32,
    pub dst: u32,
    len: usize,
    data: [u8; RPMSG_MAX_PAYLOAD],
}

impl Message {
    pub const fn empty() -> Self {
        Self {
            src: 0,
            dst: 0,
            len: 0,
            data: [0; RPMSG_MAX_PAYLOAD],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub(crate) fn fill(&mut self, src: u32, dst: u32, len: usize) -> &mut [u8] {
        self.src = src;
        self.dst = dst;
        self.len = len;
        &mut self.data[..len]
    }
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("payload", &self.payload())
            .finish()
    }
}
