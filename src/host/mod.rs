//! Host side of the link: the remoteproc loader and the RPMsg driver, played
//! against the PRU's memory from outside.
//!
//! Useful on the bench, where the PRU is reached over a debug interface and
//! no Linux remoteproc stack is running, and for exercising the firmware
//! end to end.
//!
//! See [`AsyncRpmsgHost`] for usage.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

pub mod futures;

pub use futures::{AsyncDelay, AsyncRpmsgHost};

use alloc::string::String;
use alloc::vec::Vec;

/// PRU-ICSS INTC as seen from the ARM.
pub const HOST_INTC_ADDR: u32 = 0x4A32_0000;

/// Local address the host sends requests from.
pub const HOST_LOCAL_ADDR: u32 = 1024;

/// Configuration for [`AsyncRpmsgHost`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostConfig {
    /// Resource table, as seen from the host
    pub rsc_table_addr: u32,
    /// INTC, as seen from the host
    pub intc_addr: u32,
    /// Memory for the vrings and their buffers, as seen by both sides
    pub carveout_addr: u32,
    /// Source address of requests
    pub local_addr: u32,
    /// How many times to poll before giving up on a reply
    pub max_polls: u32,
}

impl HostConfig {
    pub fn new(rsc_table_addr: u32, carveout_addr: u32) -> Self {
        Self {
            rsc_table_addr,
            intc_addr: HOST_INTC_ADDR,
            carveout_addr,
            local_addr: HOST_LOCAL_ADDR,
            max_polls: 1000,
        }
    }
}

/// A channel the firmware announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub desc: String,
    pub port: u32,
}

/// A message received from the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMessage {
    pub src: u32,
    pub dst: u32,
    pub payload: Vec<u8>,
}
