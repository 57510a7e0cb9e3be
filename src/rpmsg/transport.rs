//! RPMsg transport over a pair of vrings - the PRU side.
//!
//! vring0 carries PRU to host traffic: the host posts empty buffers which the
//! PRU fills and hands back.  vring1 carries host to PRU traffic: the host
//! posts filled buffers which the PRU reads and hands back empty.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::intc::{EventRouter, Intc};
use crate::mem::MemoryIo;
use crate::rpmsg::{
    ChannelIdentity, Message, NsMessage, RPMSG_BUF_SIZE, RPMSG_HDR_SIZE, RPMSG_MAX_PAYLOAD,
    RPMSG_NS_ADDR, RPMSG_NS_CREATE, RpmsgHeader,
};
use crate::rsc::BoundVring;
use crate::vring::Virtqueue;
use crate::{Error, Result};

/// Transport state for the one control channel.  Created once the host is
/// ready and kept for the life of the firmware.
pub struct Transport<M: MemoryIo + Clone, I: Intc> {
    io: M,
    events: EventRouter<I>,
    tx: Virtqueue<M>,
    rx: Virtqueue<M>,
    notify_ids: (u32, u32),
    scratch: Message,
}

impl<M: MemoryIo + Clone, I: Intc> Transport<M, I> {
    /// Bind the transport to the loader's vrings.
    ///
    /// Arguments:
    /// - `io` - Access to the shared memory the vrings live in
    /// - `intc` - Interrupt controller access
    /// - `vring0` - PRU to host ring
    /// - `vring1` - Host to PRU ring
    /// - `to_host_event` - Event raised after handing the host a buffer
    /// - `from_host_event` - Event the host raises after posting a buffer
    pub fn new(
        io: M,
        intc: I,
        vring0: BoundVring,
        vring1: BoundVring,
        to_host_event: u8,
        from_host_event: u8,
    ) -> Result<Self> {
        let events = EventRouter::new(intc, to_host_event, from_host_event)?;
        debug!(
            "Transport bound: tx {:#010X}, rx {:#010X}",
            vring0.da, vring1.da
        );
        Ok(Self {
            tx: Virtqueue::new(io.clone(), &vring0),
            rx: Virtqueue::new(io.clone(), &vring1),
            io,
            events,
            notify_ids: (vring0.notify_id, vring1.notify_id),
            scratch: Message::empty(),
        })
    }

    /// Notify ids the loader assigned to (vring0, vring1).
    pub fn notify_ids(&self) -> (u32, u32) {
        self.notify_ids
    }

    pub fn events(&mut self) -> &mut EventRouter<I> {
        &mut self.events
    }

    /// Take one message from the host, if there is one.  `Ok(None)` means
    /// nothing is pending; poll the event router rather than spinning here.
    pub fn receive(&mut self) -> Result<Option<&Message>> {
        let buf = match self.rx.get_avail_buf() {
            Ok(Some(buf)) => buf,
            Ok(None) => return Ok(None),
            Err(Error::BadDescriptor) => {
                self.kick_rx()?;
                return Err(Error::BadDescriptor);
            }
            Err(e) => return Err(e),
        };

        let mut hdr = [0u8; RPMSG_HDR_SIZE];
        self.io.read_bytes(buf.addr, &mut hdr)?;
        let header = RpmsgHeader::from_bytes(&hdr);
        let len = header.len as usize;

        let result = if len > RPMSG_MAX_PAYLOAD || RPMSG_HDR_SIZE + len > buf.len as usize {
            warn!("Dropping message of {len} bytes in {} byte buffer", buf.len);
            Err(Error::PayloadTooLarge)
        } else {
            let data = self.scratch.fill(header.src, header.dst, len);
            self.io
                .read_bytes(buf.addr + RPMSG_HDR_SIZE as u32, data)
        };

        // The buffer goes back to the host whether or not it was readable.
        self.rx.add_used_buf(buf.head, RPMSG_BUF_SIZE as u32)?;
        self.kick_rx()?;
        result?;

        trace!(
            "Received {len} bytes {} -> {}",
            self.scratch.src, self.scratch.dst
        );
        Ok(Some(&self.scratch))
    }

    /// Send one message to the host.
    ///
    /// Returns [`Error::RingFull`] if the host has no free buffer posted;
    /// nothing is written in that case, so the call can simply be retried.
    pub fn send(&mut self, dst: u32, src: u32, payload: &[u8]) -> Result<()> {
        if payload.len() > RPMSG_MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }

        let Some(buf) = self.tx.get_avail_buf()? else {
            return Err(Error::RingFull);
        };

        let total = RPMSG_HDR_SIZE + payload.len();
        if total > buf.len as usize {
            self.tx.put_back();
            return Err(Error::BufferTooSmall);
        }

        let header = RpmsgHeader {
            src,
            dst,
            len: payload.len() as u16,
            flags: 0,
        };
        let written = self
            .io
            .write_bytes(buf.addr, &header.to_bytes())
            .and_then(|()| {
                self.io
                    .write_bytes(buf.addr + RPMSG_HDR_SIZE as u32, payload)
            });
        if let Err(e) = written {
            self.tx.put_back();
            return Err(e);
        }

        self.tx.add_used_buf(buf.head, total as u32)?;
        if self.tx.needs_kick()? {
            self.events.signal_other()?;
        }

        trace!("Sent {} bytes {src} -> {dst}", payload.len());
        Ok(())
    }

    /// One attempt at announcing `identity` to the host's name service.
    ///
    /// The host only posts buffers in vring0 once its side of the stack is
    /// up, so a full ring means nobody is listening yet:
    /// [`Error::HandshakeUnacknowledged`].  A failed attempt leaves nothing
    /// behind, so retrying cannot announce the channel twice.
    pub fn announce(&mut self, identity: &ChannelIdentity) -> Result<()> {
        let ns = NsMessage::new(identity, RPMSG_NS_CREATE)?;
        match self.send(RPMSG_NS_ADDR, identity.port, &ns.to_bytes()) {
            Ok(()) => {
                debug!(
                    "Announced channel {} ({}) on port {}",
                    identity.name, identity.desc, identity.port
                );
                Ok(())
            }
            Err(Error::RingFull) => Err(Error::HandshakeUnacknowledged),
            Err(e) => Err(e),
        }
    }

    fn kick_rx(&mut self) -> Result<()> {
        if self.rx.needs_kick()? {
            self.events.signal_other()?;
        }
        Ok(())
    }
}
