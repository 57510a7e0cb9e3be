//! Asynchronous host peer.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::firmware::FRAME_LOG_DATA;
use crate::host::{Endpoint, HostConfig, HostMessage};
use crate::hw::{INTC_SICR, INTC_SISR};
use crate::intc::{SYSEVT_ARM_TO_PRU, SYSEVT_PRU_TO_ARM};
use crate::io::{Reader, Writer};
use crate::mem::{AsyncMemoryIo, ReaderWriterIo, align_up};
use crate::meter::DATA_ARRAY_SIZE;
use crate::rpmsg::{
    NsMessage, RPMSG_BUF_SIZE, RPMSG_HDR_SIZE, RPMSG_MAX_PAYLOAD, RPMSG_NS_ADDR, RPMSG_NS_CREATE,
    RpmsgHeader,
};
use crate::rsc::{
    RPMSG_FEATURES, ResourceTable, VIRTIO_CONFIG_S_ACKNOWLEDGE, VIRTIO_CONFIG_S_DRIVER,
    VIRTIO_CONFIG_S_DRIVER_OK, VringDescriptor,
};
use crate::vring::{VRING_DESC_F_WRITE, VringLayout};
use crate::{Error, Result};

/// Vrings are placed on page boundaries in the carveout.
const PAGE_SIZE: u32 = 4096;

const BUF_SIZE: u32 = RPMSG_BUF_SIZE as u32;

/// Yield delay for async polling loops.
///
/// Application must provide an implementation of this trait in order for the
/// host to be able to yield while waiting for the firmware.
///
/// This trait keeps the crate free of any specific async runtime.
///
/// Example:
///
/// ```ignore
/// use embassy_time::{Duration, Timer};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         Timer::after(Duration::from_millis(1)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

// Host's cursors into both rings.  vring0 is received on, vring1 sent on.
struct HostRings {
    rx: VringLayout,
    tx: VringLayout,
    rx_bufs: u32,
    tx_bufs: u32,
    rx_avail: u16,
    rx_used_seen: u16,
    tx_avail: u16,
    tx_used_seen: u16,
    tx_free: Vec<u16>,
}

/// Async host peer: provisions the firmware's rings and talks RPMsg to it.
///
/// Example usage:
///
/// ```ignore
/// use ui1203_pru::host::{AsyncDelay, AsyncRpmsgHost, HostConfig};
///
/// let config = HostConfig::new(0x4A30_0100, 0x9e00_0000);
/// let mut reader = ...; // implement Reader trait
/// let mut writer = ...; // implement Writer trait
/// let mut host = AsyncRpmsgHost::<_, Delay>::from_reader_writer(&mut reader, &mut writer, config);
/// host.attach().await?;
/// host.provision().await?;
/// host.set_driver_ok().await?;
/// host.wait_announcement().await?;
/// let log_addr = host.request(&[0]).await?;
/// ```
pub struct AsyncRpmsgHost<M: AsyncMemoryIo, D: AsyncDelay> {
    io: M,
    config: HostConfig,
    table: Option<ResourceTable>,
    rings: Option<HostRings>,
    endpoint: Option<Endpoint>,
    _delay: core::marker::PhantomData<D>,
}

impl<'a, R: Reader, W: Writer, D: AsyncDelay> AsyncRpmsgHost<ReaderWriterIo<'a, R, W>, D> {
    /// Create a host over a [`Reader`] and [`Writer`] pair
    ///
    /// Arguments:
    /// - `reader`: Reader object to read from the PRU's memory
    /// - `writer`: Writer object to write to the PRU's memory
    /// - `config`: Host configuration
    pub fn from_reader_writer(reader: &'a mut R, writer: &'a mut W, config: HostConfig) -> Self {
        Self::new(ReaderWriterIo::new(reader, writer), config)
    }
}

impl<M: AsyncMemoryIo, D: AsyncDelay> AsyncRpmsgHost<M, D> {
    pub fn new(io: M, config: HostConfig) -> Self {
        Self {
            io,
            config,
            table: None,
            rings: None,
            endpoint: None,
            _delay: core::marker::PhantomData,
        }
    }

    /// Channel learnt from [`Self::wait_announcement()`].
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Read and check the firmware's resource table.
    pub async fn attach(&mut self) -> Result<ResourceTable> {
        let mut buf = [0u8; size_of::<ResourceTable>()];
        self.io
            .read_bytes(self.config.rsc_table_addr, &mut buf)
            .await?;
        let table = ResourceTable::from_bytes(&buf)?;
        table.validate()?;
        debug!(
            "Attached to table at {:#010X}, status {:#04X}",
            self.config.rsc_table_addr, table.vdev.status
        );
        self.table = Some(table);
        Ok(table)
    }

    /// Allocate both vrings and their buffers in the carveout, post every
    /// receive buffer, and write the allocation back into the table.
    pub async fn provision(&mut self) -> Result<()> {
        let table = self.table.ok_or(Error::InvalidTable)?;
        let span = |v: &VringDescriptor| align_up(VringLayout::size(v.num, v.align), PAGE_SIZE);

        let vring0 = self.config.carveout_addr;
        let vring1 = vring0 + span(&table.vring0);
        let rx_bufs = vring1 + span(&table.vring1);
        let tx_bufs = rx_bufs + table.vring0.num * BUF_SIZE;
        let rx = VringLayout::new(vring0, table.vring0.num, table.vring0.align);
        let tx = VringLayout::new(vring1, table.vring1.num, table.vring1.align);

        self.io
            .write_bytes(vring0, &vec![0u8; (rx_bufs - vring0) as usize])
            .await?;
        for head in 0..rx.num {
            let addr = rx_bufs + head as u32 * BUF_SIZE;
            self.write_desc(&rx, head, addr, BUF_SIZE, VRING_DESC_F_WRITE)
                .await?;
            self.io.write_u16(rx.avail_ring_addr(head), head).await?;
        }
        self.io.write_u16(rx.avail_idx_addr(), rx.num).await?;

        let base = self.config.rsc_table_addr;
        for (index, da) in [(0, vring0), (1, vring1)] {
            let entry = base + ResourceTable::vring_offset(index);
            self.io.write_u32(entry, da).await?;
            self.io.write_u32(entry + 12, index as u32).await?;
        }
        self.io
            .write_u32(
                base + ResourceTable::gfeatures_offset(),
                table.vdev.dfeatures & RPMSG_FEATURES,
            )
            .await?;
        self.write_status(VIRTIO_CONFIG_S_ACKNOWLEDGE | VIRTIO_CONFIG_S_DRIVER)
            .await?;

        debug!("Provisioned vring0 at {vring0:#010X}, vring1 at {vring1:#010X}");
        self.rings = Some(HostRings {
            rx,
            tx,
            rx_bufs,
            tx_bufs,
            rx_avail: rx.num,
            rx_used_seen: 0,
            tx_avail: 0,
            tx_used_seen: 0,
            tx_free: (0..tx.num).rev().collect(),
        });
        Ok(())
    }

    /// Tell the firmware the driver is up.
    pub async fn set_driver_ok(&mut self) -> Result<()> {
        self.write_status(
            VIRTIO_CONFIG_S_ACKNOWLEDGE | VIRTIO_CONFIG_S_DRIVER | VIRTIO_CONFIG_S_DRIVER_OK,
        )
        .await
    }

    /// Raise the firmware's inbound event.
    pub async fn kick(&mut self) -> Result<()> {
        self.io
            .write_u32(
                self.config.intc_addr + INTC_SISR,
                SYSEVT_ARM_TO_PRU as u32,
            )
            .await
    }

    /// Take one message from the firmware, if there is one, and post its
    /// buffer again.
    pub async fn try_recv(&mut self) -> Result<Option<HostMessage>> {
        let rings = self.rings.as_mut().ok_or(Error::Unresolved)?;
        let used_idx = self.io.read_u16(rings.rx.used_idx_addr()).await?;
        if used_idx == rings.rx_used_seen {
            return Ok(None);
        }

        let elem = rings.rx.used_elem_addr(rings.rx_used_seen);
        let head = self.io.read_u32(elem).await?;
        let len = self.io.read_u32(elem + 4).await? as usize;
        if head >= rings.rx.num as u32 || !(RPMSG_HDR_SIZE..=RPMSG_BUF_SIZE).contains(&len) {
            warn!("Bad used element {head} ({len} bytes)");
            return Err(Error::BadDescriptor);
        }
        let head = head as u16;
        rings.rx_used_seen = rings.rx_used_seen.wrapping_add(1);

        let mut buf = vec![0u8; len];
        self.io
            .read_bytes(rings.rx_bufs + head as u32 * BUF_SIZE, &mut buf)
            .await?;
        let mut hdr = [0u8; RPMSG_HDR_SIZE];
        hdr.copy_from_slice(&buf[..RPMSG_HDR_SIZE]);
        let header = RpmsgHeader::from_bytes(&hdr);
        let end = (RPMSG_HDR_SIZE + header.len as usize).min(len);

        self.io
            .write_u16(rings.rx.avail_ring_addr(rings.rx_avail), head)
            .await?;
        rings.rx_avail = rings.rx_avail.wrapping_add(1);
        self.io
            .write_u16(rings.rx.avail_idx_addr(), rings.rx_avail)
            .await?;
        self.io
            .write_u32(
                self.config.intc_addr + INTC_SICR,
                SYSEVT_PRU_TO_ARM as u32,
            )
            .await?;

        trace!("Received {} bytes {} -> {}", end - RPMSG_HDR_SIZE, header.src, header.dst);
        Ok(Some(HostMessage {
            src: header.src,
            dst: header.dst,
            payload: buf[RPMSG_HDR_SIZE..end].to_vec(),
        }))
    }

    /// Send one message to the firmware and kick it.
    ///
    /// Returns [`Error::RingFull`] if the firmware has not yet returned any
    /// of the buffers already sent.
    pub async fn send(&mut self, src: u32, dst: u32, payload: &[u8]) -> Result<()> {
        if payload.len() > RPMSG_MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge);
        }
        let rings = self.rings.as_mut().ok_or(Error::Unresolved)?;

        let used_idx = self.io.read_u16(rings.tx.used_idx_addr()).await?;
        while rings.tx_used_seen != used_idx {
            let elem = rings.tx.used_elem_addr(rings.tx_used_seen);
            let head = self.io.read_u32(elem).await? as u16;
            rings.tx_free.push(head);
            rings.tx_used_seen = rings.tx_used_seen.wrapping_add(1);
        }
        let Some(head) = rings.tx_free.pop() else {
            return Err(Error::RingFull);
        };

        let header = RpmsgHeader {
            src,
            dst,
            len: payload.len() as u16,
            flags: 0,
        };
        let mut buf = Vec::with_capacity(RPMSG_HDR_SIZE + payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(payload);
        let addr = rings.tx_bufs + head as u32 * BUF_SIZE;
        self.io.write_bytes(addr, &buf).await?;

        let tx = rings.tx;
        let avail = rings.tx_avail;
        rings.tx_avail = avail.wrapping_add(1);
        let next_avail = rings.tx_avail;
        self.write_desc(&tx, head, addr, buf.len() as u32, 0).await?;
        self.io.write_u16(tx.avail_ring_addr(avail), head).await?;
        self.io.write_u16(tx.avail_idx_addr(), next_avail).await?;

        trace!("Sent {} bytes {src} -> {dst}", payload.len());
        self.kick().await
    }

    /// Poll until the firmware announces its channel.
    pub async fn wait_announcement(&mut self) -> Result<Endpoint> {
        for _ in 0..self.config.max_polls {
            match self.try_recv().await? {
                Some(msg) if msg.dst == RPMSG_NS_ADDR => {
                    let ns = NsMessage::from_bytes(&msg.payload)?;
                    if ns.flags != RPMSG_NS_CREATE {
                        debug!("Ignoring name service flags {}", ns.flags);
                        continue;
                    }
                    let endpoint = Endpoint {
                        name: String::from_utf8_lossy(ns.name_bytes()).into_owned(),
                        desc: String::from_utf8_lossy(ns.desc_bytes()).into_owned(),
                        port: ns.addr,
                    };
                    info!(
                        "Channel {} ({}) on port {}",
                        endpoint.name, endpoint.desc, endpoint.port
                    );
                    self.endpoint = Some(endpoint.clone());
                    return Ok(endpoint);
                }
                Some(msg) => warn!("Ignoring message {} -> {}", msg.src, msg.dst),
                None => D::delay().await,
            }
        }
        Err(Error::Timeout)
    }

    /// Send `payload` to the announced channel and wait for the reply.
    pub async fn request(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let port = self
            .endpoint
            .as_ref()
            .map(|e| e.port)
            .ok_or(Error::HandshakeUnacknowledged)?;
        let local = self.config.local_addr;
        debug!("Starting request ({} bytes)", payload.len());
        self.send(local, port, payload).await?;

        for _ in 0..self.config.max_polls {
            match self.try_recv().await? {
                Some(msg) if msg.src == port && msg.dst == local => {
                    debug!("Request completed ({} bytes received)", msg.payload.len());
                    return Ok(msg.payload);
                }
                Some(msg) => warn!("Unexpected message {} -> {}", msg.src, msg.dst),
                None => D::delay().await,
            }
        }
        Err(Error::Timeout)
    }

    /// Read the frame log at `addr`.
    pub async fn read_frames(&mut self, addr: u32) -> Result<Vec<u8>> {
        let count = self.io.read_u32(addr).await? as usize;
        if count > DATA_ARRAY_SIZE {
            warn!("Frame log claims {count} frames");
        }
        let mut frames = vec![0u8; count.min(DATA_ARRAY_SIZE)];
        self.io
            .read_bytes(addr + FRAME_LOG_DATA, &mut frames)
            .await?;
        Ok(frames)
    }

    async fn write_status(&mut self, status: u8) -> Result<()> {
        self.io
            .write_bytes(
                self.config.rsc_table_addr + ResourceTable::status_offset(),
                &[status],
            )
            .await
    }

    async fn write_desc(
        &mut self,
        layout: &VringLayout,
        head: u16,
        addr: u32,
        len: u32,
        flags: u16,
    ) -> Result<()> {
        let mut desc = [0u8; 16];
        desc[0..4].copy_from_slice(&addr.to_le_bytes());
        // 4..8 high half of the address
        desc[8..12].copy_from_slice(&len.to_le_bytes());
        desc[12..14].copy_from_slice(&flags.to_le_bytes());
        self.io.write_bytes(layout.desc_addr(head), &desc).await
    }
}
