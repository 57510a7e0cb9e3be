//! The firmware's top level control loop.
//!
//! ```text
//! HardwareReset -> WaitHostReady -> Handshake -> ServiceLoop (forever)
//! ```
//!
//! Each call to [`Firmware::step()`] makes one poll of the current state, so
//! a test can run the loop a step at a time; on the PRU [`Firmware::run()`]
//! steps forever.
//!
//! In the service loop the host's event means it has (re)started and wants
//! the address of the frame log.  The request arrives as a message, which is
//! answered with the log's device address as a 4 byte little-endian word.
//! The log itself is laid out as
//!
//! ```text
//! count: u32, frames: [u8; count]
//! ```

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::hw::{CycleCounter, DigitalIo, Gpio, PRU_SHARED_RAM, PrussIntc, reset_hardware_state};
use crate::intc::{EventRouter, SYSEVT_ARM_TO_PRU, SYSEVT_PRU_TO_ARM};
use crate::mem::{MemoryIo, RamIo};
use crate::meter::{Clock, Frame, Meter, MeterConfig};
use crate::rpmsg::{ChannelIdentity, Transport};
use crate::rsc::RscTable;
use crate::{Error, Result};

/// Offset of the first frame byte in the frame log.
pub const FRAME_LOG_DATA: u32 = 4;

/// How long to keep polling for something the host has to do first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Only safe where the host is guaranteed to come up eventually
    Forever,
    /// Give up after this many attempts
    Bounded(u32),
}

impl Retry {
    fn exhausted(&self, attempts: u32) -> bool {
        match self {
            Retry::Forever => false,
            Retry::Bounded(limit) => attempts >= *limit,
        }
    }

    // Count one more failed attempt.  True once the policy gives up.
    fn give_up(&self, attempts: &mut u32) -> bool {
        *attempts = attempts.saturating_add(1);
        self.exhausted(*attempts)
    }
}

/// Firmware configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Channel announced to the host
    pub channel: ChannelIdentity,
    /// Applies to the readiness gate, the handshake and replies
    pub retry: Retry,
    /// Device address of the frame log
    pub report_addr: u32,
    pub meter: MeterConfig,
    /// Resource table location; `None` for the table linked into the image
    pub rsc_table_addr: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel: ChannelIdentity::default(),
            retry: Retry::Forever,
            report_addr: PRU_SHARED_RAM,
            meter: MeterConfig::default(),
            rsc_table_addr: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    HardwareReset,
    WaitHostReady,
    Handshake,
    ServiceLoop,
}

/// The PRU firmware.
pub struct Firmware<M: MemoryIo + Clone, C: Clock, G: DigitalIo> {
    io: M,
    config: Config,
    table: RscTable<M>,
    events: EventRouter<PrussIntc<M>>,
    gpio: Gpio<M>,
    meter: Meter<C, G>,
    transport: Option<Transport<M, PrussIntc<M>>>,
    state: State,
    attempts: u32,
    host_restarted: bool,
}

impl Firmware<RamIo, CycleCounter<RamIo>, Gpio<RamIo>> {
    /// Firmware driving the real hardware.
    pub fn on_pru(config: Config) -> Result<Self> {
        let io = RamIo::new();
        let clock = CycleCounter::new(io)?;
        Self::new(io, clock, Gpio::new(io), config)
    }
}

impl<M: MemoryIo + Clone, C: Clock, G: DigitalIo> Firmware<M, C, G> {
    /// Arguments:
    /// - `io` - Access to the PRU's memory map
    /// - `clock` - Cycle counter the meter is timed against
    /// - `pins` - GPIO lines the meter is wired to
    /// - `config` - Firmware configuration
    pub fn new(io: M, clock: C, pins: G, config: Config) -> Result<Self> {
        let meter = Meter::new(clock, pins, config.meter)?;
        let table = match config.rsc_table_addr {
            Some(addr) => RscTable::new(io.clone(), addr),
            None => RscTable::linked(io.clone()),
        };
        Ok(Self {
            events: EventRouter::pru(PrussIntc::new(io.clone())),
            gpio: Gpio::new(io.clone()),
            io,
            config,
            table,
            meter,
            transport: None,
            state: State::HardwareReset,
            attempts: 0,
            host_restarted: false,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The host signalled since it was last answered.
    pub fn host_restarted(&self) -> bool {
        self.host_restarted
    }

    pub fn meter(&self) -> &Meter<C, G> {
        &self.meter
    }

    /// Run forever.  Errors are logged and the failed step retried.
    pub fn run(&mut self) -> ! {
        info!("Firmware starting");
        loop {
            if let Err(e) = self.step() {
                warn!("{:?}: {e:?}", self.state);
            }
        }
    }

    /// One poll of the current state.  Returns the state to poll next.
    ///
    /// With [`Retry::Bounded`], returns [`Error::ResourceNotReady`] or
    /// [`Error::HandshakeUnacknowledged`] once the host has failed to
    /// respond in time; the state is unchanged, so stepping again retries.
    pub fn step(&mut self) -> Result<State> {
        let next = match self.state {
            State::HardwareReset => self.reset()?,
            State::WaitHostReady => self.wait_host_ready()?,
            State::Handshake => self.handshake()?,
            State::ServiceLoop => self.service()?,
        };
        if next != self.state {
            debug!("{:?} -> {next:?}", self.state);
            self.state = next;
            self.attempts = 0;
        }
        Ok(next)
    }

    fn reset(&mut self) -> Result<State> {
        reset_hardware_state(&mut self.io, &mut self.events, &mut self.gpio)?;
        self.meter.set_clock(false)?;
        self.clear_frame_log()?;
        Ok(State::WaitHostReady)
    }

    fn wait_host_ready(&mut self) -> Result<State> {
        let Some(ready) = self.table.poll_ready()? else {
            if self.config.retry.give_up(&mut self.attempts) {
                self.attempts = 0;
                return Err(Error::ResourceNotReady);
            }
            return Ok(State::WaitHostReady);
        };

        let vring0 = self.table.vring(0).resolve(&mut self.io, &ready)?;
        let vring1 = self.table.vring(1).resolve(&mut self.io, &ready)?;
        self.transport = Some(Transport::new(
            self.io.clone(),
            PrussIntc::new(self.io.clone()),
            vring0,
            vring1,
            SYSEVT_PRU_TO_ARM,
            SYSEVT_ARM_TO_PRU,
        )?);
        Ok(State::Handshake)
    }

    fn handshake(&mut self) -> Result<State> {
        let channel = self.config.channel;
        match self.transport()?.announce(&channel) {
            Ok(()) => {
                info!("Channel {} up on port {}", channel.name, channel.port);
                Ok(State::ServiceLoop)
            }
            Err(Error::HandshakeUnacknowledged) => {
                if self.config.retry.give_up(&mut self.attempts) {
                    self.attempts = 0;
                    return Err(Error::HandshakeUnacknowledged);
                }
                Ok(State::Handshake)
            }
            Err(e) => Err(e),
        }
    }

    // The meter is clocked every pass, whatever happened on the link.
    fn service(&mut self) -> Result<State> {
        let link = self.service_link();
        let meter = self.service_meter();
        link?;
        meter?;
        Ok(State::ServiceLoop)
    }

    fn service_link(&mut self) -> Result<()> {
        let transport = self.transport()?;
        if transport.events().pending_from_other()? {
            let event = transport.events().from_host_event();
            transport.events().acknowledge(event)?;
            if !self.host_restarted {
                warn!("Host restarted");
            }
            self.host_restarted = true;
            return Ok(());
        }

        let request = match transport.receive() {
            Ok(Some(msg)) => Some((msg.src, msg.dst)),
            Ok(None) => None,
            Err(e @ (Error::PayloadTooLarge | Error::BadDescriptor)) => {
                debug!("Inbound message discarded: {e:?}");
                None
            }
            Err(e) => return Err(e),
        };
        match request {
            Some((src, dst)) => self.reply(src, dst),
            None => Ok(()),
        }
    }

    fn service_meter(&mut self) -> Result<()> {
        match self.meter.clock_bit() {
            Ok(Some(frame)) => self.log_frame(&frame),
            Ok(None) => Ok(()),
            Err(e @ (Error::ParityMismatch | Error::FramingError)) => {
                warn!("Frame dropped: {e:?}");
                Ok(())
            }
            Err(Error::BufferFull) => {
                warn!("Frame log full");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // Answer a request from `src` with the frame log address.  A restarted
    // host reads the log from the start.
    fn reply(&mut self, src: u32, dst: u32) -> Result<()> {
        if self.host_restarted {
            self.meter.reset_buffer();
            self.clear_frame_log()?;
        }

        let payload = self.config.report_addr.to_le_bytes();
        let retry = self.config.retry;
        let transport = self.transport()?;
        let mut attempts = 0;
        loop {
            match transport.send(src, dst, &payload) {
                Ok(()) => break,
                Err(Error::RingFull) => {
                    if retry.give_up(&mut attempts) {
                        error!("Reply to {src} abandoned");
                        return Err(Error::RingFull);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        trace!("Replied to {src}");
        self.host_restarted = false;
        Ok(())
    }

    fn transport(&mut self) -> Result<&mut Transport<M, PrussIntc<M>>> {
        self.transport.as_mut().ok_or(Error::ResourceNotReady)
    }

    fn clear_frame_log(&mut self) -> Result<()> {
        self.io.write_u32(self.config.report_addr, 0)
    }

    fn log_frame(&mut self, frame: &Frame) -> Result<()> {
        let addr = self.config.report_addr;
        self.io
            .write_u8(addr + FRAME_LOG_DATA + frame.index as u32, frame.value)?;
        self.io.write_u32(addr, frame.index as u32 + 1)?;
        debug!("Frame {} = {:#04X}", frame.index, frame.value);
        Ok(())
    }
}
