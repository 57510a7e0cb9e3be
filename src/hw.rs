//! PRU-ICSS and GPIO register bindings, as seen from PRU0.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::intc::{EventRouter, Intc, MAX_SYSEVT};
use crate::mem::MemoryIo;
use crate::meter::Clock;
use crate::{Error, Result};

/// PRU0 data RAM.
pub const PRU_DRAM0: u32 = 0x0000_0000;

/// PRU-ICSS shared data RAM.
pub const PRU_SHARED_RAM: u32 = 0x0001_0000;

/// Interrupt controller.
pub const INTC_BASE: u32 = 0x0002_0000;
pub const INTC_SISR: u32 = 0x20;
pub const INTC_SICR: u32 = 0x24;
pub const INTC_SRSR0: u32 = 0x200;
pub const INTC_SECR0: u32 = 0x280;
pub const INTC_HIPIR0: u32 = 0x900;
pub const INTC_HIPIR_NONE: u32 = 1 << 31;
pub const INTC_SIZE: u32 = 0x2000;

/// PRU0 control registers.
pub const PRU0_CTRL_BASE: u32 = 0x0002_2000;
pub const CTRL_CONTROL: u32 = 0x00;
pub const CTRL_CYCLE: u32 = 0x0C;
pub const CTRL_CTR_EN: u32 = 1 << 3;
pub const CTRL_SIZE: u32 = 0x400;

/// PRU-ICSS config registers.
pub const CFG_BASE: u32 = 0x0002_6000;
pub const CFG_SYSCFG: u32 = 0x04;
pub const CFG_STANDBY_INIT: u32 = 1 << 4;
pub const CFG_SIZE: u32 = 0x100;

/// GPIO module registers.
pub const GPIO_DATAIN: u32 = 0x138;
pub const GPIO_DATAOUT: u32 = 0x13C;
pub const GPIO_CLEARDATAOUT: u32 = 0x190;
pub const GPIO_SETDATAOUT: u32 = 0x194;
pub const GPIO_SIZE: u32 = 0x1000;

/// PRU clock rate.
pub const CYCLES_PER_US: u32 = 200;

// The PRU cycle counter stops at u32::MAX rather than wrapping.
const CYCLE_REBASE_THRESHOLD: u32 = 0x8000_0000;

/// The four AM335x GPIO banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Gpio0,
    Gpio1,
    Gpio2,
    Gpio3,
}

impl Bank {
    pub const ALL: [Bank; 4] = [Bank::Gpio0, Bank::Gpio1, Bank::Gpio2, Bank::Gpio3];

    /// Register base (AM335x TRM table 2-2).
    pub const fn base(self) -> u32 {
        match self {
            Bank::Gpio0 => 0x44E0_7000,
            Bank::Gpio1 => 0x4804_C000,
            Bank::Gpio2 => 0x481A_C000,
            Bank::Gpio3 => 0x481A_E000,
        }
    }
}

/// A single GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin {
    pub bank: Bank,
    pub bit: u8,
}

impl Pin {
    pub const fn new(bank: Bank, bit: u8) -> Self {
        Self { bank, bit }
    }
}

/// Capability to drive and read single GPIO lines.
pub trait DigitalIo {
    fn set_pin(&mut self, pin: Pin, high: bool) -> Result<()>;

    fn read_pin(&mut self, pin: Pin) -> Result<bool>;
}

/// GPIO banks reached over the PRU's OCP master port.
#[derive(Clone)]
pub struct Gpio<M: MemoryIo> {
    io: M,
}

impl<M: MemoryIo> Gpio<M> {
    pub fn new(io: M) -> Self {
        Self { io }
    }

    /// Drive every output of every bank low.
    pub fn clear_all(&mut self) -> Result<()> {
        for bank in Bank::ALL {
            self.io.write_u32(bank.base() + GPIO_CLEARDATAOUT, u32::MAX)?;
        }
        Ok(())
    }
}

impl<M: MemoryIo> DigitalIo for Gpio<M> {
    fn set_pin(&mut self, pin: Pin, high: bool) -> Result<()> {
        let mask = bit_mask(pin.bit)?;
        let reg = if high {
            GPIO_SETDATAOUT
        } else {
            GPIO_CLEARDATAOUT
        };
        self.io.write_u32(pin.bank.base() + reg, mask)
    }

    fn read_pin(&mut self, pin: Pin) -> Result<bool> {
        let mask = bit_mask(pin.bit)?;
        Ok(self.io.read_u32(pin.bank.base() + GPIO_DATAIN)? & mask != 0)
    }
}

fn bit_mask(bit: u8) -> Result<u32> {
    1u32.checked_shl(bit as u32).ok_or(Error::InvalidConfig)
}

/// The PRU-ICSS interrupt controller.
#[derive(Clone)]
pub struct PrussIntc<M: MemoryIo> {
    io: M,
    base: u32,
}

impl<M: MemoryIo> PrussIntc<M> {
    pub fn new(io: M) -> Self {
        Self::at(io, INTC_BASE)
    }

    pub fn at(io: M, base: u32) -> Self {
        Self { io, base }
    }
}

impl<M: MemoryIo> Intc for PrussIntc<M> {
    fn raise(&mut self, event: u8) -> Result<()> {
        self.io.write_u32(self.base + INTC_SISR, event as u32)
    }

    fn clear(&mut self, event: u8) -> Result<()> {
        self.io.write_u32(self.base + INTC_SICR, event as u32)
    }

    fn is_pending(&mut self, event: u8) -> Result<bool> {
        if event > MAX_SYSEVT {
            return Err(Error::InvalidEvent);
        }
        let reg = INTC_SECR0 + 4 * (event as u32 / 32);
        let status = self.io.read_u32(self.base + reg)?;
        Ok(status & (1 << (event % 32)) != 0)
    }

    fn host_pending(&mut self, host_int: u8) -> Result<bool> {
        let hipir = self
            .io
            .read_u32(self.base + INTC_HIPIR0 + 4 * host_int as u32)?;
        Ok(hipir & INTC_HIPIR_NONE == 0)
    }
}

/// [`Clock`] backed by the PRU0 cycle counter.
///
/// The hardware counter saturates, so it is periodically reset and the
/// elapsed count folded into a wrapping software epoch.
pub struct CycleCounter<M: MemoryIo> {
    io: M,
    epoch: u32,
}

impl<M: MemoryIo> CycleCounter<M> {
    /// Reset and start the counter.
    pub fn new(mut io: M) -> Result<Self> {
        let control = io.read_u32(PRU0_CTRL_BASE + CTRL_CONTROL)?;
        io.write_u32(PRU0_CTRL_BASE + CTRL_CONTROL, control & !CTRL_CTR_EN)?;
        io.write_u32(PRU0_CTRL_BASE + CTRL_CYCLE, 0)?;
        io.write_u32(PRU0_CTRL_BASE + CTRL_CONTROL, control | CTRL_CTR_EN)?;
        Ok(Self { io, epoch: 0 })
    }

    fn rebase(&mut self) -> Result<()> {
        let control = self.io.read_u32(PRU0_CTRL_BASE + CTRL_CONTROL)?;
        self.io
            .write_u32(PRU0_CTRL_BASE + CTRL_CONTROL, control & !CTRL_CTR_EN)?;
        let cycles = self.io.read_u32(PRU0_CTRL_BASE + CTRL_CYCLE)?;
        self.io.write_u32(PRU0_CTRL_BASE + CTRL_CYCLE, 0)?;
        self.io
            .write_u32(PRU0_CTRL_BASE + CTRL_CONTROL, control | CTRL_CTR_EN)?;
        self.epoch = self.epoch.wrapping_add(cycles);
        Ok(())
    }
}

impl<M: MemoryIo> Clock for CycleCounter<M> {
    fn now(&mut self) -> Result<u32> {
        let cycles = self.io.read_u32(PRU0_CTRL_BASE + CTRL_CYCLE)?;
        if cycles >= CYCLE_REBASE_THRESHOLD {
            self.rebase()?;
            return Ok(self.epoch);
        }
        Ok(self.epoch.wrapping_add(cycles))
    }
}

/// Bring the PRU side of the hardware to a known state.  Safe to call with
/// no prior state.
///
/// - Enable OCP master port access, needed to reach the GPIO banks and DDR
/// - Clear both system events, which may be left over from a previous run
/// - Drive every GPIO output low
pub fn reset_hardware_state<M: MemoryIo, I: Intc>(
    io: &mut M,
    events: &mut EventRouter<I>,
    gpio: &mut Gpio<M>,
) -> Result<()> {
    let syscfg = io.read_u32(CFG_BASE + CFG_SYSCFG)?;
    io.write_u32(CFG_BASE + CFG_SYSCFG, syscfg & !CFG_STANDBY_INIT)?;

    let from_host = events.from_host_event();
    let to_host = events.to_host_event();
    events.acknowledge(from_host)?;
    events.acknowledge(to_host)?;

    gpio.clear_all()?;

    debug!("Hardware reset");
    Ok(())
}
