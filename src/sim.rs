//! Simulated PRU memory map and meter bench for tests.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

use std::collections::HashMap;
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use crate::hw::{
    Bank, CFG_BASE, CFG_SIZE, CFG_SYSCFG, CTRL_CONTROL, CTRL_CTR_EN, CTRL_CYCLE, CTRL_SIZE,
    DigitalIo, GPIO_CLEARDATAOUT, GPIO_DATAIN, GPIO_DATAOUT, GPIO_SETDATAOUT, GPIO_SIZE,
    INTC_BASE, INTC_HIPIR_NONE, INTC_HIPIR0, INTC_SECR0, INTC_SICR, INTC_SISR, INTC_SIZE,
    INTC_SRSR0, PRU0_CTRL_BASE, Pin,
};
use crate::intc::{
    HOST_INTERRUPT_ARM_TO_PRU, INTC_CHANNEL_PRU_TO_ARM, SYSEVT_ARM_TO_PRU, SYSEVT_PRU_TO_ARM,
};
use crate::io::{Reader, Writer};
use crate::mem::MemoryIo;
use crate::meter::Clock;
use crate::rsc::ResourceTable;
use crate::{Error, Result};

/// Where tests place the resource table in PRU data RAM.
pub const RSC_ADDR: u32 = 0x100;

/// Start of the simulated DDR carveout.
pub const CARVEOUT: u32 = 0x9e00_0000;

#[derive(Default)]
struct Inner {
    bytes: HashMap<u32, u8>,
    pending: u64,
    control: u32,
    cycle: u32,
    syscfg: u32,
    gpio_out: [u32; 4],
    gpio_in: [u32; 4],
    watch: Option<(u32, u32)>,
    hits: Vec<u32>,
    fault: Option<(u32, u32)>,
}

enum Reg {
    Intc(u32),
    Ctrl(u32),
    Cfg(u32),
    Gpio(usize, u32),
}

fn decode(addr: u32) -> Option<Reg> {
    let within = |base: u32, size: u32| addr.checked_sub(base).filter(|off| *off < size);
    if let Some(off) = within(INTC_BASE, INTC_SIZE) {
        return Some(Reg::Intc(off));
    }
    if let Some(off) = within(PRU0_CTRL_BASE, CTRL_SIZE) {
        return Some(Reg::Ctrl(off));
    }
    if let Some(off) = within(CFG_BASE, CFG_SIZE) {
        return Some(Reg::Cfg(off));
    }
    for (i, bank) in Bank::ALL.iter().enumerate() {
        if let Some(off) = within(bank.base(), GPIO_SIZE) {
            return Some(Reg::Gpio(i, off));
        }
    }
    None
}

// Host interrupt each event is routed to.
fn host_int_of(event: u32) -> Option<u8> {
    match event as u8 {
        SYSEVT_ARM_TO_PRU => Some(HOST_INTERRUPT_ARM_TO_PRU),
        SYSEVT_PRU_TO_ARM => Some(INTC_CHANNEL_PRU_TO_ARM),
        _ => None,
    }
}

fn overlaps(range: Option<(u32, u32)>, addr: u32, len: u32) -> bool {
    range.is_some_and(|(base, size)| addr < base + size && addr + len > base)
}

impl Inner {
    fn touch(&mut self, addr: u32, len: u32) {
        if overlaps(self.watch, addr, len) {
            self.hits.push(addr);
        }
    }

    fn load(&self, addr: u32) -> u8 {
        self.bytes.get(&addr).copied().unwrap_or(0)
    }

    fn store(&mut self, addr: u32, value: u8) {
        self.bytes.insert(addr, value);
    }

    fn load_word(&self, addr: u32) -> u32 {
        u32::from_le_bytes([
            self.load(addr),
            self.load(addr + 1),
            self.load(addr + 2),
            self.load(addr + 3),
        ])
    }

    fn read_reg(&mut self, addr: u32) -> u32 {
        match decode(addr) {
            Some(Reg::Intc(INTC_SRSR0)) | Some(Reg::Intc(INTC_SECR0)) => self.pending as u32,
            Some(Reg::Intc(off)) if off == INTC_SRSR0 + 4 || off == INTC_SECR0 + 4 => {
                (self.pending >> 32) as u32
            }
            Some(Reg::Intc(off)) if (INTC_HIPIR0..INTC_HIPIR0 + 40).contains(&off) => {
                let host = ((off - INTC_HIPIR0) / 4) as u8;
                (0..64)
                    .find(|e| self.pending & (1u64 << e) != 0 && host_int_of(*e) == Some(host))
                    .unwrap_or(INTC_HIPIR_NONE)
            }
            Some(Reg::Ctrl(CTRL_CONTROL)) => self.control,
            Some(Reg::Ctrl(CTRL_CYCLE)) => {
                let cycle = self.cycle;
                if self.control & CTRL_CTR_EN != 0 {
                    self.cycle = self.cycle.saturating_add(1);
                }
                cycle
            }
            Some(Reg::Cfg(CFG_SYSCFG)) => self.syscfg,
            Some(Reg::Gpio(bank, GPIO_DATAOUT)) => self.gpio_out[bank],
            Some(Reg::Gpio(bank, GPIO_DATAIN)) => self.gpio_in[bank],
            _ => self.load_word(addr),
        }
    }

    fn write_reg(&mut self, addr: u32, value: u32) {
        match decode(addr) {
            Some(Reg::Intc(INTC_SISR)) => self.pending |= 1u64 << (value & 63),
            Some(Reg::Intc(INTC_SICR)) => self.pending &= !(1u64 << (value & 63)),
            Some(Reg::Intc(INTC_SECR0)) => self.pending &= !(value as u64),
            Some(Reg::Ctrl(CTRL_CONTROL)) => self.control = value,
            Some(Reg::Ctrl(CTRL_CYCLE)) => self.cycle = value,
            Some(Reg::Cfg(CFG_SYSCFG)) => self.syscfg = value,
            Some(Reg::Gpio(bank, GPIO_DATAOUT)) => self.gpio_out[bank] = value,
            Some(Reg::Gpio(bank, GPIO_SETDATAOUT)) => self.gpio_out[bank] |= value,
            Some(Reg::Gpio(bank, GPIO_CLEARDATAOUT)) => self.gpio_out[bank] &= !value,
            _ => {
                for (i, byte) in value.to_le_bytes().iter().enumerate() {
                    self.store(addr + i as u32, *byte);
                }
            }
        }
    }
}

/// Shared memory image with PRU-ICSS and GPIO register behaviour.  Clones
/// share the same image, so one clone can play the host while another is
/// handed to the firmware.
#[derive(Clone)]
pub struct SimMemory {
    inner: Arc<Mutex<Inner>>,
}

impl SimMemory {
    pub fn new() -> Self {
        let inner = Inner {
            syscfg: crate::hw::CFG_STANDBY_INIT,
            ..Inner::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn load_table(&self, addr: u32, table: &ResourceTable) {
        let mut inner = self.lock();
        for (i, byte) in table.as_bytes().iter().enumerate() {
            inner.store(addr + i as u32, *byte);
        }
    }

    pub fn write_byte(&self, addr: u32, value: u8) {
        self.lock().store(addr, value);
    }

    pub fn event_pending(&self, event: u8) -> bool {
        self.lock().pending & (1u64 << event) != 0
    }

    pub fn raise_event(&self, event: u8) {
        self.lock().pending |= 1u64 << event;
    }

    pub fn gpio_out(&self, bank: Bank) -> u32 {
        self.lock().gpio_out[bank as usize]
    }

    pub fn set_gpio_in(&self, bank: Bank, value: u32) {
        self.lock().gpio_in[bank as usize] = value;
    }

    pub fn syscfg(&self) -> u32 {
        self.lock().syscfg
    }

    pub fn set_cycle(&self, value: u32) {
        self.lock().cycle = value;
    }

    pub fn cycle_counter_enabled(&self) -> bool {
        self.lock().control & CTRL_CTR_EN != 0
    }

    /// Record every access overlapping `base..base + len`.
    pub fn watch(&self, base: u32, len: u32) {
        let mut inner = self.lock();
        inner.watch = Some((base, len));
        inner.hits.clear();
    }

    pub fn watch_hits(&self) -> Vec<u32> {
        self.lock().hits.clone()
    }

    /// Fail every write overlapping `base..base + len` with [`Error::Io`].
    pub fn fail_writes(&self, base: u32, len: u32) {
        self.lock().fault = Some((base, len));
    }

    pub fn clear_faults(&self) {
        self.lock().fault = None;
    }

    fn read_into(&self, addr: u32, buf: &mut [u8]) {
        let mut inner = self.lock();
        inner.touch(addr, buf.len() as u32);
        if buf.len() == 4 && decode(addr).is_some() {
            buf.copy_from_slice(&inner.read_reg(addr).to_le_bytes());
            return;
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = inner.load(addr + i as u32);
        }
    }

    fn write_from(&self, addr: u32, data: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        inner.touch(addr, data.len() as u32);
        if overlaps(inner.fault, addr, data.len() as u32) {
            return Err(Error::Io);
        }
        if let (Ok(word), Some(_)) = (<[u8; 4]>::try_from(data), decode(addr)) {
            inner.write_reg(addr, u32::from_le_bytes(word));
            return Ok(());
        }
        for (i, byte) in data.iter().enumerate() {
            inner.store(addr + i as u32, *byte);
        }
        Ok(())
    }
}

impl MemoryIo for SimMemory {
    fn read_u8(&mut self, addr: u32) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_into(addr, &mut buf);
        Ok(buf[0])
    }

    fn read_u16(&mut self, addr: u32) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(addr, &mut buf);
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf);
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.write_from(addr, &[value])
    }

    fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        self.write_from(addr, &value.to_le_bytes())
    }

    fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_from(addr, &value.to_le_bytes())
    }
}

impl Reader for SimMemory {
    type Error = Error;

    fn read(
        &mut self,
        addr: u32,
        buf: &mut [u8],
    ) -> impl Future<Output = core::result::Result<(), Error>> + Send {
        self.read_into(addr, buf);
        std::future::ready(Ok(()))
    }
}

impl Writer for SimMemory {
    type Error = Error;

    fn write(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> impl Future<Output = core::result::Result<(), Error>> + Send {
        std::future::ready(self.write_from(addr, data))
    }
}

/// Drive a future to completion on the current thread.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);
    let mut cx = Context::from_waker(Waker::noop());
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
    }
}

/// Levels on the data line for one frame: start, data LSB first, parity,
/// stop.
pub fn frame_bits(value: u8, data_bits: u8, odd: bool) -> Vec<bool> {
    let mut bits = vec![false];
    let mut parity = odd;
    for n in 0..data_bits {
        let bit = value & (1 << n) != 0;
        parity ^= bit;
        bits.push(bit);
    }
    bits.push(parity);
    bits.push(true);
    bits
}

#[derive(Default)]
struct BenchState {
    now: u32,
    edges: Vec<(Pin, u32, bool)>,
    // (start, cycles per bit, levels)
    waveforms: Vec<(u32, u32, Vec<bool>)>,
}

/// A meter on the bench: simulated time, the clock outputs and a scripted
/// data line that idles high.
#[derive(Clone, Default)]
pub struct Bench {
    state: Arc<Mutex<BenchState>>,
}

impl Bench {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap()
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            bench: self.clone(),
        }
    }

    pub fn pins(&self, input: Pin) -> SimPins {
        SimPins {
            bench: self.clone(),
            input,
        }
    }

    /// Drive `levels` on the data line from `start`, one per `cycles_per_bit`.
    pub fn play(&self, start: u32, cycles_per_bit: u32, levels: &[bool]) {
        self.lock()
            .waveforms
            .push((start, cycles_per_bit, levels.to_vec()));
    }

    pub fn advance(&self, cycles: u32) {
        let mut state = self.lock();
        state.now = state.now.wrapping_add(cycles);
    }

    /// (time, level) of every write to `pin`.
    pub fn clock_edges(&self, pin: Pin) -> Vec<(u32, bool)> {
        self.lock()
            .edges
            .iter()
            .filter(|(p, _, _)| *p == pin)
            .map(|(_, t, level)| (*t, *level))
            .collect()
    }

    fn level(&self) -> bool {
        let state = self.lock();
        let now = state.now;
        for (start, per_bit, levels) in &state.waveforms {
            if now >= *start {
                if let Some(level) = levels.get(((now - start) / per_bit) as usize) {
                    return *level;
                }
            }
        }
        true
    }
}

pub struct SimClock {
    bench: Bench,
}

impl Clock for SimClock {
    fn now(&mut self) -> Result<u32> {
        Ok(self.bench.lock().now)
    }

    fn delay_until(&mut self, deadline: u32) -> Result<()> {
        let mut state = self.bench.lock();
        if (deadline.wrapping_sub(state.now) as i32) > 0 {
            state.now = deadline;
        }
        Ok(())
    }
}

pub struct SimPins {
    bench: Bench,
    input: Pin,
}

impl DigitalIo for SimPins {
    fn set_pin(&mut self, pin: Pin, high: bool) -> Result<()> {
        let mut state = self.bench.lock();
        let now = state.now;
        state.edges.push((pin, now, high));
        Ok(())
    }

    fn read_pin(&mut self, pin: Pin) -> Result<bool> {
        if pin != self.input {
            return Ok(false);
        }
        Ok(self.bench.level())
    }
}
