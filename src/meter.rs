//! Meter decoder: a software serial receiver built from busy-wait timing.
//!
//! The PRU drives the meter's clock line itself.  For every bit it raises the
//! clock, waits for the meter's output to settle, samples the data line,
//! then waits out the rest of the high half and the whole low half:
//!
//! ```text
//! clock  ___|‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|_______________|‾‾‾‾
//!           ^ settle ^ sample               ^
//!           |<-- half period-->|<-- half period -->|
//! ```
//!
//! Each sample feeds the [`Decoder`] state machine, which assembles frames
//! of one start bit (low), a fixed number of data bits (LSB first), one
//! parity bit and one stop bit (high, the idle level).
//!
//! There is no recovery within a frame.  A parity or stop bit error, or a
//! sampling window missed because the caller was late, throws away the
//! frame and goes back to hunting for a start bit.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::hw::{Bank, CYCLES_PER_US, DigitalIo, Pin};
use crate::{Error, Result};

/// Delay between the rising clock edge and sampling the data line.
pub const SETTLE_CYCLES: u32 = 70 * CYCLES_PER_US;

/// Time between clock edges.
pub const HALF_PERIOD_CYCLES: u32 = 500 * CYCLES_PER_US;

/// Capacity of the receive buffer, in frames.
pub const DATA_ARRAY_SIZE: usize = 256;

/// Cycle-counted time.  The PRU has no timer service, only a free running
/// cycle counter.
pub trait Clock {
    /// Current cycle count.  Wraps.
    fn now(&mut self) -> Result<u32>;

    /// Spin until `deadline`.  Returns immediately if it has passed.
    fn delay_until(&mut self, deadline: u32) -> Result<()> {
        while (deadline.wrapping_sub(self.now()?) as i32) > 0 {}
        Ok(())
    }

    /// Spin for `cycles`.
    fn delay_cycles(&mut self, cycles: u32) -> Result<()> {
        let start = self.now()?;
        self.delay_until(start.wrapping_add(cycles))
    }
}

/// Sampling intervals, in PRU cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub settle_cycles: u32,
    pub half_period_cycles: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_cycles: SETTLE_CYCLES,
            half_period_cycles: HALF_PERIOD_CYCLES,
        }
    }
}

impl Timing {
    pub fn period_cycles(&self) -> u32 {
        2 * self.half_period_cycles
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// Parity bit is the XOR of the data bits
    Even,
    /// Parity bit is the inverse of the XOR of the data bits
    Odd,
}

/// Meter line configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterConfig {
    pub timing: Timing,
    pub data_bits: u8,
    pub parity: Parity,
    /// Clock output
    pub clock: Pin,
    /// Optional inverted copy of the clock
    pub clock_inverted: Option<Pin>,
    /// Data input
    pub input: Pin,
}

impl Default for MeterConfig {
    /// P9_25 (gpio3[21]) drives the clock with an inverted copy on gpio1[17];
    /// the data line is P9_27 (gpio3[19]).
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            data_bits: 8,
            parity: Parity::Even,
            clock: Pin::new(Bank::Gpio3, 21),
            clock_inverted: Some(Pin::new(Bank::Gpio1, 17)),
            input: Pin::new(Bank::Gpio3, 19),
        }
    }
}

impl MeterConfig {
    fn validate_timing(&self) -> Result<()> {
        let t = &self.timing;
        if t.half_period_cycles == 0 || t.settle_cycles >= t.half_period_cycles {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

/// Decoder states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    WaitForStart,
    ReadBits,
    WaitForParity,
    WaitForStop,
}

/// One decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Data bits, first received in bit 0
    pub value: u8,
    pub width: u8,
    /// Position in the receive buffer
    pub index: usize,
}

impl Frame {
    pub fn bit(&self, n: u8) -> bool {
        n < self.width && self.value & (1 << n) != 0
    }
}

/// Receive buffer and per-frame counters.
#[derive(Debug, Clone)]
pub struct MeterState {
    pub data: [u8; DATA_ARRAY_SIZE],
    /// Next free slot in `data`
    pub data_index: usize,
    /// Data bit currently being read
    pub bitno: u8,
    /// Running XOR of the data bits read so far
    pub parity: bool,
    /// Last frame completed
    pub done: bool,
    shift: u8,
}

impl MeterState {
    pub const fn new() -> Self {
        Self {
            data: [0; DATA_ARRAY_SIZE],
            data_index: 0,
            bitno: 0,
            parity: false,
            done: false,
            shift: 0,
        }
    }

    fn start_frame(&mut self) {
        self.bitno = 0;
        self.parity = false;
        self.done = false;
        self.shift = 0;
    }
}

impl Default for MeterState {
    fn default() -> Self {
        Self::new()
    }
}

/// The framing state machine, one sample at a time.
#[derive(Debug, Clone)]
pub struct Decoder {
    data_bits: u8,
    parity: Parity,
    state: DecodeState,
    meter: MeterState,
    // Line seen idle since the last abandoned frame
    armed: bool,
}

impl Decoder {
    /// Returns [`Error::InvalidConfig`] unless `data_bits` is 1 to 8.
    pub fn new(data_bits: u8, parity: Parity) -> Result<Self> {
        if !(1..=8).contains(&data_bits) {
            return Err(Error::InvalidConfig);
        }
        Ok(Self {
            data_bits,
            parity,
            state: DecodeState::WaitForStart,
            meter: MeterState::new(),
            armed: true,
        })
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn meter(&self) -> &MeterState {
        &self.meter
    }

    /// Frames completed so far.
    pub fn data(&self) -> &[u8] {
        &self.meter.data[..self.meter.data_index]
    }

    /// Feed one sample.
    ///
    /// Returns `Ok(Some(frame))` when a frame completes, `Ok(None)` while
    /// hunting or mid-frame, and an error when a frame is thrown away.  The
    /// decoder is back in [`DecodeState::WaitForStart`] after either of the
    /// latter two outcomes.
    ///
    /// A start bit is a high to low transition: after a frame is thrown away
    /// the line has to go idle before the next low sample counts.
    pub fn push(&mut self, level: bool) -> Result<Option<Frame>> {
        match self.state {
            DecodeState::WaitForStart => {
                if level {
                    self.armed = true;
                } else if self.armed {
                    self.meter.start_frame();
                    self.state = DecodeState::ReadBits;
                }
                Ok(None)
            }
            DecodeState::ReadBits => {
                self.meter.shift |= (level as u8) << self.meter.bitno;
                self.meter.parity ^= level;
                self.meter.bitno += 1;
                if self.meter.bitno == self.data_bits {
                    self.state = DecodeState::WaitForParity;
                }
                Ok(None)
            }
            DecodeState::WaitForParity => {
                let expected = self.meter.parity ^ (self.parity == Parity::Odd);
                if level != expected {
                    self.abandon();
                    return Err(Error::ParityMismatch);
                }
                self.state = DecodeState::WaitForStop;
                Ok(None)
            }
            DecodeState::WaitForStop => {
                if !level {
                    self.abandon();
                    return Err(Error::FramingError);
                }
                self.complete().map(Some)
            }
        }
    }

    /// Throw away the frame in progress.
    pub fn abandon(&mut self) {
        self.meter.start_frame();
        self.state = DecodeState::WaitForStart;
        self.armed = false;
    }

    /// Empty the receive buffer.
    pub fn reset_buffer(&mut self) {
        self.meter.data_index = 0;
    }

    fn complete(&mut self) -> Result<Frame> {
        self.state = DecodeState::WaitForStart;
        let index = self.meter.data_index;
        if index >= DATA_ARRAY_SIZE {
            return Err(Error::BufferFull);
        }
        self.meter.data[index] = self.meter.shift;
        self.meter.data_index += 1;
        self.meter.done = true;
        Ok(Frame {
            value: self.meter.shift,
            width: self.data_bits,
            index,
        })
    }
}

/// Timed driver: owns the clock line and feeds the [`Decoder`].
pub struct Meter<C: Clock, G: DigitalIo> {
    clock: C,
    gpio: G,
    config: MeterConfig,
    decoder: Decoder,
    next_edge: Option<u32>,
}

impl<C: Clock, G: DigitalIo> Meter<C, G> {
    pub fn new(clock: C, gpio: G, config: MeterConfig) -> Result<Self> {
        config.validate_timing()?;
        Ok(Self {
            clock,
            gpio,
            decoder: Decoder::new(config.data_bits, config.parity)?,
            config,
            next_edge: None,
        })
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn config(&self) -> &MeterConfig {
        &self.config
    }

    pub fn reset_buffer(&mut self) {
        self.decoder.reset_buffer();
    }

    /// Drive the clock line, and its inverted copy if there is one.
    pub fn set_clock(&mut self, high: bool) -> Result<()> {
        self.gpio.set_pin(self.config.clock, high)?;
        if let Some(inverted) = self.config.clock_inverted {
            self.gpio.set_pin(inverted, !high)?;
        }
        Ok(())
    }

    /// Clock one bit through: rising edge, settle, sample, falling edge.
    ///
    /// Edges are scheduled against absolute deadlines so time spent between
    /// calls does not accumulate as drift.  If the caller is so late that
    /// the sampling point has already passed, the frame in progress is
    /// abandoned and the schedule restarts from now.
    pub fn clock_bit(&mut self) -> Result<Option<Frame>> {
        let timing = self.config.timing;
        let now = self.clock.now()?;
        let mut missed = false;
        let edge = match self.next_edge {
            Some(edge) if (now.wrapping_sub(edge) as i32) > timing.settle_cycles as i32 => {
                missed = true;
                now
            }
            Some(edge) => edge,
            None => now,
        };

        self.clock.delay_until(edge)?;
        self.set_clock(true)?;
        self.clock
            .delay_until(edge.wrapping_add(timing.settle_cycles))?;
        let level = self.gpio.read_pin(self.config.input)?;

        let falling = edge.wrapping_add(timing.half_period_cycles);
        self.clock.delay_until(falling)?;
        self.set_clock(false)?;
        self.next_edge = Some(falling.wrapping_add(timing.half_period_cycles));

        if missed && self.decoder.state() != DecodeState::WaitForStart {
            warn!("Sampling window missed mid-frame");
            self.decoder.abandon();
            return Err(Error::FramingError);
        }

        trace!("Sampled {}", level as u8);
        self.decoder.push(level)
    }

    /// Clock bits until a frame completes or is thrown away.
    pub fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.clock_bit()? {
                return Ok(frame);
            }
        }
    }

    /// Endless sequence of frames and frame errors.
    pub fn frames(&mut self) -> Frames<'_, C, G> {
        Frames { meter: self }
    }
}

/// Iterator returned by [`Meter::frames()`].  Never ends.
pub struct Frames<'a, C: Clock, G: DigitalIo> {
    meter: &'a mut Meter<C, G>,
}

impl<C: Clock, G: DigitalIo> Iterator for Frames<'_, C, G> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.meter.next_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Bench, frame_bits};

    fn config() -> MeterConfig {
        MeterConfig {
            timing: Timing {
                settle_cycles: 7,
                half_period_cycles: 50,
            },
            ..MeterConfig::default()
        }
    }

    fn meter(bench: &Bench) -> Meter<crate::sim::SimClock, crate::sim::SimPins> {
        Meter::new(bench.clock(), bench.pins(config().input), config()).unwrap()
    }

    fn push_all(decoder: &mut Decoder, bits: &[bool]) -> Vec<Result<Option<Frame>>> {
        bits.iter().map(|b| decoder.push(*b)).collect()
    }

    #[test]
    fn decoder_recovers_data_bits() {
        let mut decoder = Decoder::new(8, Parity::Even).unwrap();
        let results = push_all(&mut decoder, &frame_bits(0xA5, 8, false));
        let frame = results.last().unwrap().unwrap().unwrap();
        assert_eq!(frame.value, 0xA5);
        assert_eq!(frame.index, 0);
        assert!(frame.bit(0) && !frame.bit(1) && frame.bit(7));
        assert!(results[..results.len() - 1].iter().all(|r| *r == Ok(None)));
        assert_eq!(decoder.data(), &[0xA5]);
        assert_eq!(decoder.state(), DecodeState::WaitForStart);
    }

    #[test]
    fn flipped_data_bit_fails_parity() {
        let mut decoder = Decoder::new(8, Parity::Even).unwrap();
        let mut bits = frame_bits(0x3C, 8, false);
        bits[3] = !bits[3];
        let results = push_all(&mut decoder, &bits[..10]);
        assert_eq!(results[9], Err(Error::ParityMismatch));
        assert_eq!(decoder.state(), DecodeState::WaitForStart);
        assert!(decoder.data().is_empty());
    }

    #[test]
    fn missing_stop_bit_is_a_framing_error() {
        let mut decoder = Decoder::new(8, Parity::Even).unwrap();
        let mut bits = frame_bits(0x01, 8, false);
        *bits.last_mut().unwrap() = false;
        let results = push_all(&mut decoder, &bits);
        assert_eq!(*results.last().unwrap(), Err(Error::FramingError));
        assert_eq!(decoder.state(), DecodeState::WaitForStart);
    }

    #[test]
    fn word_width_is_checked() {
        assert_eq!(
            Decoder::new(0, Parity::Even).err(),
            Some(Error::InvalidConfig)
        );
        assert_eq!(
            Decoder::new(9, Parity::Even).err(),
            Some(Error::InvalidConfig)
        );
        assert!(Decoder::new(1, Parity::Even).is_ok());
    }

    #[test]
    fn held_low_line_waits_for_idle() {
        let mut decoder = Decoder::new(8, Parity::Even).unwrap();
        let mut bits = frame_bits(0x01, 8, false);
        *bits.last_mut().unwrap() = false;
        let results = push_all(&mut decoder, &bits);
        assert_eq!(*results.last().unwrap(), Err(Error::FramingError));

        // A break: no start bit until the line has been idle.
        let results = push_all(&mut decoder, &[false; 30]);
        assert!(results.iter().all(|r| *r == Ok(None)));
        assert_eq!(decoder.state(), DecodeState::WaitForStart);

        decoder.push(true).unwrap();
        let results = push_all(&mut decoder, &frame_bits(0x7E, 8, false));
        assert_eq!(results.last().unwrap().unwrap().unwrap().value, 0x7E);
    }

    #[test]
    fn odd_parity_and_short_words() {
        let mut decoder = Decoder::new(7, Parity::Odd).unwrap();
        let results = push_all(&mut decoder, &frame_bits(0x55, 7, true));
        assert_eq!(results.last().unwrap().unwrap().unwrap().value, 0x55);
    }

    #[test]
    fn full_buffer_rejects_without_wrapping() {
        let mut decoder = Decoder::new(8, Parity::Even).unwrap();
        for i in 0..DATA_ARRAY_SIZE {
            let results = push_all(&mut decoder, &frame_bits(i as u8, 8, false));
            assert!(results.last().unwrap().unwrap().is_some());
        }
        let results = push_all(&mut decoder, &frame_bits(0xFF, 8, false));
        assert_eq!(*results.last().unwrap(), Err(Error::BufferFull));
        assert_eq!(decoder.data().len(), DATA_ARRAY_SIZE);
        assert_eq!(decoder.data()[0], 0);

        decoder.reset_buffer();
        let results = push_all(&mut decoder, &frame_bits(0x42, 8, false));
        assert_eq!(results.last().unwrap().unwrap().unwrap().index, 0);
    }

    #[test]
    fn bad_config_is_rejected() {
        let bench = Bench::new();
        let mut cfg = config();
        cfg.data_bits = 9;
        assert!(Meter::new(bench.clock(), bench.pins(cfg.input), cfg).is_err());
        let mut cfg = config();
        cfg.timing.settle_cycles = 60;
        assert!(Meter::new(bench.clock(), bench.pins(cfg.input), cfg).is_err());
    }

    #[test]
    fn timed_frame_round_trip() {
        let bench = Bench::new();
        bench.play(1000, 100, &frame_bits(0xC3, 8, false));
        let mut meter = meter(&bench);

        let frame = meter.next_frame().unwrap();
        assert_eq!(frame.value, 0xC3);
        assert_eq!(meter.decoder().data(), &[0xC3]);
    }

    #[test]
    fn clock_line_toggles_once_per_half_period() {
        let bench = Bench::new();
        let mut meter = meter(&bench);
        for _ in 0..3 {
            assert_eq!(meter.clock_bit(), Ok(None));
        }
        let edges = bench.clock_edges(config().clock);
        assert_eq!(
            edges,
            vec![
                (0, true),
                (50, false),
                (100, true),
                (150, false),
                (200, true),
                (250, false)
            ]
        );
        let inverted = bench.clock_edges(config().clock_inverted.unwrap());
        assert_eq!(inverted[0], (0, false));
        assert_eq!(inverted[1], (50, true));
    }

    #[test]
    fn slow_caller_does_not_drift() {
        let bench = Bench::new();
        let mut meter = meter(&bench);
        meter.clock_bit().unwrap();
        // Lateness shorter than the settle time is absorbed: the bit still
        // ends on schedule.
        bench.advance(55);
        meter.clock_bit().unwrap();
        let edges = bench.clock_edges(config().clock);
        assert_eq!(edges[2], (105, true));
        assert_eq!(edges[3], (150, false));
    }

    #[test]
    fn missed_window_mid_frame_abandons_frame() {
        let bench = Bench::new();
        bench.play(0, 100, &frame_bits(0x81, 8, false));
        let mut meter = meter(&bench);
        assert_eq!(meter.clock_bit(), Ok(None)); // start bit
        assert_eq!(meter.decoder().state(), DecodeState::ReadBits);

        bench.advance(500);
        assert_eq!(meter.clock_bit(), Err(Error::FramingError));
        assert_eq!(meter.decoder().state(), DecodeState::WaitForStart);
    }

    #[test]
    fn resynchronises_after_error() {
        let bench = Bench::new();
        let mut bad = frame_bits(0x0F, 8, false);
        bad[9] = !bad[9];
        bench.play(300, 100, &bad);
        bench.play(2345, 100, &frame_bits(0x5A, 8, false));
        let mut meter = meter(&bench);

        let mut frames = meter.frames();
        assert_eq!(frames.next(), Some(Err(Error::ParityMismatch)));
        let frame = frames.next().unwrap().unwrap();
        assert_eq!(frame.value, 0x5A);
        assert_eq!(frame.index, 0);
    }

    #[test]
    fn resynchronises_after_bad_stop_bit() {
        let bench = Bench::new();
        bench.play(0, 100, &frame_bits(0x11, 8, false));
        // Stop bit low, then the line held low for a while.
        let mut bad = frame_bits(0x33, 8, false);
        *bad.last_mut().unwrap() = false;
        bad.extend([false; 3]);
        bench.play(1300, 100, &bad);
        bench.play(3300, 100, &frame_bits(0x5A, 8, false));
        let mut meter = meter(&bench);

        let mut frames = meter.frames();
        let first = frames.next().unwrap().unwrap();
        assert_eq!((first.value, first.index), (0x11, 0));
        assert_eq!(frames.next(), Some(Err(Error::FramingError)));
        let frame = frames.next().unwrap().unwrap();
        assert_eq!((frame.value, frame.index), (0x5A, 1));
        assert_eq!(meter.decoder().data(), &[0x11, 0x5A]);
    }

    #[test]
    fn resynchronises_after_missed_window() {
        let bench = Bench::new();
        bench.play(0, 100, &frame_bits(0x11, 8, false));
        // Everything after the fifth data bit is high, so nothing left of
        // this frame looks like a start bit.
        bench.play(1300, 100, &frame_bits(0xE0, 8, false));
        bench.play(3000, 100, &frame_bits(0x5A, 8, false));
        let mut meter = meter(&bench);

        let first = meter.next_frame().unwrap();
        assert_eq!((first.value, first.index), (0x11, 0));
        while meter.decoder().state() != DecodeState::ReadBits {
            assert_eq!(meter.clock_bit(), Ok(None));
        }
        bench.advance(500);
        assert_eq!(meter.clock_bit(), Err(Error::FramingError));

        let frame = meter.next_frame().unwrap();
        assert_eq!((frame.value, frame.index), (0x5A, 1));
        assert_eq!(meter.decoder().data(), &[0x11, 0x5A]);
    }
}
