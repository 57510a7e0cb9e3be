//! Event router over the two system events shared with the host.
//!
//! The PRU-ICSS interrupt controller latches system events: once raised, an
//! event stays pending until it is explicitly cleared.  A pending event that
//! is never cleared hides any later raise of the same event, so
//! [`EventRouter::acknowledge()`] must be called exactly once per observed
//! event, after its effect has been consumed.

// Copyright (C) 2025 Joshua MacDonald
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// System event the PRU raises towards the host (`pr1_pru_mst_intr[0]`).
pub const SYSEVT_PRU_TO_ARM: u8 = 16;

/// System event the host raises towards the PRU (`pr1_pru_mst_intr[1]`).
pub const SYSEVT_ARM_TO_PRU: u8 = 17;

/// INTC channel the host's event is routed to; channel 0 is the first of
/// the PRU's two input channels.
pub const INTC_CHANNEL_ARM_TO_PRU: u8 = 0;

/// Host interrupt fed by [`INTC_CHANNEL_ARM_TO_PRU`].  It shows up as bit 30
/// of the PRU's R31.
pub const HOST_INTERRUPT_ARM_TO_PRU: u8 = 0;

/// INTC channel the loader routes [`SYSEVT_PRU_TO_ARM`] to.
pub const INTC_CHANNEL_PRU_TO_ARM: u8 = 2;

/// Highest system event number on the PRU-ICSS INTC.
pub const MAX_SYSEVT: u8 = 63;

/// Raw access to an interrupt controller's system event status.
pub trait Intc {
    /// Set the pending status of `event`.
    fn raise(&mut self, event: u8) -> Result<()>;

    /// Clear the pending status of `event`.
    fn clear(&mut self, event: u8) -> Result<()>;

    /// Whether `event` is pending.
    fn is_pending(&mut self, event: u8) -> Result<bool>;

    /// Whether any event routed to `host_int` is pending.
    fn host_pending(&mut self, host_int: u8) -> Result<bool>;
}

/// The two notification lines between the PRU and the host.
#[derive(Clone)]
pub struct EventRouter<I: Intc> {
    intc: I,
    to_host: u8,
    from_host: u8,
    host_int: u8,
}

impl<I: Intc> EventRouter<I> {
    /// Arguments:
    /// - `intc` - Interrupt controller access
    /// - `to_host` - Event raised to tell the host new data is available
    /// - `from_host` - Event the host raises towards the PRU
    pub fn new(intc: I, to_host: u8, from_host: u8) -> Result<Self> {
        check_event(to_host)?;
        check_event(from_host)?;
        if to_host == from_host {
            return Err(Error::InvalidEvent);
        }
        Ok(Self {
            intc,
            to_host,
            from_host,
            host_int: HOST_INTERRUPT_ARM_TO_PRU,
        })
    }

    /// Router using the firmware's event assignment.
    pub fn pru(intc: I) -> Self {
        Self {
            intc,
            to_host: SYSEVT_PRU_TO_ARM,
            from_host: SYSEVT_ARM_TO_PRU,
            host_int: HOST_INTERRUPT_ARM_TO_PRU,
        }
    }

    pub fn to_host_event(&self) -> u8 {
        self.to_host
    }

    pub fn from_host_event(&self) -> u8 {
        self.from_host
    }

    /// Tell the host there is new data.
    pub fn signal_other(&mut self) -> Result<()> {
        trace!("Raising event {}", self.to_host);
        self.intc.raise(self.to_host)
    }

    /// Non-blocking check for a notification from the host.
    pub fn pending_from_other(&mut self) -> Result<bool> {
        if !self.intc.host_pending(self.host_int)? {
            return Ok(false);
        }
        self.intc.is_pending(self.from_host)
    }

    /// Clear `event` so it can be raised again.
    pub fn acknowledge(&mut self, event: u8) -> Result<()> {
        check_event(event)?;
        trace!("Acknowledging event {event}");
        self.intc.clear(event)
    }
}

fn check_event(event: u8) -> Result<()> {
    if event > MAX_SYSEVT {
        Err(Error::InvalidEvent)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::PrussIntc;
    use crate::sim::SimMemory;

    fn router(mem: &SimMemory) -> EventRouter<PrussIntc<SimMemory>> {
        EventRouter::pru(PrussIntc::new(mem.clone()))
    }

    #[test]
    fn signal_other_raises_host_event() {
        let mem = SimMemory::new();
        let mut events = router(&mem);
        assert!(!mem.event_pending(SYSEVT_PRU_TO_ARM));
        events.signal_other().unwrap();
        assert!(mem.event_pending(SYSEVT_PRU_TO_ARM));
        // Our own event is not routed back to us.
        assert!(!events.pending_from_other().unwrap());
    }

    #[test]
    fn acknowledge_clears_until_raised_again() {
        let mem = SimMemory::new();
        let mut events = router(&mem);

        mem.raise_event(SYSEVT_ARM_TO_PRU);
        assert!(events.pending_from_other().unwrap());
        // Still pending until acknowledged.
        assert!(events.pending_from_other().unwrap());

        events.acknowledge(SYSEVT_ARM_TO_PRU).unwrap();
        assert!(!events.pending_from_other().unwrap());
        assert!(!events.pending_from_other().unwrap());

        mem.raise_event(SYSEVT_ARM_TO_PRU);
        assert!(events.pending_from_other().unwrap());
    }

    #[test]
    fn event_numbers_are_checked() {
        let mem = SimMemory::new();
        let intc = PrussIntc::new(mem.clone());
        assert!(matches!(
            EventRouter::new(intc.clone(), 64, 17),
            Err(Error::InvalidEvent)
        ));
        assert!(matches!(
            EventRouter::new(intc.clone(), 17, 17),
            Err(Error::InvalidEvent)
        ));
        let mut events = EventRouter::new(intc, 16, 17).unwrap();
        assert_eq!(events.acknowledge(70), Err(Error::InvalidEvent));
    }
}
