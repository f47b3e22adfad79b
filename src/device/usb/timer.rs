//! # Interpacket Timer
//!
//! A device has to wait a minimum turnaround time after receiving a
//! packet before it may transmit its response [USB2, 7.1.18]. The
//! required delay depends on the link speed.
//!
//! The timer counts link cycles from a `start` pulse and emits a single
//! `tx_allowed` pulse once the delay for the current speed has passed.
//!
//! Only full- and low-speed links need it. A high-speed device may answer
//! after eight bit times, which is less than one link cycle, so the
//! decoder acknowledges high-speed packets without starting the timer.

use tracing::trace;

use super::{
    constants::timing::{FS_RX_TO_TX_DELAY, LS_RX_TO_TX_DELAY},
    link::{Tick, UsbSpeed},
};

/// The rx-to-tx delay in link cycles for the speeds that need one.
///
/// The count starts on the cycle after `start`, so the shortest possible
/// delay is [`MIN_DELAY`] cycles. Smaller values behave like it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpacketDelays {
    /// Delay on a full-speed link.
    pub full: u32,
    /// Delay on a low-speed link.
    pub low: u32,
}

impl InterpacketDelays {
    /// The delay to use at `speed`, `None` for high speed.
    #[must_use]
    pub const fn for_speed(&self, speed: UsbSpeed) -> Option<u32> {
        match speed {
            UsbSpeed::High => None,
            UsbSpeed::Full => Some(self.full),
            UsbSpeed::Low => Some(self.low),
        }
    }
}

impl Default for InterpacketDelays {
    fn default() -> Self {
        Self {
            full: FS_RX_TO_TX_DELAY,
            low: LS_RX_TO_TX_DELAY,
        }
    }
}

/// The shortest delay the timer can count, in link cycles.
pub const MIN_DELAY: u32 = 1;

/// Counting implementation of the interpacket timer.
///
/// `tx_allowed` is a registered output: the value returned by
/// [`tick`](Self::tick) is what consumers sample on the following tick.
#[derive(Debug, Clone)]
pub struct InterpacketTimer {
    delays: InterpacketDelays,

    /// Cycles elapsed since the last `start`, `None` while disarmed.
    elapsed: Option<u32>,
}

impl InterpacketTimer {
    /// Create a disarmed timer.
    #[must_use]
    pub const fn new(delays: InterpacketDelays) -> Self {
        Self {
            delays,
            elapsed: None,
        }
    }

    /// The configured delays.
    #[must_use]
    pub const fn delays(&self) -> &InterpacketDelays {
        &self.delays
    }

    /// Whether the timer is currently counting.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.elapsed.is_some()
    }

    /// Advance the timer by one link cycle.
    ///
    /// A `start` pulse (re)arms the timer with a count of zero. Returns
    /// true on the single tick on which the delay for `speed` elapses.
    /// A timer started on a high-speed link fires after [`MIN_DELAY`].
    pub fn tick(&mut self, now: Tick, start: bool, speed: UsbSpeed) -> bool {
        if start {
            trace!("{now} interpacket timer started ({speed})");
            self.elapsed = Some(0);
            return false;
        }

        let Some(elapsed) = self.elapsed.as_mut() else {
            return false;
        };

        *elapsed += 1;
        let delay = self.delays.for_speed(speed).unwrap_or(MIN_DELAY);
        if *elapsed < delay.max(MIN_DELAY) {
            return false;
        }

        trace!("{now} interpacket delay elapsed after {} cycles", *elapsed);
        self.elapsed = None;
        true
    }
}

impl Default for InterpacketTimer {
    fn default() -> Self {
        Self::new(InterpacketDelays::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the timer after a start pulse and return the tick offsets on
    /// which `tx_allowed` fired.
    fn fire_offsets(timer: &mut InterpacketTimer, speed: UsbSpeed, cycles: u64) -> Vec<u64> {
        assert!(!timer.tick(Tick(0), true, speed));

        (1..=cycles)
            .filter(|&offset| timer.tick(Tick(offset), false, speed))
            .collect()
    }

    #[test]
    fn disarmed_timer_never_fires() {
        let mut timer = InterpacketTimer::default();

        for tick in 0..200 {
            assert!(!timer.tick(Tick(tick), false, UsbSpeed::Full));
        }
    }

    #[test]
    fn fires_once_per_start_after_speed_delay() {
        let mut timer = InterpacketTimer::default();

        assert_eq!(fire_offsets(&mut timer, UsbSpeed::High, 100), vec![1]);
        assert_eq!(fire_offsets(&mut timer, UsbSpeed::Full, 100), vec![10]);
        assert_eq!(fire_offsets(&mut timer, UsbSpeed::Low, 100), vec![80]);
        assert!(!timer.is_armed());
    }

    #[test]
    fn restart_resets_the_count() {
        let mut timer = InterpacketTimer::new(InterpacketDelays {
            full: 4,
            low: 8,
        });

        timer.tick(Tick(0), true, UsbSpeed::Full);
        timer.tick(Tick(1), false, UsbSpeed::Full);
        timer.tick(Tick(2), false, UsbSpeed::Full);
        timer.tick(Tick(3), true, UsbSpeed::Full);

        let fired: Vec<u64> = (4..12)
            .filter(|&tick| timer.tick(Tick(tick), false, UsbSpeed::Full))
            .collect();
        assert_eq!(fired, vec![7]);
    }

    #[test]
    fn high_speed_has_no_configurable_delay() {
        let delays = InterpacketDelays::default();

        assert_eq!(delays.for_speed(UsbSpeed::High), None);
        assert_eq!(delays.for_speed(UsbSpeed::Full), Some(10));
        assert_eq!(delays.for_speed(UsbSpeed::Low), Some(80));
    }

    #[test]
    fn zero_delay_counts_as_the_minimum() {
        let mut zero = InterpacketTimer::new(InterpacketDelays { full: 0, low: 0 });
        let mut one = InterpacketTimer::new(InterpacketDelays { full: 1, low: 1 });

        assert_eq!(fire_offsets(&mut zero, UsbSpeed::Full, 10), vec![1]);
        assert_eq!(fire_offsets(&mut one, UsbSpeed::Full, 10), vec![1]);
        assert_eq!(fire_offsets(&mut zero, UsbSpeed::Low, 10), vec![1]);
    }
}
