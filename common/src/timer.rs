use std::{cell::Cell, rc::Rc, sync::Arc};

use tracing::debug;

use crate::bus::WakeSignal;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mark {
    /// Not yet latched; the next poll starts the period.
    Unset,
    At(f64),
    /// One-shot that has fired.
    Completed,
    Disabled,
}

/// Scheduling arithmetic for a single timer. No I/O and no handler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerSchedule {
    frequency: f64,
    one_shot: bool,
    mark: Mark,
}

impl TimerSchedule {
    pub fn new(frequency: f64, one_shot: bool) -> Self {
        assert!(
            frequency.is_finite() && frequency > 0.0,
            "timer frequency must be positive, got {frequency}"
        );
        Self {
            frequency,
            one_shot,
            mark: Mark::Unset,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    pub fn is_disabled(&self) -> bool {
        self.mark == Mark::Disabled
    }

    pub fn is_queued(&self) -> bool {
        !matches!(self.mark, Mark::Completed | Mark::Disabled)
    }

    /// Due time, latching an unset mark to `now`. `None` means never.
    pub fn next_invoke(&mut self, now: f64) -> Option<f64> {
        if self.mark == Mark::Unset {
            self.mark = Mark::At(now);
        }
        self.peek_next_invoke(now)
    }

    /// Due time without latching; an unset timer reports `now + frequency`.
    pub fn peek_next_invoke(&self, now: f64) -> Option<f64> {
        match self.mark {
            Mark::Unset => Some(now + self.frequency),
            Mark::At(last) => Some(last + self.frequency),
            Mark::Completed | Mark::Disabled => None,
        }
    }

    pub fn mark_invoked(&mut self, now: f64) {
        if self.mark == Mark::Disabled {
            return;
        }
        self.mark = if self.one_shot {
            Mark::Completed
        } else {
            Mark::At(now)
        };
    }

    /// Re-arm from the next poll. Disabled timers stay disabled.
    pub fn reset(&mut self, frequency: Option<f64>) {
        if self.mark == Mark::Disabled {
            return;
        }
        if let Some(frequency) = frequency {
            assert!(
                frequency.is_finite() && frequency > 0.0,
                "timer frequency must be positive, got {frequency}"
            );
            self.frequency = frequency;
        }
        self.mark = Mark::Unset;
    }

    pub fn disable(&mut self) {
        self.mark = Mark::Disabled;
    }
}

/// Loop-thread handle to a timer installed on the event bus.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    schedule: Rc<Cell<TimerSchedule>>,
    wake: Arc<WakeSignal>,
}

impl TimerHandle {
    pub(crate) fn new(schedule: Rc<Cell<TimerSchedule>>, wake: Arc<WakeSignal>) -> Self {
        Self { schedule, wake }
    }

    pub fn is_queued(&self) -> bool {
        self.schedule.get().is_queued()
    }

    pub fn is_disabled(&self) -> bool {
        self.schedule.get().is_disabled()
    }

    pub fn frequency(&self) -> f64 {
        self.schedule.get().frequency()
    }

    pub fn next_invoke(&self, now: f64) -> Option<f64> {
        self.schedule.get().peek_next_invoke(now)
    }

    /// Re-arm the timer and wake the loop so the new period starts right away.
    pub fn reset(&self, frequency: Option<f64>) {
        let mut schedule = self.schedule.get();
        if schedule.is_disabled() {
            debug!("ignoring reset of a disabled timer");
            return;
        }
        schedule.reset(frequency);
        self.schedule.set(schedule);
        self.wake.notify();
    }

    pub fn disable(&self) {
        let mut schedule = self.schedule.get();
        schedule.disable();
        self.schedule.set(schedule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timer_is_due_one_period_after_first_poll() {
        let mut schedule = TimerSchedule::new(10.0, false);

        assert_eq!(schedule.next_invoke(100.0), Some(110.0));
        assert_eq!(schedule.next_invoke(105.0), Some(110.0));
    }

    #[test]
    fn recurring_timer_advances_from_invoke_time() {
        let mut schedule = TimerSchedule::new(10.0, false);
        schedule.next_invoke(100.0);

        schedule.mark_invoked(110.1);

        assert!(schedule.is_queued());
        assert_eq!(schedule.next_invoke(110.1), Some(120.1));
    }

    #[test]
    fn one_shot_completes_and_reset_rearms() {
        let mut schedule = TimerSchedule::new(60.0, true);
        schedule.next_invoke(1.0);

        schedule.mark_invoked(61.0);
        assert!(!schedule.is_queued());
        assert_eq!(schedule.next_invoke(7_000.0), None);

        schedule.reset(None);
        assert!(schedule.is_queued());
        assert_eq!(schedule.next_invoke(7_000.0), Some(7_060.0));
    }

    #[test]
    fn reset_can_change_frequency() {
        let mut schedule = TimerSchedule::new(60.0, false);
        schedule.next_invoke(1.0);

        schedule.reset(Some(5.0));

        assert_eq!(schedule.frequency(), 5.0);
        assert_eq!(schedule.next_invoke(30.0), Some(35.0));
    }

    #[test]
    fn disabled_timer_never_comes_back() {
        let mut schedule = TimerSchedule::new(60.0, false);
        schedule.disable();
        schedule.reset(None);
        schedule.mark_invoked(10.0);

        assert!(!schedule.is_queued());
        assert_eq!(schedule.next_invoke(10.0), None);
    }

    #[test]
    #[should_panic(expected = "timer frequency must be positive")]
    fn zero_frequency_is_rejected() {
        let _ = TimerSchedule::new(0.0, false);
    }
}
