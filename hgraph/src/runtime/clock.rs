//! Evaluation clocks: simulation and real-time.

use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::time::{EngineDelta, EngineTime, MAX_DT, MIN_TD};

/// Read access to engine time, available to nodes through injectables.
pub trait EvaluationClock {
    /// The current engine time.
    fn evaluation_time(&self) -> EngineTime;
    /// The wall-clock time; in simulation this is engine time plus lag.
    fn wall_clock_time(&self) -> EngineTime;
    /// Wall-clock time elapsed since the engine time was last advanced.
    fn engine_lag(&self) -> EngineDelta;
    /// The proposed next evaluation time, `MAX_DT` when nothing is scheduled.
    fn next_scheduled_evaluation_time(&self) -> EngineTime;
}

/// The mutating clock interface used by the engine and by nested engines.
pub trait EngineEvaluationClock: EvaluationClock {
    /// Moves engine time to `when` and clears the proposed next time.
    fn set_evaluation_time(&self, when: EngineTime);
    /// Proposes a next evaluation time; keeps the minimum of all proposals
    /// strictly greater than the current time.
    fn update_next_scheduled_evaluation_time(&self, when: EngineTime);
    /// Advances engine time to the proposed next time, blocking in real-time
    /// mode until the wall clock catches up or a push value arrives.
    fn advance_to_next_scheduled_time(&self);
    /// Whether any push source has enqueued values since the last reset.
    fn push_has_pending_values(&self) -> bool;
    /// Clears the push-pending flag; called once per cycle before draining.
    fn reset_push_has_pending_values(&self);
    /// The signal push queues use to wake the engine thread.
    fn push_signal(&self) -> Arc<PushSignal>;
}

/// The flag and condition variable shared between push queues and the
/// engine thread. Safe to signal from any thread.
#[derive(Default)]
pub struct PushSignal {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl PushSignal {
    /// Raises the pending flag and wakes the engine if it is waiting.
    pub fn set_pending(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = true;
        self.condvar.notify_all();
    }

    /// Reads the pending flag without clearing it.
    pub fn is_pending(&self) -> bool {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn clear(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = false;
    }

    /// Blocks until the flag is raised or `timeout` elapses; returns the flag.
    pub fn wait_pending(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let (pending, _) = self
            .condvar
            .wait_timeout_while(pending, timeout, |p| !*p)
            .unwrap_or_else(|e| e.into_inner());
        *pending
    }
}

struct ClockState {
    evaluation_time: Cell<EngineTime>,
    next_scheduled: Cell<EngineTime>,
    set_at: Cell<Instant>,
}

impl ClockState {
    fn new(start: EngineTime) -> Self {
        ClockState {
            evaluation_time: Cell::new(start),
            next_scheduled: Cell::new(MAX_DT),
            set_at: Cell::new(Instant::now()),
        }
    }

    fn set_evaluation_time(&self, when: EngineTime) {
        self.evaluation_time.set(when);
        self.set_at.set(Instant::now());
        self.next_scheduled.set(MAX_DT);
    }

    fn update_next(&self, when: EngineTime) {
        let current = self.evaluation_time.get();
        if when <= current {
            return;
        }
        let floor = current + MIN_TD;
        self.next_scheduled.set(floor.max(self.next_scheduled.get().min(when)));
    }

    fn lag(&self) -> EngineDelta {
        EngineDelta::from_duration(self.set_at.get().elapsed())
    }
}

/// A clock that jumps straight to the next scheduled time; wall-clock time
/// is simulated as engine time plus processing lag.
pub struct SimulationClock {
    state: ClockState,
    signal: Arc<PushSignal>,
}

impl SimulationClock {
    pub fn new(start: EngineTime) -> Self {
        SimulationClock { state: ClockState::new(start), signal: Arc::new(PushSignal::default()) }
    }
}

impl EvaluationClock for SimulationClock {
    fn evaluation_time(&self) -> EngineTime {
        self.state.evaluation_time.get()
    }

    fn wall_clock_time(&self) -> EngineTime {
        self.state.evaluation_time.get() + self.state.lag()
    }

    fn engine_lag(&self) -> EngineDelta {
        self.state.lag()
    }

    fn next_scheduled_evaluation_time(&self) -> EngineTime {
        self.state.next_scheduled.get()
    }
}

impl EngineEvaluationClock for SimulationClock {
    fn set_evaluation_time(&self, when: EngineTime) {
        self.state.set_evaluation_time(when);
    }

    fn update_next_scheduled_evaluation_time(&self, when: EngineTime) {
        self.state.update_next(when);
    }

    fn advance_to_next_scheduled_time(&self) {
        self.state.set_evaluation_time(self.state.next_scheduled.get());
    }

    fn push_has_pending_values(&self) -> bool {
        // Push sources are not evaluated in simulation mode.
        false
    }

    fn reset_push_has_pending_values(&self) {}

    fn push_signal(&self) -> Arc<PushSignal> {
        self.signal.clone()
    }
}

/// A clock that tracks the wall clock, sleeping between scheduled times and
/// waking early when a push source enqueues a value.
pub struct RealTimeClock {
    state: ClockState,
    signal: Arc<PushSignal>,
}

impl RealTimeClock {
    pub fn new(start: EngineTime) -> Self {
        RealTimeClock { state: ClockState::new(start), signal: Arc::new(PushSignal::default()) }
    }
}

impl EvaluationClock for RealTimeClock {
    fn evaluation_time(&self) -> EngineTime {
        self.state.evaluation_time.get()
    }

    fn wall_clock_time(&self) -> EngineTime {
        EngineTime::wall_clock_now()
    }

    fn engine_lag(&self) -> EngineDelta {
        EngineTime::wall_clock_now() - self.state.evaluation_time.get()
    }

    fn next_scheduled_evaluation_time(&self) -> EngineTime {
        self.state.next_scheduled.get()
    }
}

impl EngineEvaluationClock for RealTimeClock {
    fn set_evaluation_time(&self, when: EngineTime) {
        self.state.set_evaluation_time(when);
    }

    fn update_next_scheduled_evaluation_time(&self, when: EngineTime) {
        self.state.update_next(when);
    }

    fn advance_to_next_scheduled_time(&self) {
        let proposed = self.state.next_scheduled.get();
        loop {
            let now = EngineTime::wall_clock_now();
            if now >= proposed {
                self.state.set_evaluation_time(proposed);
                return;
            }
            if self.signal.is_pending() {
                // A push arrived: move to wall-clock time, never later than
                // the proposed next time and always strictly forward.
                let current = self.state.evaluation_time.get();
                self.state.set_evaluation_time((current + MIN_TD).max(now.min(proposed)));
                return;
            }
            self.signal.wait_pending((proposed - now).to_duration());
        }
    }

    fn push_has_pending_values(&self) -> bool {
        self.signal.is_pending()
    }

    fn reset_push_has_pending_values(&self) {
        self.signal.clear();
    }

    fn push_signal(&self) -> Arc<PushSignal> {
        self.signal.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::MIN_ST;

    #[test]
    fn update_next_keeps_minimum_future_time() {
        let clock = SimulationClock::new(MIN_ST);
        clock.update_next_scheduled_evaluation_time(EngineTime::from_micros(100));
        clock.update_next_scheduled_evaluation_time(EngineTime::from_micros(50));
        clock.update_next_scheduled_evaluation_time(EngineTime::from_micros(200));
        assert_eq!(clock.next_scheduled_evaluation_time(), EngineTime::from_micros(50));
        // Proposals at or before the current time are ignored.
        clock.update_next_scheduled_evaluation_time(MIN_ST);
        assert_eq!(clock.next_scheduled_evaluation_time(), EngineTime::from_micros(50));
    }

    #[test]
    fn simulation_advance_jumps() {
        let clock = SimulationClock::new(MIN_ST);
        clock.update_next_scheduled_evaluation_time(EngineTime::from_micros(1_000));
        clock.advance_to_next_scheduled_time();
        assert_eq!(clock.evaluation_time(), EngineTime::from_micros(1_000));
        assert_eq!(clock.next_scheduled_evaluation_time(), MAX_DT);
    }

    #[test]
    fn push_signal_wakes_waiter() {
        let signal = Arc::new(PushSignal::default());
        let remote = signal.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.set_pending();
        });
        assert!(signal.wait_pending(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
