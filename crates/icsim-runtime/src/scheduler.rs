//! Fixed-period device scheduling and clocks.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use smol_str::SmolStr;
use tracing::{debug, error, info};

use crate::error::{DeviceFault, RuntimeError};
use crate::metrics::CycleStats;

/// Clock interface for device scheduling.
///
/// `now` is measured from a fixed epoch so that cycle boundaries computed by
/// independent devices line up.
pub trait Clock: Send + Sync + 'static {
    /// Return the current time since the clock epoch.
    fn now(&self) -> Duration;

    /// Sleep until the given deadline.
    fn sleep_until(&self, deadline: Duration);

    /// Wake any sleepers (best-effort).
    fn wake(&self) {}
}

/// Wall clock measured from the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if let Some(delta) = deadline.checked_sub(now) {
            if !delta.is_zero() {
                thread::sleep(delta);
            }
        }
    }
}

#[derive(Debug)]
struct ManualClockState {
    now: Duration,
    sleep_calls: u64,
    interrupted: bool,
    auto_advance: bool,
}

/// Deterministic clock for tests and simulations.
///
/// By default `sleep_until` blocks until another thread advances time past the
/// deadline. An auto-advancing clock jumps straight to the deadline instead.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<(Mutex<ManualClockState>, Condvar)>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    #[must_use]
    pub fn auto_advancing() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(auto_advance: bool) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(ManualClockState {
                    now: Duration::ZERO,
                    sleep_calls: 0,
                    interrupted: false,
                    auto_advance,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Return the current manual time.
    #[must_use]
    pub fn current_time(&self) -> Duration {
        self.inner.0.lock().now
    }

    /// Advance time by the given delta.
    pub fn advance(&self, delta: Duration) -> Duration {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        state.now = state.now.saturating_add(delta);
        cvar.notify_all();
        state.now
    }

    /// Set the current time explicitly.
    pub fn set_time(&self, time: Duration) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        state.now = time;
        cvar.notify_all();
    }

    /// Number of sleep calls issued to this clock.
    #[must_use]
    pub fn sleep_calls(&self) -> u64 {
        self.inner.0.lock().sleep_calls
    }

    /// Interrupt sleepers so they can exit.
    pub fn interrupt(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().interrupted = true;
        cvar.notify_all();
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.current_time()
    }

    fn sleep_until(&self, deadline: Duration) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock();
        state.sleep_calls = state.sleep_calls.saturating_add(1);
        if state.auto_advance {
            if state.now < deadline {
                state.now = deadline;
                cvar.notify_all();
            }
            return;
        }
        while !state.interrupted && state.now < deadline {
            cvar.wait(&mut state);
        }
    }

    fn wake(&self) {
        self.interrupt();
    }
}

/// Floor `now` to the closest cycle boundary at or before it.
#[must_use]
pub fn cycle_floor(now: Duration, period: Duration) -> Duration {
    let period_nanos = period.as_nanos();
    if period_nanos == 0 {
        return now;
    }
    let floored = now.as_nanos() - now.as_nanos() % period_nanos;
    let secs = u64::try_from(floored / 1_000_000_000).unwrap_or(u64::MAX);
    #[allow(clippy::cast_possible_truncation)]
    let nanos = (floored % 1_000_000_000) as u32;
    Duration::new(secs, nanos)
}

/// Timing telemetry of a device loop, all measured on the device clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleTiming {
    pub period: Duration,
    pub start_time: Duration,
    pub last_cycle_time: Duration,
    pub current_cycle_time: Duration,
    pub last_logic_start: Duration,
    pub last_logic_end: Duration,
    pub cycles: u64,
}

impl CycleTiming {
    /// How late the last tick started relative to its target boundary.
    #[must_use]
    pub fn loop_latency(&self) -> Duration {
        self.last_logic_start
            .saturating_sub(self.last_cycle_time)
            .saturating_sub(self.period)
    }

    #[must_use]
    pub fn alive_time(&self) -> Duration {
        self.current_cycle_time.saturating_sub(self.start_time)
    }

    #[must_use]
    pub fn logic_execution_time(&self) -> Duration {
        self.last_logic_end.saturating_sub(self.last_logic_start)
    }

    /// Time between the previous and the current cycle boundary.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.current_cycle_time
            .saturating_sub(self.last_cycle_time)
    }

    /// Cycle boundary in whole milliseconds since the clock epoch.
    #[must_use]
    pub fn current_cycle_ms(&self) -> u64 {
        u64::try_from(self.current_cycle_time.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Per-device behavior driven by [`DeviceRunner`].
///
/// Errors returned from any hook stop the device. Hooks that talk to the store
/// or the network are expected to absorb transient failures themselves.
pub trait TickBehavior: Send + 'static {
    fn name(&self) -> &str;

    /// Runs once on the device thread before the first tick.
    fn before_start(&mut self, _timing: &CycleTiming) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn pre_tick(&mut self, _timing: &CycleTiming) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn logic(&mut self, timing: &CycleTiming) -> Result<(), RuntimeError>;

    fn post_tick(&mut self, _timing: &CycleTiming) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Runs once after the loop exits, including after a fault.
    fn on_stop(&mut self) {}
}

/// Device loop execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Boot,
    Running,
    Faulted,
    Stopped,
}

/// Drives one device behavior at a fixed period.
pub struct DeviceRunner<B: TickBehavior, C: Clock + Clone> {
    behavior: B,
    clock: C,
    timing: CycleTiming,
    stats: CycleStats,
    started: bool,
}

impl<B: TickBehavior, C: Clock + Clone> std::fmt::Debug for DeviceRunner<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRunner")
            .field("device", &self.behavior.name())
            .field("timing", &self.timing)
            .field("stats", &self.stats)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl<B: TickBehavior, C: Clock + Clone> DeviceRunner<B, C> {
    pub fn new(behavior: B, clock: C, period: Duration) -> Result<Self, RuntimeError> {
        if period.is_zero() {
            return Err(RuntimeError::InvalidConfig(SmolStr::new(format!(
                "device '{}' period must be positive",
                behavior.name()
            ))));
        }
        Ok(Self {
            behavior,
            clock,
            timing: CycleTiming {
                period,
                ..CycleTiming::default()
            },
            stats: CycleStats::default(),
            started: false,
        })
    }

    #[must_use]
    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn behavior_mut(&mut self) -> &mut B {
        &mut self.behavior
    }

    #[must_use]
    pub fn timing(&self) -> CycleTiming {
        self.timing
    }

    #[must_use]
    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Anchor the loop on the current cycle boundary and run `before_start`.
    ///
    /// Called implicitly by the first [`DeviceRunner::step`].
    pub fn begin(&mut self) -> Result<(), RuntimeError> {
        if self.started {
            return Ok(());
        }
        let boundary = cycle_floor(self.clock.now(), self.timing.period);
        self.timing.start_time = boundary;
        self.timing.current_cycle_time = boundary;
        self.timing.last_cycle_time = boundary;
        self.started = true;
        self.behavior.before_start(&self.timing)
    }

    /// Wait for the next cycle boundary and run one tick on this thread.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        self.begin()?;
        self.wait_next_boundary();
        self.tick()
    }

    /// Sleep until one period after the current boundary. Returns immediately
    /// when the previous tick overran.
    fn wait_next_boundary(&mut self) {
        self.timing.last_cycle_time = self.timing.current_cycle_time;
        let target = self.timing.last_cycle_time.saturating_add(self.timing.period);
        if target > self.clock.now() {
            self.clock.sleep_until(target);
        }
    }

    fn tick(&mut self) -> Result<(), RuntimeError> {
        let period = self.timing.period;
        let boundary = cycle_floor(self.clock.now(), period).max(self.timing.last_cycle_time);
        self.timing.current_cycle_time = boundary;
        let spanned = boundary.saturating_sub(self.timing.last_cycle_time).as_nanos() / period.as_nanos();
        if spanned > 1 {
            let skipped = u64::try_from(spanned - 1).unwrap_or(u64::MAX);
            debug!(device = self.behavior.name(), skipped, "cycle overrun");
            self.stats.record_overrun(skipped);
        }
        self.timing.cycles = self.timing.cycles.saturating_add(1);

        self.timing.last_logic_start = self.clock.now();
        self.behavior.pre_tick(&self.timing)?;
        let result = self.behavior.logic(&self.timing);
        self.timing.last_logic_end = self.clock.now();
        result?;
        self.behavior.post_tick(&self.timing)?;
        self.stats.record(self.timing.logic_execution_time());
        Ok(())
    }

    fn fault(&self, error: RuntimeError) -> DeviceFault {
        DeviceFault {
            device: SmolStr::new(self.behavior.name()),
            cycle_time_ms: self.timing.current_cycle_ms(),
            error,
        }
    }

    /// Spawn the loop on a dedicated OS thread. Call at most once per device.
    pub fn spawn(self, name: impl Into<String>) -> Result<DeviceHandle<C>, RuntimeError> {
        let shared = Arc::new(DeviceShared {
            stop: AtomicBool::new(false),
            state: Mutex::new(DeviceState::Boot),
            last_fault: Mutex::new(None),
            timing: Mutex::new(self.timing),
            stats: Mutex::new(self.stats),
        });
        let clock = self.clock.clone();
        let self_name = SmolStr::new(self.behavior.name());
        let shared_thread = shared.clone();
        let join = thread::Builder::new()
            .name(name.into())
            .spawn(move || run_device_loop(self, &shared_thread))
            .map_err(|err| RuntimeError::ThreadSpawn(err.to_string().into()))?;
        Ok(DeviceHandle {
            name: self_name,
            shared,
            clock,
            join: Some(join),
        })
    }
}

#[derive(Debug)]
struct DeviceShared {
    stop: AtomicBool,
    state: Mutex<DeviceState>,
    last_fault: Mutex<Option<DeviceFault>>,
    timing: Mutex<CycleTiming>,
    stats: Mutex<CycleStats>,
}

fn run_device_loop<B: TickBehavior, C: Clock + Clone>(
    mut runner: DeviceRunner<B, C>,
    shared: &DeviceShared,
) {
    let name = SmolStr::new(runner.behavior.name());
    *shared.state.lock() = DeviceState::Running;
    info!(device = %name, period_ms = runner.timing.period.as_millis(), "device started");

    let mut fault = runner.begin().err();
    while fault.is_none() && !shared.stop.load(Ordering::SeqCst) {
        runner.wait_next_boundary();
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        fault = runner.tick().err();
        *shared.timing.lock() = runner.timing;
        *shared.stats.lock() = runner.stats;
    }

    if let Some(error) = fault {
        let fault = runner.fault(error);
        error!(
            device = %name,
            fatal = true,
            cycle_time_ms = fault.cycle_time_ms,
            error = %fault.error,
            "device logic failed, stopping"
        );
        *shared.last_fault.lock() = Some(fault);
        *shared.state.lock() = DeviceState::Faulted;
    } else {
        *shared.state.lock() = DeviceState::Stopped;
    }
    runner.behavior.on_stop();
    info!(device = %name, cycles = runner.timing.cycles, "device stopped");
}

/// Handle for a running device loop.
#[derive(Debug)]
pub struct DeviceHandle<C: Clock + Clone> {
    name: SmolStr,
    shared: Arc<DeviceShared>,
    clock: C,
    join: Option<thread::JoinHandle<()>>,
}

impl<C: Clock + Clone> DeviceHandle<C> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the loop to exit at the next cycle boundary.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.clock.wake();
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        *self.shared.state.lock()
    }

    /// Fatal fault that stopped the device, if any.
    #[must_use]
    pub fn last_fault(&self) -> Option<DeviceFault> {
        self.shared.last_fault.lock().clone()
    }

    #[must_use]
    pub fn timing(&self) -> CycleTiming {
        *self.shared.timing.lock()
    }

    #[must_use]
    pub fn stats(&self) -> CycleStats {
        *self.shared.stats.lock()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, thread::JoinHandle::is_finished)
    }

    /// Wait for the loop thread, returning the fault that stopped it if any.
    pub fn join(&mut self) -> Result<(), DeviceFault> {
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                let timing = self.timing();
                return Err(DeviceFault {
                    device: self.name.clone(),
                    cycle_time_ms: timing.current_cycle_ms(),
                    error: RuntimeError::Logic("device thread panicked".into()),
                });
            }
        }
        match self.last_fault() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_floor_snaps_to_period_multiples() {
        let period = Duration::from_millis(200);
        assert_eq!(
            cycle_floor(Duration::from_millis(1_399), period),
            Duration::from_millis(1_200)
        );
        assert_eq!(
            cycle_floor(Duration::from_millis(1_400), period),
            Duration::from_millis(1_400)
        );
        assert_eq!(cycle_floor(Duration::ZERO, period), Duration::ZERO);
    }

    #[test]
    fn auto_advancing_clock_jumps_to_deadline() {
        let clock = ManualClock::auto_advancing();
        clock.sleep_until(Duration::from_millis(50));
        assert_eq!(clock.current_time(), Duration::from_millis(50));
        clock.sleep_until(Duration::from_millis(10));
        assert_eq!(clock.current_time(), Duration::from_millis(50));
        assert_eq!(clock.sleep_calls(), 2);
    }

    #[test]
    fn timing_helpers_follow_boundaries() {
        let timing = CycleTiming {
            period: Duration::from_millis(100),
            start_time: Duration::from_millis(1_000),
            last_cycle_time: Duration::from_millis(1_200),
            current_cycle_time: Duration::from_millis(1_300),
            last_logic_start: Duration::from_millis(1_304),
            last_logic_end: Duration::from_millis(1_310),
            cycles: 3,
        };
        assert_eq!(timing.loop_latency(), Duration::from_millis(4));
        assert_eq!(timing.alive_time(), Duration::from_millis(300));
        assert_eq!(timing.logic_execution_time(), Duration::from_millis(6));
        assert_eq!(timing.elapsed(), Duration::from_millis(100));
        assert_eq!(timing.current_cycle_ms(), 1_300);
    }
}
