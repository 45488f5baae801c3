//! Single-threaded cooperative event loop.
//!
//! The [`EventBus`] owns timers, handlers and an invocation context `C`, and is
//! pinned to the thread that created it. Other threads talk to it through a
//! [`BusHandle`], which can only queue events or marshal a call onto the loop.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, error, info, trace, warn};

use crate::{
    error::InvokeError,
    event::{Event, EventKind},
    registry::HandlerRegistry,
    timer::{TimerHandle, TimerSchedule},
};

/// Timers due within this many seconds of `now` fire on the current pass.
pub const GUARD_WINDOW_SECS: f64 = 0.2;
/// Longest the loop sleeps when no timer is due sooner.
pub const MAX_IDLE_SECS: f64 = 60.0;

type TimerFn<C> = dyn FnMut(&EventBus<C>) -> anyhow::Result<()>;
type InvokeFn<C> = Box<dyn FnOnce(&EventBus<C>) + Send>;

enum Envelope<C: 'static> {
    Event(Event),
    Invoke(InvokeFn<C>),
}

#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    pub(crate) fn notify(&self) {
        *lock(&self.woken) = true;
        self.condvar.notify_all();
    }

    /// Block until notified or `timeout` elapses, consuming the notification.
    fn wait(&self, timeout: Duration) {
        let guard = lock(&self.woken);
        let (mut woken, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |woken| !*woken)
            .unwrap_or_else(PoisonError::into_inner);
        *woken = false;
    }
}

struct Inbox<C: 'static> {
    queue: VecDeque<Envelope<C>>,
    stopped: bool,
}

struct Shared<C: 'static> {
    inbox: Mutex<Inbox<C>>,
    wake: Arc<WakeSignal>,
    loop_thread: ThreadId,
}

impl<C: 'static> Shared<C> {
    fn push(&self, envelope: Envelope<C>) -> Result<(), InvokeError> {
        {
            let mut inbox = lock(&self.inbox);
            if inbox.stopped {
                return Err(InvokeError::Stopped);
            }
            inbox.queue.push_back(envelope);
        }
        self.wake.notify();
        Ok(())
    }

    fn pop(&self) -> Option<Envelope<C>> {
        lock(&self.inbox).queue.pop_front()
    }

    fn stop(&self) {
        let pending = {
            let mut inbox = lock(&self.inbox);
            if inbox.stopped {
                return;
            }
            inbox.stopped = true;
            std::mem::take(&mut inbox.queue)
        };
        if !pending.is_empty() {
            debug!(pending = pending.len(), "discarding queued messages on stop");
        }
        // Dropping queued invocations releases their callers with `Stopped`.
        drop(pending);
        self.wake.notify();
    }

    fn is_stopped(&self) -> bool {
        lock(&self.inbox).stopped
    }
}

/// Thread-safe entry point into a running [`EventBus`].
pub struct BusHandle<C: 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: 'static> Clone for BusHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: 'static> BusHandle<C> {
    /// Queue an event for the loop. Events fired after `stop()` are dropped.
    pub fn fire_event(&self, event: Event) {
        let kind = event.kind();
        if self.shared.push(Envelope::Event(event)).is_err() {
            debug!(event = kind.as_str(), "event loop stopped, dropping event");
        }
    }

    /// Run `f` on the loop thread and wait for its result.
    pub fn safe_invoke<R, F>(&self, f: F) -> Result<R, InvokeError>
    where
        F: FnOnce(&EventBus<C>) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let reply = self.submit(f)?;
        reply.recv().map_err(|_| InvokeError::Stopped)?
    }

    /// Like [`safe_invoke`](Self::safe_invoke) but gives up after `timeout`.
    /// The call may still run later on the loop.
    pub fn safe_invoke_timeout<R, F>(&self, timeout: Duration, f: F) -> Result<R, InvokeError>
    where
        F: FnOnce(&EventBus<C>) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let reply = self.submit(f)?;
        match reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(InvokeError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(InvokeError::Stopped),
        }
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    fn submit<R, F>(&self, f: F) -> Result<mpsc::Receiver<Result<R, InvokeError>>, InvokeError>
    where
        F: FnOnce(&EventBus<C>) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        if thread::current().id() == self.shared.loop_thread {
            return Err(InvokeError::LoopThread);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let job: InvokeFn<C> = Box::new(move |bus| {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(bus))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(InvokeError::Failed(err)),
                Err(payload) => Err(InvokeError::Panicked(panic_message(payload.as_ref()))),
            };
            // The caller may have timed out and gone away.
            let _ = tx.send(outcome);
        });

        self.shared.push(Envelope::Invoke(job))?;
        Ok(rx)
    }
}

struct Timer<C: 'static> {
    schedule: Rc<Cell<TimerSchedule>>,
    handler: Rc<RefCell<TimerFn<C>>>,
}

impl<C: 'static> Clone for Timer<C> {
    fn clone(&self) -> Self {
        Self {
            schedule: Rc::clone(&self.schedule),
            handler: Rc::clone(&self.handler),
        }
    }
}

impl<C: 'static> Timer<C> {
    fn next_invoke(&self, now: f64) -> Option<f64> {
        let mut schedule = self.schedule.get();
        let due = schedule.next_invoke(now);
        self.schedule.set(schedule);
        due
    }
}

/// The cooperative dispatcher. Not `Send`: everything it owns is touched only
/// from the loop thread.
pub struct EventBus<C: 'static> {
    context: C,
    now: Cell<f64>,
    timers: RefCell<Vec<Timer<C>>>,
    handlers: RefCell<HandlerRegistry<C>>,
    shared: Arc<Shared<C>>,
}

impl<C: 'static> EventBus<C> {
    pub fn new(context: C) -> Self {
        Self {
            context,
            now: Cell::new(0.0),
            timers: RefCell::new(Vec::new()),
            handlers: RefCell::new(HandlerRegistry::new()),
            shared: Arc::new(Shared {
                inbox: Mutex::new(Inbox {
                    queue: VecDeque::new(),
                    stopped: false,
                }),
                wake: Arc::new(WakeSignal::default()),
                loop_thread: thread::current().id(),
            }),
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn handle(&self) -> BusHandle<C> {
        BusHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Timestamp passed to the most recent [`process_events`](Self::process_events).
    pub fn now(&self) -> f64 {
        self.now.get()
    }

    pub fn install_event_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&EventBus<C>, &Event) -> anyhow::Result<()> + 'static,
    {
        self.handlers.borrow_mut().register(kind, handler);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.borrow().count(kind)
    }

    /// Schedule `handler` every `frequency` seconds (or once). The first run is
    /// one period after the next poll.
    pub fn install_timer<F>(&self, frequency: f64, one_shot: bool, handler: F) -> TimerHandle
    where
        F: FnMut(&EventBus<C>) -> anyhow::Result<()> + 'static,
    {
        let schedule = Rc::new(Cell::new(TimerSchedule::new(frequency, one_shot)));
        let handler: Rc<RefCell<TimerFn<C>>> = Rc::new(RefCell::new(handler));
        self.timers.borrow_mut().push(Timer {
            schedule: Rc::clone(&schedule),
            handler,
        });
        self.shared.wake.notify();
        TimerHandle::new(schedule, Arc::clone(&self.shared.wake))
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Queue `event` for the next drain.
    pub fn fire_event(&self, event: Event) {
        let kind = event.kind();
        if self.shared.push(Envelope::Event(event)).is_err() {
            debug!(event = kind.as_str(), "event loop stopped, dropping event");
        }
    }

    /// Dispatch `event` synchronously on the calling (loop) thread, ahead of
    /// anything queued.
    pub fn fire_event_immediately(&self, event: Event) {
        self.dispatch(&event);
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Run due timers, then drain the inbound queue. Returns seconds until the
    /// next timer is due, clamped to `[0, MAX_IDLE_SECS]`.
    ///
    /// # Panics
    ///
    /// Panics if `now` is not positive.
    pub fn process_events(&self, now: f64) -> f64 {
        assert!(now > 0.0, "process_events requires a positive time, got {now}");
        self.now.set(now);

        let timers: Vec<Timer<C>> = {
            let mut timers = self.timers.borrow_mut();
            timers.retain(|timer| !timer.schedule.get().is_disabled());
            timers.clone()
        };

        let mut wait = MAX_IDLE_SECS;
        for timer in &timers {
            if let Some(due) = timer.next_invoke(now) {
                if due - now <= GUARD_WINDOW_SECS {
                    self.invoke_timer(timer, now);
                }
            }
            if let Some(due) = timer.next_invoke(now) {
                wait = wait.min(due - now);
            }
        }

        while let Some(envelope) = self.shared.pop() {
            match envelope {
                Envelope::Event(event) => self.dispatch(&event),
                Envelope::Invoke(job) => job(self),
            }
        }

        wait.clamp(0.0, MAX_IDLE_SECS)
    }

    /// Run the loop against the wall clock until stopped or `iterations` passes.
    pub fn exec(&self, iterations: Option<usize>) {
        self.exec_with_clock(iterations, wall_clock_secs);
    }

    pub fn exec_with_clock<F>(&self, iterations: Option<usize>, mut clock: F)
    where
        F: FnMut() -> f64,
    {
        info!("event loop started");
        let mut completed = 0usize;
        while !self.is_stopped() {
            let wait = self.process_events(clock());
            completed += 1;
            if iterations.is_some_and(|limit| completed >= limit) {
                break;
            }
            trace!(wait, "event loop idle");
            self.shared.wake.wait(Duration::from_secs_f64(wait));
        }
        info!(iterations = completed, "event loop finished");
    }

    fn invoke_timer(&self, timer: &Timer<C>, now: f64) {
        // Mark first so a handler that resets its own timer keeps the new period.
        let mut schedule = timer.schedule.get();
        schedule.mark_invoked(now);
        timer.schedule.set(schedule);

        let outcome = match timer.handler.try_borrow_mut() {
            Ok(mut handler) => panic::catch_unwind(AssertUnwindSafe(|| (&mut *handler)(self))),
            Err(_) => Ok(Err(anyhow::anyhow!("timer handler re-entered"))),
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("timer handler failed: {err:#}"),
            Err(payload) => error!(
                "timer handler panicked: {}",
                panic_message(payload.as_ref())
            ),
        }
    }

    fn dispatch(&self, event: &Event) {
        let handlers = self.handlers.borrow().handlers_for(event.kind());
        if handlers.is_empty() {
            trace!(event = event.name(), "no handlers");
            return;
        }

        for handler in handlers {
            let outcome = match handler.try_borrow_mut() {
                Ok(mut handler) => {
                    panic::catch_unwind(AssertUnwindSafe(|| (&mut *handler)(self, event)))
                }
                Err(_) => Ok(Err(anyhow::anyhow!("handler re-entered while running"))),
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(event = event.name(), "event handler failed: {err:#}"),
                Err(payload) => error!(
                    event = event.name(),
                    "event handler panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        }
    }
}

impl<C: 'static> Drop for EventBus<C> {
    fn drop(&mut self) {
        if !self.shared.is_stopped() {
            warn!("event bus dropped while running, stopping");
            self.shared.stop();
        }
    }
}

pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(f64::MIN_POSITIVE)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, time::Instant};

    use super::*;
    use crate::{event::Interaction, types::ThermostatState};

    fn price(value: f64) -> Event {
        Event::PowerPriceChanged {
            price: value,
            next_update_secs: 60,
        }
    }

    fn recorder(bus: &EventBus<()>, kind: EventKind) -> Rc<RefCell<Vec<Event>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bus.install_event_handler(kind, move |_, event| {
            sink.borrow_mut().push(event.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new(());
        let order = Rc::new(RefCell::new(Vec::new()));
        for id in 0..3 {
            let order = Rc::clone(&order);
            bus.install_event_handler(EventKind::SettingsChanged, move |_, _| {
                order.borrow_mut().push(id);
                Ok(())
            });
        }

        bus.fire_event(Event::SettingsChanged);
        bus.process_events(1.0);

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let bus = EventBus::new(());
        bus.install_event_handler(EventKind::SettingsChanged, |_, _| {
            anyhow::bail!("display unplugged")
        });
        bus.install_event_handler(EventKind::SettingsChanged, |_, _| {
            panic!("exporter bug");
        });
        let seen = recorder(&bus, EventKind::SettingsChanged);

        bus.fire_event(Event::SettingsChanged);
        bus.fire_event(Event::SettingsChanged);
        bus.process_events(1.0);

        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let bus = EventBus::new(());
        let prices = recorder(&bus, EventKind::PowerPriceChanged);

        bus.fire_event(Event::SettingsChanged);
        bus.fire_event(price(0.2));
        bus.process_events(1.0);

        assert_eq!(*prices.borrow(), vec![price(0.2)]);
    }

    #[test]
    fn immediate_events_bypass_the_queue() {
        let bus = EventBus::new(());
        let seen = recorder(&bus, EventKind::ThermostatStateChanging);
        let changing = Event::ThermostatStateChanging {
            new_state: ThermostatState::Heating,
        };

        bus.fire_event(changing.clone());
        bus.fire_event_immediately(changing.clone());

        assert_eq!(seen.borrow().len(), 1);
        bus.process_events(1.0);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn events_fired_by_handlers_drain_in_same_pass() {
        let bus = EventBus::new(());
        bus.install_event_handler(EventKind::UserInteraction, |bus, _| {
            bus.fire_event(Event::SettingsChanged);
            Ok(())
        });
        let settings = recorder(&bus, EventKind::SettingsChanged);

        bus.fire_event(Event::UserInteraction {
            kind: Interaction::NextMode,
        });
        bus.process_events(1.0);

        assert_eq!(settings.borrow().len(), 1);
    }

    #[test]
    fn one_shot_timer_fires_exactly_once() {
        let bus = EventBus::new(());
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let timer = bus.install_timer(60.0, true, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });

        bus.process_events(1.0);
        bus.process_events(2.0);
        assert!(timer.is_queued());
        assert_eq!(fired.get(), 0);

        bus.process_events(71.0);
        assert_eq!(fired.get(), 1);
        assert!(!timer.is_queued());

        bus.process_events(7_071.0);
        assert_eq!(fired.get(), 1);

        timer.reset(None);
        assert!(timer.is_queued());
        bus.process_events(7_072.0);
        bus.process_events(7_132.0);
        bus.process_events(9_000.0);
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn timer_fires_inside_guard_window() {
        let bus = EventBus::new(());
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        bus.install_timer(10.0, false, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });

        bus.process_events(100.0);
        bus.process_events(109.85);

        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn wait_is_time_to_nearest_timer() {
        let bus = EventBus::new(());
        bus.install_timer(30.0, false, |_| Ok(()));
        bus.install_timer(5.0, false, |_| Ok(()));

        let wait = bus.process_events(100.0);

        assert!((wait - 5.0).abs() < 1e-9);
    }

    #[test]
    fn wait_is_capped_at_max_idle() {
        let bus = EventBus::new(());
        assert_eq!(bus.process_events(1.0), MAX_IDLE_SECS);

        bus.install_timer(600.0, false, |_| Ok(()));
        assert_eq!(bus.process_events(2.0), MAX_IDLE_SECS);
    }

    #[test]
    fn disabled_timers_are_dropped() {
        let bus = EventBus::new(());
        let timer = bus.install_timer(1.0, false, |_| {
            panic!("disabled timer ran");
        });
        timer.disable();

        bus.process_events(1.0);
        bus.process_events(5.0);

        assert_eq!(bus.timer_count(), 0);
        assert!(!timer.is_queued());
    }

    #[test]
    fn failing_timer_keeps_its_schedule() {
        let bus = EventBus::new(());
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        bus.install_timer(10.0, false, move |_| {
            counter.set(counter.get() + 1);
            anyhow::bail!("sensor read failed")
        });

        bus.process_events(1.0);
        bus.process_events(11.0);
        bus.process_events(21.0);

        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn timers_run_before_queued_events() {
        let bus = EventBus::new(());
        let order = Rc::new(RefCell::new(Vec::new()));
        let timer_order = Rc::clone(&order);
        bus.install_timer(1.0, false, move |_| {
            timer_order.borrow_mut().push("timer");
            Ok(())
        });
        let event_order = Rc::clone(&order);
        bus.install_event_handler(EventKind::SettingsChanged, move |_, _| {
            event_order.borrow_mut().push("event");
            Ok(())
        });

        bus.process_events(1.0);
        bus.fire_event(Event::SettingsChanged);
        bus.process_events(2.0);

        assert_eq!(*order.borrow(), vec!["timer", "event"]);
    }

    #[test]
    fn now_tracks_last_process_call() {
        let bus = EventBus::new(());
        assert_eq!(bus.now(), 0.0);
        bus.process_events(42.5);
        assert_eq!(bus.now(), 42.5);
    }

    #[test]
    #[should_panic(expected = "process_events requires a positive time")]
    fn non_positive_time_is_a_bug() {
        let bus = EventBus::new(());
        bus.process_events(0.0);
    }

    #[test]
    fn concurrent_producers_are_delivered_fifo() {
        let bus = EventBus::new(());
        let seen = recorder(&bus, EventKind::PowerPriceChanged);
        let handle = bus.handle();

        let workers: Vec<_> = (0..3)
            .map(|id| {
                let handle = handle.clone();
                thread::spawn(move || handle.fire_event(price(id as f64)))
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        bus.process_events(1.0);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        let mut prices: Vec<f64> = seen
            .iter()
            .map(|event| match event {
                Event::PowerPriceChanged { price, .. } => *price,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        prices.sort_by(f64::total_cmp);
        assert_eq!(prices, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn queue_preserves_submission_order() {
        let bus = EventBus::new(());
        let seen = recorder(&bus, EventKind::PowerPriceChanged);
        let handle = bus.handle();

        thread::spawn(move || {
            for value in [0.1, 0.2, 0.3] {
                handle.fire_event(price(value));
            }
        })
        .join()
        .unwrap();
        bus.process_events(1.0);

        assert_eq!(*seen.borrow(), vec![price(0.1), price(0.2), price(0.3)]);
    }

    #[test]
    fn safe_invoke_runs_on_loop_and_returns_value() {
        let bus = EventBus::new(Cell::new(7));
        let handle = bus.handle();

        let caller = thread::spawn(move || {
            handle.safe_invoke(|bus| {
                bus.context().set(bus.context().get() * 6);
                Ok(bus.context().get())
            })
        });
        let started = Instant::now();
        while !caller.is_finished() && started.elapsed() < Duration::from_secs(5) {
            bus.process_events(1.0);
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(caller.join().unwrap().unwrap(), 42);
        assert_eq!(bus.context().get(), 42);
    }

    #[test]
    fn safe_invoke_propagates_errors_and_panics() {
        let bus = EventBus::new(());
        let handle = bus.handle();
        let barrier = Arc::new(Barrier::new(2));
        let ready = Arc::clone(&barrier);

        let caller = thread::spawn(move || {
            ready.wait();
            let failed = handle.safe_invoke(|_| -> anyhow::Result<()> {
                anyhow::bail!("bad comfort value")
            });
            let panicked = handle.safe_invoke(|_| -> anyhow::Result<()> { panic!("boom") });
            (failed, panicked)
        });
        barrier.wait();
        let started = Instant::now();
        while !caller.is_finished() && started.elapsed() < Duration::from_secs(5) {
            bus.process_events(1.0);
            thread::sleep(Duration::from_millis(1));
        }

        let (failed, panicked) = caller.join().unwrap();
        match failed {
            Err(InvokeError::Failed(err)) => assert_eq!(err.to_string(), "bad comfort value"),
            other => panic!("expected failure, got {other:?}"),
        }
        match panicked {
            Err(InvokeError::Panicked(message)) => assert_eq!(message, "boom"),
            other => panic!("expected panic, got {other:?}"),
        }
    }

    #[test]
    fn safe_invoke_from_loop_thread_is_refused() {
        let bus = EventBus::new(());
        let result = bus.handle().safe_invoke(|_| Ok(()));
        assert!(matches!(result, Err(InvokeError::LoopThread)));
    }

    #[test]
    fn safe_invoke_timeout_gives_up() {
        let bus = EventBus::new(());
        let handle = bus.handle();

        let result = thread::spawn(move || {
            handle.safe_invoke_timeout(Duration::from_millis(20), |_| Ok(()))
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(InvokeError::Timeout)));
    }

    #[test]
    fn stop_releases_pending_callers_and_rejects_new_ones() {
        let bus = EventBus::new(());
        let handle = bus.handle();
        let caller_handle = handle.clone();

        let caller = thread::spawn(move || caller_handle.safe_invoke(|_| Ok(())));
        while lock(&bus.shared.inbox).queue.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        handle.stop();
        handle.stop();

        assert!(matches!(caller.join().unwrap(), Err(InvokeError::Stopped)));
        let late = thread::spawn(move || handle.safe_invoke(|_| Ok(())))
            .join()
            .unwrap();
        assert!(matches!(late, Err(InvokeError::Stopped)));
        assert!(bus.is_stopped());
    }

    #[test]
    fn exec_runs_until_stopped_from_another_thread() {
        let bus = EventBus::new(());
        let ticks = Rc::new(Cell::new(0));
        let counter = Rc::clone(&ticks);
        bus.install_timer(0.01, false, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        let handle = bus.handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            handle.stop();
        });

        bus.exec(None);
        stopper.join().unwrap();

        assert!(bus.is_stopped());
        assert!(ticks.get() > 0);
    }

    #[test]
    fn timer_reset_wakes_idle_exec_loop() {
        let bus = EventBus::new(());
        let fired = Rc::new(Cell::new(false));
        let timer = {
            let fired = Rc::clone(&fired);
            bus.install_timer(30.0, true, move |bus| {
                fired.set(true);
                bus.stop();
                Ok(())
            })
        };
        bus.install_event_handler(EventKind::SettingsChanged, move |_, _| {
            timer.reset(Some(0.05));
            Ok(())
        });
        let handle = bus.handle();
        let nudger = thread::spawn({
            let handle = handle.clone();
            move || {
                thread::sleep(Duration::from_millis(100));
                handle.fire_event(Event::SettingsChanged);
            }
        });
        // Bounds the test if the reset fails to wake the loop.
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(5));
            handle.stop();
        });

        let started = Instant::now();
        bus.exec(None);
        nudger.join().unwrap();

        assert!(fired.get());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn exec_honours_iteration_budget() {
        let bus = EventBus::new(());
        let mut clock = 0.0;
        let polls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&polls);
        bus.install_timer(0.001, false, move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        });

        bus.exec_with_clock(Some(4), || {
            clock += 1.0;
            clock
        });

        assert_eq!(polls.get(), 3);
        assert_eq!(bus.now(), 4.0);
        assert!(!bus.is_stopped());
    }
}
