use std::cell::{Ref, RefCell};

use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use tracing::{debug, info};

use crate::{
    bus::EventBus,
    config::ThermostatConfig,
    error::{ConfigError, PolicyError},
    event::{Event, EventKind, Interaction},
    policy::{ComfortPolicy, ComfortProgram},
    relay::RelayBank,
    thermostat::{EngineAction, ThermostatEngine},
    timer::TimerHandle,
    types::{ControllerStatus, ThermostatMode, ThermostatState},
};

/// Local wall-clock time for schedule lookups; `None` when unknown.
pub type LocalClock = Box<dyn Fn() -> Option<DateTime<FixedOffset>>>;

/// Everything the loop thread owns, handed to the bus as its context.
///
/// Methods take the bus so they can fire follow-up events; callers on other
/// threads reach them through `BusHandle::safe_invoke`.
pub struct ThermostatCore {
    policy: RefCell<ComfortPolicy>,
    engine: RefCell<ThermostatEngine>,
    relays: RefCell<RelayBank>,
    runout: RefCell<Option<TimerHandle>>,
    fan_runout_secs: f64,
    schedule_poll_secs: f64,
    local_clock: LocalClock,
}

impl ThermostatCore {
    pub fn new(
        config: &ThermostatConfig,
        relays: RelayBank,
        local_clock: LocalClock,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            policy: RefCell::new(ComfortPolicy::from_config(config)?),
            engine: RefCell::new(ThermostatEngine::new()),
            relays: RefCell::new(relays),
            runout: RefCell::new(None),
            fan_runout_secs: config.fan_runout_secs,
            schedule_poll_secs: config.schedule_poll_secs,
            local_clock,
        })
    }

    /// Registers the core's handlers and the schedule poll timer, and applies the
    /// schedule once right away.
    pub fn install(bus: &EventBus<Self>) -> TimerHandle {
        bus.install_event_handler(EventKind::SensorDataChanged, |bus, event| {
            if let Event::SensorDataChanged {
                temperature,
                pressure,
                humidity,
            } = event
            {
                bus.context()
                    .on_sensor_data(bus, *temperature, *pressure, *humidity)?;
            }
            Ok(())
        });
        bus.install_event_handler(EventKind::PowerPriceChanged, |bus, event| {
            if let Event::PowerPriceChanged { price, .. } = event {
                bus.context().apply_price(bus, *price);
            }
            Ok(())
        });
        bus.install_event_handler(EventKind::SettingsChanged, |bus, _| {
            bus.context().reevaluate(bus)
        });
        bus.install_event_handler(EventKind::UserInteraction, |bus, event| {
            if let Event::UserInteraction { kind } = event {
                bus.context().on_interaction(bus, *kind);
            }
            Ok(())
        });

        let core = bus.context();
        if let Err(err) = core.refresh_schedule(bus) {
            debug!("initial schedule lookup skipped: {err:#}");
        }
        bus.install_timer(core.schedule_poll_secs, false, |bus| {
            bus.context().refresh_schedule(bus)
        })
    }

    pub fn policy(&self) -> Ref<'_, ComfortPolicy> {
        self.policy.borrow()
    }

    pub fn relays(&self) -> Ref<'_, RelayBank> {
        self.relays.borrow()
    }

    pub fn state(&self) -> ThermostatState {
        self.engine.borrow().state()
    }

    pub fn runout_pending(&self) -> bool {
        self.runout
            .borrow()
            .as_ref()
            .is_some_and(TimerHandle::is_queued)
    }

    pub fn programs(&self) -> Vec<ComfortProgram> {
        self.policy.borrow().programs().to_vec()
    }

    pub fn status(&self) -> ControllerStatus {
        let policy = self.policy.borrow();
        let engine = self.engine.borrow();
        let sample = engine.last_sample();
        ControllerStatus {
            current_temp: sample.map(|sample| sample.temperature),
            current_humidity: sample.map(|sample| sample.humidity),
            current_pressure: sample.map(|sample| sample.pressure),
            mode: policy.mode().as_str(),
            state: engine.state().as_str(),
            program: policy.program().name().to_string(),
            comfort_min: policy.comfort_min(),
            comfort_max: policy.comfort_max(),
            delta: policy.delta(),
            price_average: policy.price_average(),
            in_price_override: policy.is_in_price_override(),
            runout_pending: self.runout_pending(),
            next_schedule_change: (self.local_clock)()
                .and_then(|now| policy.schedule().next_change_epoch(now)),
            relays: self.relays.borrow().snapshots(),
        }
    }

    pub fn on_sensor_data(
        &self,
        bus: &EventBus<Self>,
        temperature: f32,
        pressure: f32,
        humidity: f32,
    ) -> anyhow::Result<()> {
        self.engine
            .borrow_mut()
            .update_sensor_data(temperature, pressure, humidity);
        self.reevaluate(bus)
    }

    pub fn apply_price(&self, bus: &EventBus<Self>, price: f64) -> bool {
        let changed = self.policy.borrow_mut().apply_price(price, bus.now());
        if changed {
            bus.fire_event(Event::SettingsChanged);
        }
        changed
    }

    pub fn on_interaction(&self, bus: &EventBus<Self>, kind: Interaction) {
        match kind {
            Interaction::ComfortUp => {
                self.modify_comfort(bus, 1.0);
            }
            Interaction::ComfortDown => {
                self.modify_comfort(bus, -1.0);
            }
            Interaction::NextMode => {
                self.next_mode(bus);
            }
            Interaction::Wake => {}
        }
    }

    pub fn set_mode(&self, bus: &EventBus<Self>, mode: ThermostatMode) {
        if self.policy.borrow_mut().set_mode(mode) {
            bus.fire_event(Event::SettingsChanged);
        }
    }

    pub fn next_mode(&self, bus: &EventBus<Self>) -> ThermostatMode {
        let mode = self.policy.borrow_mut().next_mode();
        bus.fire_event(Event::SettingsChanged);
        mode
    }

    pub fn modify_comfort(&self, bus: &EventBus<Self>, step: f32) -> bool {
        let changed = self.policy.borrow_mut().modify_comfort(step);
        if changed {
            bus.fire_event(Event::SettingsChanged);
        }
        changed
    }

    pub fn set_comfort(
        &self,
        bus: &EventBus<Self>,
        min: Option<f32>,
        max: Option<f32>,
    ) -> Result<bool, PolicyError> {
        let changed = self.policy.borrow_mut().set_comfort(min, max)?;
        if changed {
            bus.fire_event(Event::SettingsChanged);
        }
        Ok(changed)
    }

    pub fn select_program(&self, bus: &EventBus<Self>, name: &str) -> Result<bool, PolicyError> {
        let changed = self.policy.borrow_mut().select_program(name)?;
        if changed {
            bus.fire_event(Event::SettingsChanged);
        }
        Ok(changed)
    }

    pub fn reset_program(&self, bus: &EventBus<Self>) {
        self.policy.borrow_mut().reset_program();
        bus.fire_event(Event::SettingsChanged);
    }

    /// Switches to the program the weekly schedule names for local now.
    pub fn refresh_schedule(&self, bus: &EventBus<Self>) -> anyhow::Result<()> {
        let Some(now) = (self.local_clock)() else {
            debug!("local time unavailable, schedule not applied");
            return Ok(());
        };
        let scheduled = self
            .policy
            .borrow()
            .scheduled_program(now)
            .map(str::to_string);
        if let Some(name) = scheduled {
            if self.select_program(bus, &name)? {
                info!(program = %name, "schedule switched program");
            }
        }
        Ok(())
    }

    /// Runs the transition table against the last sample and, on a change,
    /// drives the relays in the planned order.
    pub fn reevaluate(&self, bus: &EventBus<Self>) -> anyhow::Result<()> {
        let actions = {
            let policy = self.policy.borrow();
            self.engine
                .borrow()
                .evaluate(policy.mode(), &policy.band(), self.runout_pending())
        };
        if actions.is_empty() {
            return Ok(());
        }

        let from = self.state();
        for action in actions {
            match action {
                EngineAction::NotifyChanging(next) => {
                    bus.fire_event_immediately(Event::ThermostatStateChanging { new_state: next });
                }
                EngineAction::OpenRelay(function) => self
                    .relays
                    .borrow_mut()
                    .open(function)
                    .with_context(|| format!("failed to open {function} relay"))?,
                EngineAction::CloseRelay(function) => self
                    .relays
                    .borrow_mut()
                    .close(function)
                    .with_context(|| format!("failed to close {function} relay"))?,
                EngineAction::Commit(next) => {
                    self.engine.borrow_mut().commit(next);
                    info!(from = %from, to = %next, "thermostat state changed");
                }
                EngineAction::ArmRunout => self.arm_runout(bus),
                EngineAction::NotifyChanged(state) => {
                    bus.fire_event(Event::ThermostatStateChanged { state });
                }
            }
        }
        Ok(())
    }

    fn arm_runout(&self, bus: &EventBus<Self>) {
        let mut runout = self.runout.borrow_mut();
        match runout.as_ref() {
            Some(handle) => handle.reset(Some(self.fan_runout_secs)),
            None => {
                *runout = Some(bus.install_timer(self.fan_runout_secs, true, |bus| {
                    debug!("fan runout elapsed");
                    bus.context().reevaluate(bus)
                }));
            }
        }
        debug!(secs = self.fan_runout_secs, "fan runout armed");
    }
}
