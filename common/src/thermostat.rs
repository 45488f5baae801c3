use crate::types::{ThermostatMode, ThermostatState};

/// Comfort band with the hysteresis thresholds derived from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComfortBand {
    pub comfort_min: f32,
    pub comfort_max: f32,
    pub delta: f32,
}

impl ComfortBand {
    /// Below this, heating starts.
    pub fn h1(&self) -> f32 {
        self.comfort_min - self.delta
    }

    /// Above this, heating stops.
    pub fn h2(&self) -> f32 {
        self.comfort_min + self.delta
    }

    /// Below this, cooling stops.
    pub fn c2(&self) -> f32 {
        self.comfort_max - self.delta
    }

    /// Above this, cooling starts.
    pub fn c1(&self) -> f32 {
        self.comfort_max + self.delta
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub temperature: f32,
    pub pressure: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub next: ThermostatState,
    /// Leaving HEATING/COOLING for FAN while the mode is not FAN.
    pub arm_runout: bool,
}

impl Decision {
    fn stay(state: ThermostatState) -> Self {
        Self {
            next: state,
            arm_runout: false,
        }
    }

    fn runout() -> Self {
        Self {
            next: ThermostatState::Fan,
            arm_runout: true,
        }
    }
}

/// Steps of a state transition, in the order the host must perform them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    NotifyChanging(ThermostatState),
    OpenRelay(ThermostatState),
    CloseRelay(ThermostatState),
    Commit(ThermostatState),
    ArmRunout,
    NotifyChanged(ThermostatState),
}

/// Pure transition table. `runout_pending` is true while the fan runout timer
/// has not yet expired.
pub fn decide(
    current: ThermostatState,
    mode: ThermostatMode,
    temperature: f32,
    band: &ComfortBand,
    runout_pending: bool,
) -> Decision {
    use crate::types::ThermostatState::{Cooling, Fan, Heating, Off};

    let wants_heat = mode.permits_heat() && temperature < band.h1();
    let wants_cool = mode.permits_cool() && temperature > band.c1();

    match current {
        Off | Fan => {
            if wants_heat {
                Decision::stay(Heating)
            } else if wants_cool {
                Decision::stay(Cooling)
            } else if mode == ThermostatMode::Fan {
                Decision::stay(Fan)
            } else if current == Fan && runout_pending {
                Decision::stay(Fan)
            } else {
                Decision::stay(Off)
            }
        }
        Heating => match mode {
            ThermostatMode::Fan => Decision::stay(Fan),
            ThermostatMode::Off => Decision::runout(),
            ThermostatMode::Auto | ThermostatMode::Cool if temperature > band.c1() => {
                Decision::stay(Cooling)
            }
            ThermostatMode::Cool => Decision::runout(),
            ThermostatMode::Auto | ThermostatMode::Heat => {
                if temperature > band.h2() {
                    Decision::runout()
                } else {
                    Decision::stay(Heating)
                }
            }
        },
        Cooling => match mode {
            ThermostatMode::Fan => Decision::stay(Fan),
            ThermostatMode::Off => Decision::runout(),
            ThermostatMode::Auto | ThermostatMode::Heat if temperature < band.h1() => {
                Decision::stay(Heating)
            }
            ThermostatMode::Heat => Decision::runout(),
            ThermostatMode::Auto | ThermostatMode::Cool => {
                if temperature < band.c2() {
                    Decision::runout()
                } else {
                    Decision::stay(Cooling)
                }
            }
        },
    }
}

/// Relay-safe ordering: the outgoing relay always opens before any other closes,
/// so HEAT and COOL are never closed together.
pub fn transition_plan(current: ThermostatState, next: ThermostatState, arm_runout: bool) -> Vec<EngineAction> {
    let mut actions = vec![EngineAction::NotifyChanging(next)];
    if current != ThermostatState::Off {
        actions.push(EngineAction::OpenRelay(current));
    }
    if next.should_also_run_fan() {
        actions.push(EngineAction::CloseRelay(ThermostatState::Fan));
    }
    if next != ThermostatState::Off {
        actions.push(EngineAction::CloseRelay(next));
    }
    actions.push(EngineAction::Commit(next));
    if arm_runout {
        actions.push(EngineAction::ArmRunout);
    }
    actions.push(EngineAction::NotifyChanged(next));
    actions
}

#[derive(Debug, Clone, Default)]
pub struct ThermostatEngine {
    state: ThermostatState,
    last_sample: Option<SensorSample>,
    transitions: u64,
}

impl ThermostatEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ThermostatState {
        self.state
    }

    pub fn last_sample(&self) -> Option<SensorSample> {
        self.last_sample
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn update_sensor_data(&mut self, temperature: f32, pressure: f32, humidity: f32) {
        self.last_sample = Some(SensorSample {
            temperature,
            pressure,
            humidity,
        });
    }

    /// Actions for the next transition, or empty when the state holds or no sample
    /// has arrived yet.
    pub fn evaluate(&self, mode: ThermostatMode, band: &ComfortBand, runout_pending: bool) -> Vec<EngineAction> {
        let Some(sample) = self.last_sample else {
            return Vec::new();
        };

        let decision = decide(self.state, mode, sample.temperature, band, runout_pending);
        if decision.next == self.state {
            return Vec::new();
        }
        transition_plan(self.state, decision.next, decision.arm_runout)
    }

    pub fn commit(&mut self, next: ThermostatState) {
        if next != self.state {
            self.state = next;
            self.transitions += 1;
        }
    }
}
