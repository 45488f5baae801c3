use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::{ProgramConfig, ThermostatConfig},
    error::{ConfigError, PolicyError},
    price::PriceWindow,
    schedule::WeeklySchedule,
    thermostat::ComfortBand,
    types::ThermostatMode,
};

/// Band adjustment applied while the windowed price average is at or above `price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comfort_min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comfort_max: Option<f32>,
}

/// A named comfort band with its configured defaults and price overrides.
///
/// `comfort_max >= comfort_min + 2 * delta` holds after every mutation: moving one
/// edge drags the other along when the band would get too narrow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComfortProgram {
    name: String,
    comfort_min: f32,
    comfort_max: f32,
    #[serde(skip)]
    default_min: f32,
    #[serde(skip)]
    default_max: f32,
    #[serde(skip)]
    delta: f32,
    /// Highest price first.
    price_overrides: Vec<PriceOverride>,
}

impl ComfortProgram {
    pub fn new(
        name: impl Into<String>,
        comfort_min: f32,
        comfort_max: f32,
        delta: f32,
        mut price_overrides: Vec<PriceOverride>,
    ) -> Self {
        price_overrides.sort_by(|a, b| b.price.total_cmp(&a.price));
        let mut program = Self {
            name: name.into(),
            comfort_min,
            comfort_max,
            default_min: comfort_min,
            default_max: comfort_max,
            delta,
            price_overrides,
        };
        program.set_comfort_min(comfort_min);
        program.default_max = program.comfort_max;
        program
    }

    pub fn from_config(config: &ProgramConfig, delta: f32) -> Self {
        Self::new(
            config.name.clone(),
            config.comfort_min,
            config.comfort_max,
            delta,
            config.price_overrides.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comfort_min(&self) -> f32 {
        self.comfort_min
    }

    pub fn comfort_max(&self) -> f32 {
        self.comfort_max
    }

    pub fn price_overrides(&self) -> &[PriceOverride] {
        &self.price_overrides
    }

    pub fn set_comfort_min(&mut self, value: f32) -> bool {
        let before = (self.comfort_min, self.comfort_max);
        self.comfort_min = value;
        if self.comfort_max < value + 2.0 * self.delta {
            self.comfort_max = value + 2.0 * self.delta;
        }
        before != (self.comfort_min, self.comfort_max)
    }

    pub fn set_comfort_max(&mut self, value: f32) -> bool {
        let before = (self.comfort_min, self.comfort_max);
        self.comfort_max = value;
        if self.comfort_min > value - 2.0 * self.delta {
            self.comfort_min = value - 2.0 * self.delta;
        }
        before != (self.comfort_min, self.comfort_max)
    }

    /// Restores the configured band, discarding adjustments and overrides.
    pub fn reset(&mut self) {
        self.comfort_min = self.default_min;
        self.comfort_max = self.default_max;
    }

    /// Highest-priced override whose threshold is at or below `average`.
    pub fn override_for(&self, average: f64) -> Option<&PriceOverride> {
        self.price_overrides
            .iter()
            .find(|candidate| candidate.price <= average)
    }

    pub fn apply_override(&mut self, price_override: &PriceOverride) {
        self.reset();
        if let Some(min) = price_override.comfort_min {
            self.set_comfort_min(min);
        }
        if let Some(max) = price_override.comfort_max {
            self.set_comfort_max(max);
        }
    }

    pub fn band(&self) -> ComfortBand {
        ComfortBand {
            comfort_min: self.comfort_min,
            comfort_max: self.comfort_max,
            delta: self.delta,
        }
    }
}

/// User intent plus the active program, owned by the event loop thread.
#[derive(Debug, Clone)]
pub struct ComfortPolicy {
    delta: f32,
    mode: ThermostatMode,
    programs: Vec<ComfortProgram>,
    active: usize,
    schedule: WeeklySchedule,
    price_window: PriceWindow,
    /// Threshold of the override currently applied to the active program.
    applied_override: Option<f64>,
}

impl ComfortPolicy {
    pub fn from_config(config: &ThermostatConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let programs: Vec<ComfortProgram> = config
            .programs
            .iter()
            .map(|program| ComfortProgram::from_config(program, config.delta))
            .collect();
        let active = programs
            .iter()
            .position(|program| program.name() == config.default_program)
            .ok_or_else(|| ConfigError::UnknownDefaultProgram(config.default_program.clone()))?;

        Ok(Self {
            delta: config.delta,
            mode: config.initial_mode,
            programs,
            active,
            schedule: config.weekly_schedule()?,
            price_window: PriceWindow::new(config.price_window_secs),
            applied_override: None,
        })
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn mode(&self) -> ThermostatMode {
        self.mode
    }

    pub fn program(&self) -> &ComfortProgram {
        &self.programs[self.active]
    }

    pub fn programs(&self) -> &[ComfortProgram] {
        &self.programs
    }

    pub fn schedule(&self) -> &WeeklySchedule {
        &self.schedule
    }

    pub fn comfort_min(&self) -> f32 {
        self.program().comfort_min()
    }

    pub fn comfort_max(&self) -> f32 {
        self.program().comfort_max()
    }

    pub fn band(&self) -> ComfortBand {
        self.program().band()
    }

    pub fn is_in_price_override(&self) -> bool {
        self.applied_override.is_some()
    }

    pub fn price_average(&self) -> Option<f64> {
        self.price_window.average()
    }

    /// Always counts as a change so observers hear about every mode request.
    pub fn set_mode(&mut self, mode: ThermostatMode) -> bool {
        info!(from = %self.mode, to = %mode, "mode set");
        self.mode = mode;
        true
    }

    pub fn next_mode(&mut self) -> ThermostatMode {
        let next = self.mode.next();
        self.set_mode(next);
        next
    }

    pub fn set_comfort_min(&mut self, value: f32) -> bool {
        self.active_mut().set_comfort_min(value)
    }

    pub fn set_comfort_max(&mut self, value: f32) -> bool {
        self.active_mut().set_comfort_max(value)
    }

    /// Sets both edges; the later edge wins if they conflict.
    pub fn set_comfort(&mut self, min: Option<f32>, max: Option<f32>) -> Result<bool, PolicyError> {
        for value in [min, max].into_iter().flatten() {
            if !value.is_finite() {
                return Err(PolicyError::InvalidBand {
                    min: min.unwrap_or(self.comfort_min()),
                    max: max.unwrap_or(self.comfort_max()),
                });
            }
        }

        let mut changed = false;
        if let Some(min) = min {
            changed |= self.set_comfort_min(min);
        }
        if let Some(max) = max {
            changed |= self.set_comfort_max(max);
        }
        Ok(changed)
    }

    /// Moves the edge the current mode acts on: min in HEAT, max in COOL.
    pub fn modify_comfort(&mut self, step: f32) -> bool {
        match self.mode {
            ThermostatMode::Heat => {
                let value = self.comfort_min() + step;
                self.set_comfort_min(value)
            }
            ThermostatMode::Cool => {
                let value = self.comfort_max() + step;
                self.set_comfort_max(value)
            }
            _ => {
                debug!(mode = %self.mode, "comfort adjustment ignored");
                false
            }
        }
    }

    /// Switches to `name`, resetting it to its configured band. Returns `false`
    /// when it is already active.
    pub fn select_program(&mut self, name: &str) -> Result<bool, PolicyError> {
        let index = self
            .programs
            .iter()
            .position(|program| program.name() == name)
            .ok_or_else(|| PolicyError::UnknownProgram(name.to_string()))?;
        if index == self.active {
            return Ok(false);
        }

        self.programs[index].reset();
        self.active = index;
        self.applied_override = None;
        info!(program = name, "program selected");
        Ok(true)
    }

    pub fn reset_program(&mut self) {
        self.active_mut().reset();
        self.applied_override = None;
    }

    /// Feeds a price sample at loop time `now`. Returns `true` when the band changed.
    /// Non-finite prices are dropped and leave the window untouched.
    pub fn apply_price(&mut self, price: f64, now: f64) -> bool {
        if !price.is_finite() {
            warn!(price, "ignoring non-finite price sample");
            return false;
        }
        let average = self.price_window.add(price, now);
        let matched = self.program().override_for(average).cloned();

        match matched {
            Some(price_override) => {
                if self.applied_override == Some(price_override.price) {
                    return false;
                }
                info!(
                    average,
                    threshold = price_override.price,
                    program = self.program().name(),
                    "price override applied"
                );
                self.active_mut().apply_override(&price_override);
                self.applied_override = Some(price_override.price);
                true
            }
            None => {
                if self.applied_override.take().is_none() {
                    return false;
                }
                info!(average, program = self.program().name(), "price override cleared");
                self.active_mut().reset();
                true
            }
        }
    }

    pub fn scheduled_program(&self, now: DateTime<FixedOffset>) -> Option<&str> {
        self.schedule.program_for(now)
    }

    fn active_mut(&mut self) -> &mut ComfortProgram {
        &mut self.programs[self.active]
    }
}
