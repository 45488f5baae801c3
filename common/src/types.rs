use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// What the user asked the system to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatMode {
    Off,
    Auto,
    Cool,
    Heat,
    Fan,
}

impl ThermostatMode {
    pub const ALL: [ThermostatMode; 5] = [
        Self::Off,
        Self::Auto,
        Self::Cool,
        Self::Heat,
        Self::Fan,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Auto => "AUTO",
            Self::Cool => "COOL",
            Self::Heat => "HEAT",
            Self::Fan => "FAN",
        }
    }

    /// Next mode in declaration order, wrapping from FAN back to OFF.
    pub fn next(self) -> Self {
        let index = Self::ALL
            .iter()
            .position(|mode| *mode == self)
            .unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn permits_heat(self) -> bool {
        matches!(self, Self::Auto | Self::Heat)
    }

    pub fn permits_cool(self) -> bool {
        matches!(self, Self::Auto | Self::Cool)
    }
}

impl fmt::Display for ThermostatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThermostatMode {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ParseError::UnknownMode(value.to_string()))
    }
}

/// What the equipment is physically doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatState {
    #[default]
    Off,
    Heating,
    Cooling,
    Fan,
}

impl ThermostatState {
    pub const ALL: [ThermostatState; 4] = [Self::Off, Self::Heating, Self::Cooling, Self::Fan];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heating => "HEATING",
            Self::Cooling => "COOLING",
            Self::Fan => "FAN",
        }
    }

    pub fn should_also_run_fan(self) -> bool {
        matches!(self, Self::Heating | Self::Cooling)
    }
}

impl fmt::Display for ThermostatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThermostatState {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ParseError::UnknownState(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelaySnapshot {
    pub function: ThermostatState,
    /// `None` until the relay has been commanded at least once.
    #[serde(rename = "isOpen")]
    pub is_open: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: Option<f32>,
    #[serde(rename = "currentHumidity")]
    pub current_humidity: Option<f32>,
    #[serde(rename = "currentPressure")]
    pub current_pressure: Option<f32>,
    pub mode: &'static str,
    pub state: &'static str,
    pub program: String,
    #[serde(rename = "comfortMin")]
    pub comfort_min: f32,
    #[serde(rename = "comfortMax")]
    pub comfort_max: f32,
    pub delta: f32,
    #[serde(rename = "priceAverage")]
    pub price_average: Option<f64>,
    #[serde(rename = "inPriceOverride")]
    pub in_price_override: bool,
    #[serde(rename = "runoutPending")]
    pub runout_pending: bool,
    /// Epoch seconds of the next scheduled program change.
    #[serde(rename = "nextScheduleChange")]
    pub next_schedule_change: Option<i64>,
    pub relays: Vec<RelaySnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatePayload {
    pub temp: Option<f32>,
    pub humidity: Option<f32>,
    pub mode: &'static str,
    pub state: &'static str,
    pub program: String,
    #[serde(rename = "comfortMin")]
    pub comfort_min: f32,
    #[serde(rename = "comfortMax")]
    pub comfort_max: f32,
    #[serde(rename = "inPriceOverride")]
    pub in_price_override: bool,
}

impl From<&ControllerStatus> for ControllerStatePayload {
    fn from(status: &ControllerStatus) -> Self {
        Self {
            temp: status.current_temp,
            humidity: status.current_humidity,
            mode: status.mode,
            state: status.state,
            program: status.program.clone(),
            comfort_min: status.comfort_min,
            comfort_max: status.comfort_max,
            in_price_override: status.in_price_override,
        }
    }
}
