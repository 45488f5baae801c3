use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::ThermostatState;

/// Discriminant used to key handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    SensorDataChanged,
    PowerPriceChanged,
    ThermostatStateChanging,
    ThermostatStateChanged,
    SettingsChanged,
    UserInteraction,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SensorDataChanged => "SensorDataChanged",
            Self::PowerPriceChanged => "PowerPriceChanged",
            Self::ThermostatStateChanging => "ThermostatStateChanging",
            Self::ThermostatStateChanged => "ThermostatStateChanged",
            Self::SettingsChanged => "SettingsChanged",
            Self::UserInteraction => "UserInteraction",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    ComfortUp,
    ComfortDown,
    NextMode,
    /// Any touch that should wake the display without changing settings.
    Wake,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum Event {
    SensorDataChanged {
        temperature: f32,
        pressure: f32,
        humidity: f32,
    },
    PowerPriceChanged {
        price: f64,
        #[serde(rename = "nextUpdateSeconds")]
        next_update_secs: u64,
    },
    ThermostatStateChanging {
        #[serde(rename = "newState")]
        new_state: ThermostatState,
    },
    ThermostatStateChanged {
        state: ThermostatState,
    },
    SettingsChanged,
    UserInteraction {
        kind: Interaction,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SensorDataChanged { .. } => EventKind::SensorDataChanged,
            Self::PowerPriceChanged { .. } => EventKind::PowerPriceChanged,
            Self::ThermostatStateChanging { .. } => EventKind::ThermostatStateChanging,
            Self::ThermostatStateChanged { .. } => EventKind::ThermostatStateChanged,
            Self::SettingsChanged => EventKind::SettingsChanged,
            Self::UserInteraction { .. } => EventKind::UserInteraction,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Owned key/value snapshot of the payload, without the `event` tag.
    pub fn payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                map.remove("event");
                map
            }
            _ => Map::new(),
        }
    }
}
