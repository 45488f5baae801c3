pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod policy;
pub mod price;
pub mod registry;
pub mod relay;
pub mod schedule;
pub mod sensor;
pub mod service;
pub mod thermostat;
pub mod timer;
pub mod topics;
pub mod types;

pub use bus::{wall_clock_secs, BusHandle, EventBus, GUARD_WINDOW_SECS, MAX_IDLE_SECS};
pub use config::{
    DisplayConfig, NetworkConfig, PriceFeedConfig, ProgramConfig, RuntimeConfig, SamplingConfig,
    ScheduleConfig, ThermostatConfig,
};
pub use error::{ConfigError, InvokeError, ParseError, PolicyError};
pub use event::{Event, EventKind, Interaction};
pub use policy::{ComfortPolicy, ComfortProgram, PriceOverride};
pub use price::PriceWindow;
pub use registry::HandlerRegistry;
pub use relay::{LogRelayDriver, MemoryRelayDriver, Relay, RelayBank, RelayCommand, RelayDriver, RelayJournal};
pub use schedule::{DayOfWeek, Schedule, ScheduleEntry, WeeklySchedule};
pub use sensor::{install_sampling_timer, read_sample, Sensor, SimulatedSensor};
pub use service::{LocalClock, ThermostatCore};
pub use thermostat::{ComfortBand, Decision, EngineAction, SensorSample, ThermostatEngine};
pub use timer::{TimerHandle, TimerSchedule};
pub use topics::*;
pub use types::{ControllerStatePayload, ControllerStatus, RelaySnapshot, ThermostatMode, ThermostatState};
