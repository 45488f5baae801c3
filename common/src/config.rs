use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    policy::PriceOverride,
    schedule::{DayOfWeek, Schedule, ScheduleEntry, WeeklySchedule},
    types::ThermostatMode,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub name: String,
    pub comfort_min: f32,
    pub comfort_max: f32,
    #[serde(default)]
    pub price_overrides: Vec<PriceOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    pub days: Vec<DayOfWeek>,
    pub times: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub delta: f32,
    pub initial_mode: ThermostatMode,
    pub fan_runout_secs: f64,
    pub price_window_secs: f64,
    pub schedule_poll_secs: f64,
    pub default_program: String,
    pub programs: Vec<ProgramConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

fn program(name: &str, comfort_min: f32, comfort_max: f32, overrides: Vec<PriceOverride>) -> ProgramConfig {
    ProgramConfig {
        name: name.to_string(),
        comfort_min,
        comfort_max,
        price_overrides: overrides,
    }
}

fn at(hour: u8, minute: u8, program: &str) -> ScheduleEntry {
    ScheduleEntry {
        hour,
        minute,
        program: program.to_string(),
    }
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            delta: 1.0,
            initial_mode: ThermostatMode::Off,
            fan_runout_secs: 180.0,
            price_window_secs: 900.0,
            schedule_poll_secs: 60.0,
            default_program: "home".to_string(),
            programs: vec![
                program(
                    "home",
                    68.0,
                    76.0,
                    vec![PriceOverride {
                        price: 0.30,
                        comfort_min: Some(66.0),
                        comfort_max: Some(79.0),
                    }],
                ),
                program(
                    "away",
                    64.0,
                    78.0,
                    vec![PriceOverride {
                        price: 0.25,
                        comfort_min: None,
                        comfort_max: Some(82.0),
                    }],
                ),
                program("sleep", 66.0, 74.0, Vec::new()),
            ],
            schedules: vec![
                ScheduleConfig {
                    name: "weekdays".to_string(),
                    days: vec![
                        DayOfWeek::Mon,
                        DayOfWeek::Tue,
                        DayOfWeek::Wed,
                        DayOfWeek::Thu,
                        DayOfWeek::Fri,
                    ],
                    times: vec![
                        at(6, 30, "home"),
                        at(8, 30, "away"),
                        at(17, 0, "home"),
                        at(22, 30, "sleep"),
                    ],
                },
                ScheduleConfig {
                    name: "weekend".to_string(),
                    days: vec![DayOfWeek::Sat, DayOfWeek::Sun],
                    times: vec![at(8, 0, "home"), at(23, 0, "sleep")],
                },
            ],
        }
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

impl ThermostatConfig {
    pub fn sanitize(&mut self) {
        self.delta = self.delta.clamp(0.25, 5.0);
        self.fan_runout_secs = self.fan_runout_secs.clamp(10.0, 1_800.0);
        self.price_window_secs = self.price_window_secs.clamp(60.0, 86_400.0);
        self.schedule_poll_secs = self.schedule_poll_secs.clamp(1.0, 3_600.0);
    }

    pub fn has_program(&self, name: &str) -> bool {
        self.programs.iter().any(|program| program.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("delta", self.delta as f64)?;
        require_positive("fan_runout_secs", self.fan_runout_secs)?;
        require_positive("price_window_secs", self.price_window_secs)?;
        require_positive("schedule_poll_secs", self.schedule_poll_secs)?;

        if self.programs.is_empty() {
            return Err(ConfigError::NoPrograms);
        }

        let mut seen = BTreeSet::new();
        for program in &self.programs {
            if program.name.trim().is_empty() {
                return Err(ConfigError::UnnamedProgram);
            }
            if !seen.insert(program.name.as_str()) {
                return Err(ConfigError::DuplicateProgram(program.name.clone()));
            }
            let band_ok = program.comfort_min.is_finite()
                && program.comfort_max.is_finite()
                && program.comfort_max >= program.comfort_min + 2.0 * self.delta;
            if !band_ok {
                return Err(ConfigError::InvalidComfortBand {
                    name: program.name.clone(),
                    min: program.comfort_min,
                    max: program.comfort_max,
                });
            }
            if program
                .price_overrides
                .iter()
                .any(|o| !o.price.is_finite() || o.price < 0.0)
            {
                return Err(ConfigError::InvalidOverridePrice {
                    program: program.name.clone(),
                });
            }
        }

        if !self.has_program(&self.default_program) {
            return Err(ConfigError::UnknownDefaultProgram(
                self.default_program.clone(),
            ));
        }

        self.weekly_schedule().map(|_| ())
    }

    pub fn weekly_schedule(&self) -> Result<WeeklySchedule, ConfigError> {
        let schedules = self
            .schedules
            .iter()
            .map(|schedule| {
                Schedule::new(
                    schedule.name.clone(),
                    schedule.days.clone(),
                    schedule.times.clone(),
                    |name| self.has_program(name),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WeeklySchedule::new(schedules))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub interval_secs: f64,
    /// Readings older than this are not forwarded to the state machine.
    pub stale_after_secs: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30.0,
            stale_after_secs: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    pub url: Option<String>,
    pub retry_secs: u64,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            url: None,
            retry_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub backlight_secs: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backlight_secs: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub thermostat: ThermostatConfig,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatConfig::default(),
            timezone: default_timezone(),
            network: NetworkConfig::default(),
            sampling: SamplingConfig::default(),
            price_feed: PriceFeedConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.thermostat.sanitize();
        if self.timezone.trim().is_empty() {
            self.timezone = default_timezone();
        }
        self.sampling.interval_secs = self.sampling.interval_secs.clamp(1.0, 3_600.0);
        self.sampling.stale_after_secs = self
            .sampling
            .stale_after_secs
            .max(self.sampling.interval_secs);
        self.price_feed.retry_secs = self.price_feed.retry_secs.clamp(5, 3_600);
        self.display.backlight_secs = self.display.backlight_secs.clamp(5.0, 600.0);
    }
}
