use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown thermostat mode '{0}'")]
    UnknownMode(String),
    #[error("unknown thermostat state '{0}'")]
    UnknownState(String),
}

/// Problems found while loading programs and schedules. Any of these refuses startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no programs configured")]
    NoPrograms,
    #[error("program name must not be empty")]
    UnnamedProgram,
    #[error("program '{0}' is defined more than once")]
    DuplicateProgram(String),
    #[error("program '{name}' has an invalid comfort band {min}..{max}")]
    InvalidComfortBand { name: String, min: f32, max: f32 },
    #[error("program '{program}' has a price override without a valid price")]
    InvalidOverridePrice { program: String },
    #[error("default program '{0}' is not defined")]
    UnknownDefaultProgram(String),
    #[error("schedule '{0}' has no days")]
    EmptyDays(String),
    #[error("schedule '{0}' has no times")]
    EmptyTimes(String),
    #[error("schedule '{schedule}' has an invalid time {hour:02}:{minute:02}")]
    InvalidTime {
        schedule: String,
        hour: u8,
        minute: u8,
    },
    #[error("schedule '{schedule}' references undefined program '{program}'")]
    UndefinedProgram { schedule: String, program: String },
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
}

/// Failure of a call marshalled onto the event loop thread.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("event loop has stopped")]
    Stopped,
    #[error("invoke called from the event loop thread")]
    LoopThread,
    #[error("timed out waiting for the event loop")]
    Timeout,
    #[error("invoked call panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("unknown program '{0}'")]
    UnknownProgram(String),
    #[error("comfort band {min}..{max} is not a valid range")]
    InvalidBand { min: f32, max: f32 },
}
