use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn index(self) -> usize {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index % 7 {
            0 => Self::Mon,
            1 => Self::Tue,
            2 => Self::Wed,
            3 => Self::Thu,
            4 => Self::Fri,
            5 => Self::Sat,
            _ => Self::Sun,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        Self::from_index(weekday.num_days_from_monday() as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub hour: u8,
    pub minute: u8,
    pub program: String,
}

impl ScheduleEntry {
    pub fn minutes(&self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    fn is_valid_time(&self) -> bool {
        self.hour < 24 && self.minute < 60
    }
}

/// Program changes over a day, applied on a set of weekdays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub name: String,
    pub days: Vec<DayOfWeek>,
    /// Sorted latest first.
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// Checks days, times and that every program exists per `has_program`.
    pub fn new(
        name: impl Into<String>,
        mut days: Vec<DayOfWeek>,
        mut entries: Vec<ScheduleEntry>,
        has_program: impl Fn(&str) -> bool,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if days.is_empty() {
            return Err(ConfigError::EmptyDays(name));
        }
        if entries.is_empty() {
            return Err(ConfigError::EmptyTimes(name));
        }
        for entry in &entries {
            if !entry.is_valid_time() {
                return Err(ConfigError::InvalidTime {
                    schedule: name,
                    hour: entry.hour,
                    minute: entry.minute,
                });
            }
            if !has_program(&entry.program) {
                return Err(ConfigError::UndefinedProgram {
                    schedule: name,
                    program: entry.program.clone(),
                });
            }
        }

        days.sort();
        days.dedup();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.minutes()));

        Ok(Self {
            name,
            days,
            entries,
        })
    }

    pub fn applies_on(&self, day: DayOfWeek) -> bool {
        self.days.contains(&day)
    }

    /// Latest entry at or before `hour:minute`, else the day's latest entry
    /// (still in effect from the previous evening).
    pub fn program_at(&self, hour: u32, minute: u32) -> &str {
        let now = (hour * 60 + minute) as u16;
        self.entries
            .iter()
            .find(|entry| entry.minutes() <= now)
            .or_else(|| self.entries.first())
            .map(|entry| entry.program.as_str())
            .unwrap_or_default()
    }
}

/// The configured weekly schedules; the first one covering a day wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeeklySchedule {
    schedules: Vec<Schedule>,
}

impl WeeklySchedule {
    pub fn new(schedules: Vec<Schedule>) -> Self {
        Self { schedules }
    }

    pub fn schedules(&self) -> &[Schedule] {
        &self.schedules
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn for_day(&self, day: DayOfWeek) -> Option<&Schedule> {
        self.schedules.iter().find(|schedule| schedule.applies_on(day))
    }

    pub fn program_for(&self, now: DateTime<FixedOffset>) -> Option<&str> {
        let day = DayOfWeek::from_chrono(now.weekday());
        self.for_day(day)
            .map(|schedule| schedule.program_at(now.hour(), now.minute()))
    }

    /// Epoch seconds of the next scheduled program change within a week.
    pub fn next_change_epoch(&self, now: DateTime<FixedOffset>) -> Option<i64> {
        let now_day = DayOfWeek::from_chrono(now.weekday());
        let now_minute = (now.hour() * 60 + now.minute()) as u16;

        for day_offset in 0..7i64 {
            let day = DayOfWeek::from_index(now_day.index() + day_offset as usize);
            let Some(schedule) = self.for_day(day) else {
                continue;
            };

            // Entries are latest first; walk them earliest first.
            let candidate = schedule
                .entries
                .iter()
                .rev()
                .find(|entry| day_offset > 0 || entry.minutes() > now_minute);
            let Some(entry) = candidate else {
                continue;
            };

            let date = now.date_naive() + Duration::days(day_offset);
            let Some(naive) = date.and_hms_opt(entry.hour as u32, entry.minute as u32, 0) else {
                continue;
            };
            if let Some(at) = now.offset().from_local_datetime(&naive).single() {
                return Some(at.timestamp());
            }
        }

        None
    }
}
