use anyhow::{ensure, Context};
use tracing::debug;

use crate::{bus::EventBus, event::Event, timer::TimerHandle};

pub const MIN_VALID_TEMP_F: f32 = -40.0;
pub const MAX_VALID_TEMP_F: f32 = 150.0;

/// Environmental readings source.
pub trait Sensor {
    fn temperature(&mut self) -> anyhow::Result<f32>;
    fn pressure(&mut self) -> anyhow::Result<f32>;
    fn humidity(&mut self) -> anyhow::Result<f32>;
}

/// Reads all three values and packages them as a `SensorDataChanged` event.
pub fn read_sample(sensor: &mut dyn Sensor) -> anyhow::Result<Event> {
    let temperature = sensor.temperature().context("temperature read failed")?;
    ensure!(
        temperature.is_finite() && (MIN_VALID_TEMP_F..=MAX_VALID_TEMP_F).contains(&temperature),
        "temperature {temperature} outside plausible range"
    );
    let pressure = sensor.pressure().context("pressure read failed")?;
    let humidity = sensor.humidity().context("humidity read failed")?;

    Ok(Event::SensorDataChanged {
        temperature,
        pressure,
        humidity,
    })
}

/// Recurring timer that samples `sensor` and fires `SensorDataChanged`.
/// A failed read skips that sample.
pub fn install_sampling_timer<C, S>(bus: &EventBus<C>, interval_secs: f64, mut sensor: S) -> TimerHandle
where
    C: 'static,
    S: Sensor + 'static,
{
    bus.install_timer(interval_secs, false, move |bus| {
        let event = read_sample(&mut sensor)?;
        debug!(?event, "sensor sampled");
        bus.fire_event(event);
        Ok(())
    })
}

/// Deterministic readings drifting in a small cycle, for benches without hardware.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSensor {
    tick: u64,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self) {
        self.tick = self.tick.saturating_add(1);
    }
}

impl Sensor for SimulatedSensor {
    fn temperature(&mut self) -> anyhow::Result<f32> {
        self.advance();
        Ok(68.0 + (self.tick % 8) as f32 * 0.2)
    }

    fn pressure(&mut self) -> anyhow::Result<f32> {
        Ok(1013.0 + (self.tick % 5) as f32 * 0.4)
    }

    fn humidity(&mut self) -> anyhow::Result<f32> {
        Ok(42.0 + (self.tick % 6) as f32 * 0.5)
    }
}
