use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{info, warn};

use thermostat_common::{
    BusHandle, ControllerStatePayload, Event, EventBus, EventKind, NetworkConfig, Sensor,
    ThermostatCore, ThermostatMode, TOPIC_CMD_MODE, TOPIC_CMD_PRICE, TOPIC_CMD_PROGRAM,
    TOPIC_CONTROLLER_STATE, TOPIC_CONTROLLER_STATUS, TOPIC_SENSOR_HUMIDITY, TOPIC_SENSOR_PRESSURE, TOPIC_SENSOR_TEMP,
};

use crate::host::invoke;

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Temperature(f32),
    Humidity(f32),
    Pressure(f32),
}

/// Parses a sensor topic payload, rejecting values outside plausible ranges.
pub fn parse_reading(topic: &str, payload: &str) -> Option<Reading> {
    let value = payload.trim().parse::<f32>().ok().filter(|v| v.is_finite())?;
    match topic {
        TOPIC_SENSOR_TEMP if (-40.0..=150.0).contains(&value) => Some(Reading::Temperature(value)),
        TOPIC_SENSOR_HUMIDITY if (0.0..=100.0).contains(&value) => Some(Reading::Humidity(value)),
        TOPIC_SENSOR_PRESSURE if (300.0..=1_100.0).contains(&value) => Some(Reading::Pressure(value)),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct Latest {
    temperature: Option<(f32, Instant)>,
    humidity: Option<(f32, Instant)>,
    pressure: Option<(f32, Instant)>,
}

/// Latest readings received over MQTT, shared with the loop thread.
#[derive(Debug, Clone, Default)]
pub struct SensorCache {
    latest: Arc<Mutex<Latest>>,
}

impl SensorCache {
    pub fn record(&self, reading: Reading) {
        self.record_at(reading, Instant::now());
    }

    fn record_at(&self, reading: Reading, at: Instant) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        match reading {
            Reading::Temperature(value) => latest.temperature = Some((value, at)),
            Reading::Humidity(value) => latest.humidity = Some((value, at)),
            Reading::Pressure(value) => latest.pressure = Some((value, at)),
        }
    }

    pub fn sensor(&self, stale_after: Duration) -> CachedSensor {
        CachedSensor {
            cache: self.clone(),
            stale_after,
        }
    }

    fn fresh(
        &self,
        pick: impl Fn(&Latest) -> Option<(f32, Instant)>,
        name: &str,
        stale_after: Duration,
    ) -> anyhow::Result<f32> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let (value, at) = pick(&latest).ok_or_else(|| anyhow!("no {name} reading yet"))?;
        if at.elapsed() > stale_after {
            return Err(anyhow!("{name} reading is stale ({:?} old)", at.elapsed()));
        }
        Ok(value)
    }
}

/// [`Sensor`] over the MQTT cache; missing or stale values fail the read.
#[derive(Debug, Clone)]
pub struct CachedSensor {
    cache: SensorCache,
    stale_after: Duration,
}

impl Sensor for CachedSensor {
    fn temperature(&mut self) -> anyhow::Result<f32> {
        self.cache
            .fresh(|latest| latest.temperature, "temperature", self.stale_after)
    }

    fn pressure(&mut self) -> anyhow::Result<f32> {
        self.cache
            .fresh(|latest| latest.pressure, "pressure", self.stale_after)
    }

    fn humidity(&mut self) -> anyhow::Result<f32> {
        self.cache
            .fresh(|latest| latest.humidity, "humidity", self.stale_after)
    }
}

pub fn client(network: &NetworkConfig) -> (AsyncClient, EventLoop) {
    let mut mqtt_options = MqttOptions::new(
        "thermostat-controller-rust",
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_CONTROLLER_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    AsyncClient::new(mqtt_options, 64)
}

pub async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_TEMP,
        TOPIC_SENSOR_HUMIDITY,
        TOPIC_SENSOR_PRESSURE,
        TOPIC_CMD_MODE,
        TOPIC_CMD_PROGRAM,
        TOPIC_CMD_PRICE,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    mqtt.publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish controller online status")?;
    Ok(())
}

pub fn spawn_mqtt_loop(mut eventloop: EventLoop, cache: SensorCache, bus: BusHandle<ThermostatCore>) {
    tokio::spawn(async move {
        while !bus.is_stopped() {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_message(&cache, &bus, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(MqttEvent::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_message(
    cache: &SensorCache,
    bus: &BusHandle<ThermostatCore>,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }
    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;

    match topic {
        TOPIC_SENSOR_TEMP | TOPIC_SENSOR_HUMIDITY | TOPIC_SENSOR_PRESSURE => {
            match parse_reading(topic, message) {
                Some(reading) => cache.record(reading),
                None => warn!(topic, payload = message, "ignoring implausible reading"),
            }
        }
        TOPIC_CMD_MODE => {
            let mode: ThermostatMode = message.parse()?;
            invoke(bus, move |bus| {
                bus.context().set_mode(bus, mode);
                Ok(())
            })
            .await?;
        }
        TOPIC_CMD_PROGRAM => {
            let name = message.trim().to_string();
            invoke(bus, move |bus| Ok(bus.context().select_program(bus, &name)?)).await?;
        }
        TOPIC_CMD_PRICE => {
            let price: f64 = message.trim().parse().context("invalid price")?;
            anyhow::ensure!(price.is_finite(), "price {price} is not finite");
            bus.fire_event(Event::PowerPriceChanged {
                price,
                next_update_secs: 0,
            });
        }
        _ => {}
    }
    Ok(())
}

/// Publishes the retained controller state whenever it or the settings change.
pub fn install_state_publisher(bus: &EventBus<ThermostatCore>, payloads: mpsc::UnboundedSender<Vec<u8>>) {
    for kind in [EventKind::ThermostatStateChanged, EventKind::SettingsChanged] {
        let payloads = payloads.clone();
        bus.install_event_handler(kind, move |bus, _| {
            let status = bus.context().status();
            let body = serde_json::to_vec(&ControllerStatePayload::from(&status))?;
            payloads
                .send(body)
                .context("state publisher has gone away")?;
            Ok(())
        });
    }
}

pub fn spawn_state_publisher(mqtt: AsyncClient, mut payloads: mpsc::UnboundedReceiver<Vec<u8>>) {
    tokio::spawn(async move {
        while let Some(body) = payloads.recv().await {
            if let Err(err) = mqtt
                .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                .await
            {
                warn!("controller state publish failed: {err}");
            }
        }
    });
}
