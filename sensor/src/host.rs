use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, LastWill, MqttOptions, QoS};
use tracing::{info, warn};

use thermostat_common::{
    read_sample, Event, Sensor, SimulatedSensor, TOPIC_SENSOR_HUMIDITY, TOPIC_SENSOR_PRESSURE,
    TOPIC_SENSOR_STATUS, TOPIC_SENSOR_TEMP,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let interval_secs = std::env::var("SENSOR_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(30)
        .max(1);

    let mut mqtt_options = MqttOptions::new("thermostat-sensor-rust", mqtt_host, mqtt_port);
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_SENSOR_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!(interval_secs, "sensor publisher started");

    let mut sensor = SimulatedSensor::new();
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        let readings = match sample_payloads(&mut sensor) {
            Ok(readings) => readings,
            Err(err) => {
                warn!("skipping sample: {err:#}");
                continue;
            }
        };

        for (topic, payload) in readings {
            mqtt.publish(topic, QoS::AtLeastOnce, true, payload)
                .await
                .with_context(|| format!("failed to publish {topic}"))?;
        }
    }
}

/// One sample as retained topic payloads, formatted to one decimal place.
fn sample_payloads(sensor: &mut dyn Sensor) -> anyhow::Result<Vec<(&'static str, String)>> {
    let Event::SensorDataChanged {
        temperature,
        pressure,
        humidity,
    } = read_sample(sensor)?
    else {
        anyhow::bail!("sensor produced a non-sample event");
    };

    Ok(vec![
        (TOPIC_SENSOR_TEMP, format!("{temperature:.1}")),
        (TOPIC_SENSOR_HUMIDITY, format!("{humidity:.1}")),
        (TOPIC_SENSOR_PRESSURE, format!("{pressure:.1}")),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn simulated_sample_formats_every_topic() {
        let mut sensor = SimulatedSensor::new();

        let payloads = sample_payloads(&mut sensor).unwrap();

        assert_eq!(
            payloads,
            vec![
                (TOPIC_SENSOR_TEMP, "68.2".to_string()),
                (TOPIC_SENSOR_HUMIDITY, "42.5".to_string()),
                (TOPIC_SENSOR_PRESSURE, "1013.4".to_string()),
            ]
        );
    }
}
