use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::mpsc};
use tracing::{debug, warn};

use thermostat_common::{Event, EventBus, EventKind};

pub const RECORDED_KINDS: [EventKind; 4] = [
    EventKind::SensorDataChanged,
    EventKind::ThermostatStateChanged,
    EventKind::SettingsChanged,
    EventKind::PowerPriceChanged,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    /// Loop time the event was dispatched at, epoch seconds.
    pub at: f64,
    pub event: &'static str,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl HistoryRecord {
    pub fn new(at: f64, event: &Event) -> Self {
        Self {
            at,
            event: event.name(),
            payload: event.payload(),
        }
    }
}

/// Observes the recorded event kinds and hands records to the writer task.
pub fn install<C: 'static>(bus: &EventBus<C>, records: mpsc::UnboundedSender<HistoryRecord>) {
    for kind in RECORDED_KINDS {
        let records = records.clone();
        bus.install_event_handler(kind, move |bus, event| {
            records
                .send(HistoryRecord::new(bus.now(), event))
                .context("history writer has gone away")?;
            Ok(())
        });
    }
}

/// Appends one JSON line per record until the channel closes.
pub async fn run_writer(path: PathBuf, mut records: mpsc::UnboundedReceiver<HistoryRecord>) {
    while let Some(record) = records.recv().await {
        if let Err(err) = append(&path, &record).await {
            warn!("history write failed: {err:#}");
        }
    }
    debug!("history writer finished");
}

async fn append(path: &PathBuf, record: &HistoryRecord) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}
