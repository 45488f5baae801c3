use std::{net::SocketAddr, thread, time::Duration};

use anyhow::{anyhow, Context};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use tokio::{net::TcpListener, sync::{mpsc, oneshot}};
use tracing::{info, warn};

use thermostat_common::{
    install_sampling_timer, BusHandle, EventBus, InvokeError, RelayBank, RuntimeConfig,
    ThermostatCore,
};

use crate::{
    api::{self, AppState},
    display::{self, LogScreen},
    history::{self, HistoryRecord},
    mqtt::{self, SensorCache},
    price_feed::PriceFeed,
    store::{apply_env_overrides, AppStore},
};

const INVOKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `f` on the event loop thread without blocking the async runtime.
pub(crate) async fn invoke<R, F>(bus: &BusHandle<ThermostatCore>, f: F) -> Result<R, InvokeError>
where
    F: FnOnce(&EventBus<ThermostatCore>) -> anyhow::Result<R> + Send + 'static,
    R: Send + 'static,
{
    let bus = bus.clone();
    tokio::task::spawn_blocking(move || bus.safe_invoke_timeout(INVOKE_TIMEOUT, f))
        .await
        .unwrap_or_else(|err| Err(InvokeError::Panicked(err.to_string())))
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await?;
    apply_env_overrides(&mut runtime);
    runtime.sanitize();
    runtime
        .thermostat
        .validate()
        .context("refusing to start with an invalid thermostat configuration")?;
    if runtime.timezone.parse::<Tz>().is_err() {
        warn!(timezone = %runtime.timezone, "unknown timezone, schedules are disabled");
    }

    let (mqtt_client, eventloop) = mqtt::client(&runtime.network);
    mqtt::subscribe_topics(&mqtt_client).await?;

    let cache = SensorCache::default();
    let (history_tx, history_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = mpsc::unbounded_channel();
    let (bus, loop_thread) = start_event_loop(runtime.clone(), cache.clone(), history_tx, state_tx).await?;

    mqtt::spawn_mqtt_loop(eventloop, cache, bus.clone());
    mqtt::spawn_state_publisher(mqtt_client, state_rx);
    let history_writer = tokio::spawn(history::run_writer(store.history_path().clone(), history_rx));
    if let Some(url) = runtime.price_feed.url.clone() {
        let feed = PriceFeed::new(url, runtime.price_feed.retry_secs)?;
        tokio::spawn(feed.run(bus.clone()));
    }

    let app = api::router(AppState { bus: bus.clone() });
    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    bus.stop();
    match tokio::task::spawn_blocking(move || loop_thread.join()).await {
        Ok(Ok(())) => {}
        _ => warn!("event loop thread did not exit cleanly"),
    }
    if let Err(err) = history_writer.await {
        warn!("history writer failed: {err}");
    }
    info!("controller stopped");
    served.context("controller server failed")
}

/// Builds the core on a dedicated thread, since the loop and its context stay
/// on the thread that owns them, and hands back a handle once it is running.
pub(crate) async fn start_event_loop(
    runtime: RuntimeConfig,
    cache: SensorCache,
    history: mpsc::UnboundedSender<HistoryRecord>,
    state: mpsc::UnboundedSender<Vec<u8>>,
) -> anyhow::Result<(BusHandle<ThermostatCore>, thread::JoinHandle<()>)> {
    let (ready_tx, ready_rx) = oneshot::channel();

    let loop_thread = thread::Builder::new()
        .name("event-loop".to_string())
        .spawn(move || {
            let bus = match build_bus(&runtime, cache, history, state) {
                Ok(bus) => bus,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if ready_tx.send(Ok(bus.handle())).is_err() {
                return;
            }
            info!("event loop started");
            bus.exec(None);
            info!("event loop stopped");
        })
        .context("failed to spawn event loop thread")?;

    let handle = ready_rx
        .await
        .map_err(|_| anyhow!("event loop thread exited during startup"))??;
    Ok((handle, loop_thread))
}

fn build_bus(
    runtime: &RuntimeConfig,
    cache: SensorCache,
    history: mpsc::UnboundedSender<HistoryRecord>,
    state: mpsc::UnboundedSender<Vec<u8>>,
) -> anyhow::Result<EventBus<ThermostatCore>> {
    let relays = RelayBank::logging();

    let timezone = runtime.timezone.clone();
    let core = ThermostatCore::new(
        &runtime.thermostat,
        relays,
        Box::new(move || now_in_timezone(&timezone)),
    )?;
    let bus = EventBus::new(core);

    ThermostatCore::install(&bus);
    let stale_after = Duration::try_from_secs_f64(runtime.sampling.stale_after_secs)
        .unwrap_or(Duration::from_secs(300));
    install_sampling_timer(&bus, runtime.sampling.interval_secs, cache.sensor(stale_after));
    history::install(&bus, history);
    mqtt::install_state_publisher(&bus, state);
    display::install(&bus, LogScreen, runtime.display.backlight_secs);
    Ok(bus)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}
