use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use thermostat_common::{
    BusHandle, ControllerStatus, Event, Interaction, InvokeError, PolicyError,
    ThermostatCore, ThermostatMode,
};

use crate::host::invoke;

#[derive(Clone)]
pub struct AppState {
    pub bus: BusHandle<ThermostatCore>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

type Params = Query<HashMap<String, String>>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/mode/next", post(handle_next_mode))
        .route("/api/comfort", post(handle_set_comfort))
        .route("/api/comfort/up", post(handle_comfort_up))
        .route("/api/comfort/down", post(handle_comfort_down))
        .route("/api/program", post(handle_select_program))
        .route("/api/program/reset", post(handle_reset_program))
        .route("/api/programs", get(handle_get_programs))
        .route("/api/price", post(handle_inject_price))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_get_status(State(state): State<AppState>) -> Response {
    respond(invoke(&state.bus, |bus| Ok(bus.context().status())).await)
}

async fn handle_set_mode(State(state): State<AppState>, Query(params): Params) -> Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let mode = match value.parse::<ThermostatMode>() {
        Ok(mode) => mode,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    respond(
        invoke(&state.bus, move |bus| {
            bus.context().set_mode(bus, mode);
            Ok(bus.context().status())
        })
        .await,
    )
}

async fn handle_next_mode(State(state): State<AppState>) -> Response {
    interact(&state, Interaction::NextMode).await
}

async fn handle_comfort_up(State(state): State<AppState>) -> Response {
    interact(&state, Interaction::ComfortUp).await
}

async fn handle_comfort_down(State(state): State<AppState>) -> Response {
    interact(&state, Interaction::ComfortDown).await
}

async fn handle_set_comfort(State(state): State<AppState>, Query(params): Params) -> Response {
    let min = match parse_optional::<f32>(&params, "min") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let max = match parse_optional::<f32>(&params, "max") {
        Ok(value) => value,
        Err(response) => return response,
    };
    if min.is_none() && max.is_none() {
        return error_response(StatusCode::BAD_REQUEST, "Provide 'min' and/or 'max'");
    }

    respond_policy(
        invoke(&state.bus, move |bus| {
            Ok(bus
                .context()
                .set_comfort(bus, min, max)
                .map(|_| bus.context().status()))
        })
        .await,
    )
}

async fn handle_select_program(State(state): State<AppState>, Query(params): Params) -> Response {
    let Some(name) = params.get("name").cloned() else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'name' parameter");
    };

    respond_policy(
        invoke(&state.bus, move |bus| {
            Ok(bus
                .context()
                .select_program(bus, &name)
                .map(|_| bus.context().status()))
        })
        .await,
    )
}

async fn handle_reset_program(State(state): State<AppState>) -> Response {
    respond(
        invoke(&state.bus, |bus| {
            bus.context().reset_program(bus);
            Ok(bus.context().status())
        })
        .await,
    )
}

async fn handle_get_programs(State(state): State<AppState>) -> Response {
    respond(invoke(&state.bus, |bus| Ok(bus.context().programs())).await)
}

async fn handle_inject_price(State(state): State<AppState>, Query(params): Params) -> Response {
    let price = match parse_optional::<f64>(&params, "value") {
        Ok(Some(price)) if price.is_finite() => price,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, "Missing or invalid 'value' parameter"),
        Err(response) => return response,
    };

    state.bus.fire_event(Event::PowerPriceChanged {
        price,
        next_update_secs: 0,
    });
    StatusCode::ACCEPTED.into_response()
}

/// Queues the interaction behind anything already pending and replies with the
/// status once the loop has drained it.
async fn interact(state: &AppState, kind: Interaction) -> Response {
    state.bus.fire_event(Event::UserInteraction { kind });
    respond(invoke(&state.bus, |bus| Ok(bus.context().status())).await)
}

fn parse_optional<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, Response> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            error_response(StatusCode::BAD_REQUEST, &format!("Invalid '{key}' parameter"))
        }),
    }
}

fn respond<T: Serialize>(result: Result<T, InvokeError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => invoke_error_response(&err),
    }
}

fn respond_policy(result: Result<Result<ControllerStatus, PolicyError>, InvokeError>) -> Response {
    match result {
        Ok(Ok(status)) => Json(status).into_response(),
        Ok(Err(err)) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(err) => invoke_error_response(&err),
    }
}

fn invoke_error_status(err: &InvokeError) -> StatusCode {
    match err {
        InvokeError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        InvokeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        InvokeError::LoopThread | InvokeError::Panicked(_) | InvokeError::Failed(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn invoke_error_response(err: &InvokeError) -> Response {
    warn!("api call failed: {err:#}");
    error_response(invoke_error_status(err), &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn optional_params_parse_or_reject() {
        let query = params(&[("min", " 66.5"), ("max", "warm")]);

        assert_eq!(parse_optional::<f32>(&query, "min").ok(), Some(Some(66.5)));
        assert_eq!(parse_optional::<f32>(&query, "delta").ok(), Some(None));
        let rejected = parse_optional::<f32>(&query, "max").unwrap_err();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn invoke_errors_map_to_statuses() {
        assert_eq!(
            invoke_error_status(&InvokeError::Stopped),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            invoke_error_status(&InvokeError::Timeout),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            invoke_error_status(&InvokeError::Panicked("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn comfort_up_lands_after_pending_events() {
        use thermostat_common::RuntimeConfig;
        use tokio::sync::mpsc;

        use crate::{host::start_event_loop, mqtt::SensorCache};

        let mut runtime = RuntimeConfig::default();
        runtime.thermostat.initial_mode = ThermostatMode::Heat;
        runtime.thermostat.schedules.clear();
        let (history_tx, _history_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = mpsc::unbounded_channel();
        let (bus, loop_thread) =
            start_event_loop(runtime, SensorCache::default(), history_tx, state_tx)
                .await
                .unwrap();
        let state = AppState { bus: bus.clone() };

        // The home override at 0.30 lowers the band to 66-79 before the step.
        bus.fire_event(Event::PowerPriceChanged {
            price: 0.30,
            next_update_secs: 0,
        });
        let response = handle_comfort_up(State(state)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["comfortMin"], 67.0);
        assert_eq!(body["inPriceOverride"], true);

        bus.stop();
        tokio::task::spawn_blocking(move || loop_thread.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn policy_errors_are_bad_requests() {
        let response = respond_policy(Ok(Err(PolicyError::UnknownProgram("cabin".to_string()))));

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
