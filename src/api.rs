// src/api.rs
//! Read-only HTTP view of the latest published snapshot.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::energy::{EnergySnapshot, Signal};

#[derive(Clone)]
pub struct AppState {
    snapshots: watch::Receiver<EnergySnapshot>,
}

impl AppState {
    pub fn new(snapshots: watch::Receiver<EnergySnapshot>) -> Self {
        Self { snapshots }
    }

    fn latest(&self) -> EnergySnapshot {
        self.snapshots.borrow().clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/energy", get(energy))
        .route("/energy/{signal}", get(energy_signal))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn energy(State(state): State<AppState>) -> Json<EnergySnapshot> {
    Json(state.latest())
}

async fn energy_signal(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let snapshot = state.latest();
    match Signal::from_name(&name).and_then(|s| snapshot.signal(s)) {
        Some(s) => Json(s.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown signal '{name}'")).into_response(),
    }
}
