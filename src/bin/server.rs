use std::io;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use loopcast::catalog::Catalog;
use loopcast::config::get_config;
use loopcast::resolve::{ProgramBlock, ResolvedProgram, resolve_current, resolve_next, resolve_window};
use loopcast::schedule::ScheduleEntry;

struct AppState {
    catalog: Catalog,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt::init();

    let config = get_config();
    let catalog = Catalog::from_dir(&config.channels_dir)
        .map_err(|err| io::Error::other(err.to_string()))?;
    tracing::info!(channels = catalog.ids().len(), "catalog loaded");

    let app = Router::new()
        .route("/channels", get(list_channels))
        .route("/channels/{id}/now", get(now_airing))
        .route("/channels/{id}/next", get(next_airing))
        .route("/channels/{id}/guide", get(guide))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(AppState { catalog }));

    tracing::info!(bind = %config.bind_address, "listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await
}

#[derive(Serialize)]
struct ProgramJson {
    content_id: String,
    featured: bool,
    duration_secs: f64,
}

impl From<&ScheduleEntry> for ProgramJson {
    fn from(entry: &ScheduleEntry) -> Self {
        Self {
            content_id: entry.content_id.clone(),
            featured: entry.featured,
            duration_secs: entry.duration().as_secs_f64(),
        }
    }
}

#[derive(Serialize)]
struct NowJson {
    airing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    program: Option<ProgramJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_start: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset_secs: Option<f64>,
}

impl NowJson {
    fn from_resolution(resolved: Option<ResolvedProgram<'_>>) -> Self {
        match resolved {
            Some(r) => Self {
                airing: true,
                program: Some(r.entry.into()),
                instance_start: Some(r.instance_start),
                offset_secs: Some(r.offset.as_secs_f64()),
            },
            // Off air (gap or empty schedule) is a body, not an error.
            None => Self {
                airing: false,
                program: None,
                instance_start: None,
                offset_secs: None,
            },
        }
    }
}

async fn list_channels(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.catalog.ids())
}

async fn now_airing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NowJson>, StatusCode> {
    let channel = state.catalog.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(NowJson::from_resolution(resolve_current(
        &channel,
        Timestamp::now(),
    ))))
}

#[derive(Serialize)]
struct NextJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    program: Option<ProgramJson>,
}

async fn next_airing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NextJson>, StatusCode> {
    let channel = state.catalog.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(NextJson {
        program: resolve_next(&channel, Timestamp::now()).map(ProgramJson::from),
    }))
}

#[derive(Deserialize)]
struct GuideParams {
    /// RFC3339; defaults to now.
    start: Option<Timestamp>,
    /// Window length in hours, default 3.
    hours: Option<u32>,
}

#[derive(Serialize)]
struct BlockJson {
    program: ProgramJson,
    instance_start: Timestamp,
    instance_end: Timestamp,
    visible_left_secs: f64,
    visible_width_secs: f64,
}

impl From<&ProgramBlock<'_>> for BlockJson {
    fn from(block: &ProgramBlock<'_>) -> Self {
        Self {
            program: block.entry.into(),
            instance_start: block.instance_start,
            instance_end: block.instance_end,
            visible_left_secs: block.visible_left.as_secs_f64(),
            visible_width_secs: block.visible_width.as_secs_f64(),
        }
    }
}

async fn guide(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<GuideParams>,
) -> Result<Json<Vec<BlockJson>>, StatusCode> {
    let channel = state.catalog.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    let start = params.start.unwrap_or_else(Timestamp::now);
    let hours = i64::from(params.hours.unwrap_or(3));
    let end = start + SignedDuration::from_secs(hours * 3600);
    let blocks = resolve_window(&channel, start, end);
    Ok(Json(blocks.iter().map(BlockJson::from).collect()))
}
