use crate::config::AppConfig;
use crate::dashboard::{Dashboard, DashboardError, Effect, Event};
use crate::data::{self, LoadState};
use crate::groups::CommunityGroup;
use crate::render;
use crate::svg;
use crate::types::{Tier, VariableDescriptor};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub enum Backend {
    Ready(Mutex<Dashboard>),
    Unavailable(String),
}

pub struct AppState {
    pub backend: Backend,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(load: LoadState, config: AppConfig) -> Self {
        let backend = match load {
            LoadState::Ready(assets) => match Dashboard::new(*assets, &config) {
                Ok(dashboard) => Backend::Ready(Mutex::new(dashboard)),
                Err(e) => {
                    warn!("dashboard could not start: {:#}", e);
                    Backend::Unavailable(format!("{:#}", e))
                }
            },
            LoadState::Unavailable(reason) => Backend::Unavailable(reason),
        };
        Self { backend, config }
    }

    fn dashboard(&self) -> Result<&Mutex<Dashboard>, ApiError> {
        match &self.backend {
            Backend::Ready(dashboard) => Ok(dashboard),
            Backend::Unavailable(reason) => Err(ApiError::Unavailable(reason.clone())),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unavailable(String),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<DashboardError> for ApiError {
    fn from(e: DashboardError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unavailable(reason) => (StatusCode::SERVICE_UNAVAILABLE, format!("data unavailable: {}", reason)),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
pub struct ViewParams {
    supports: Option<String>,
    needs: Option<String>,
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    tier: Tier,
    feature_id: usize,
    area_id: Option<String>,
    area_name: Option<String>,
    colour: Option<String>,
    values: HashMap<String, Option<f64>>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);
    Router::new()
        .route("/api/variables", get(variables_handler))
        .route("/api/view", get(view_handler))
        .route("/api/events", post(events_handler))
        .route("/api/boundaries/:tier", get(boundaries_handler))
        .route("/api/groups", get(groups_handler))
        .route("/api/query", get(query_handler))
        .route("/api/plot.svg", get(plot_handler))
        .route("/api/legend.png", get(legend_handler))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    info!("Loading data for API...");
    let load = data::load_all(&config).await;
    let state = Arc::new(AppState::new(load, config.clone()));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn variables_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<VariableDescriptor>>, ApiError> {
    let dashboard = state.dashboard()?.lock().await;
    Ok(Json(dashboard.bundle().variables.clone()))
}

async fn view_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ViewParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut dashboard = state.dashboard()?.lock().await;
    if params.supports.is_some() || params.needs.is_some() {
        dashboard.dispatch(Event::SelectionChanged {
            supports: split_list(params.supports.as_deref()),
            needs: split_list(params.needs.as_deref()),
        })?;
    }
    Ok(Json(serde_json::to_value(dashboard.view())?))
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Event>,
) -> Result<Json<Vec<Effect>>, ApiError> {
    let mut dashboard = state.dashboard()?.lock().await;
    Ok(Json(dashboard.dispatch(event)?))
}

async fn boundaries_handler(
    State(state): State<Arc<AppState>>,
    Path(tier): Path<String>,
) -> Result<Json<FeatureCollection>, ApiError> {
    let tier = match tier.to_ascii_lowercase().as_str() {
        "la" => Tier::La,
        "lsoa" => Tier::Lsoa,
        other => return Err(ApiError::NotFound(format!("unknown tier '{}'", other))),
    };
    let dashboard = state.dashboard()?.lock().await;
    Ok(Json(dashboard.map().layer(tier).collection().clone()))
}

async fn groups_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<CommunityGroup>>, ApiError> {
    let dashboard = state.dashboard()?.lock().await;
    Ok(Json(dashboard.groups().to_vec()))
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Option<QueryResponse>>, ApiError> {
    let dashboard = state.dashboard()?.lock().await;
    let tier = dashboard.current().tier.unwrap_or(Tier::La);
    let layer = dashboard.map().layer(tier);

    let Some(feature_id) = layer.feature_at(params.lon, params.lat) else {
        return Ok(Json(None));
    };
    let area_id = layer.join_key(feature_id);
    let record = area_id
        .as_deref()
        .and_then(|id| dashboard.bundle().records(tier).iter().find(|r| r.id == id));

    Ok(Json(Some(QueryResponse {
        tier,
        feature_id,
        area_name: layer
            .feature_name(feature_id)
            .or_else(|| record.map(|r| r.name.clone())),
        area_id,
        colour: layer.colour(feature_id).map(|c| c.to_hex()),
        values: record.map(|r| r.values.clone()).unwrap_or_default(),
    })))
}

async fn plot_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let dashboard = state.dashboard()?.lock().await;
    let layout = dashboard
        .current()
        .plot
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("nothing selected".to_string()))?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg::render_svg(layout)).into_response())
}

async fn legend_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let dashboard = state.dashboard()?.lock().await;
    let output = &state.config.output;
    let img = render::legend(dashboard.palette(), output.legend_width, output.legend_height);
    let bytes = render::encode_png(&img)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::tests::{config, dashboard};

    fn ready() -> Arc<AppState> {
        Arc::new(AppState {
            backend: Backend::Ready(Mutex::new(dashboard())),
            config: config(),
        })
    }

    fn unavailable() -> Arc<AppState> {
        Arc::new(AppState::new(LoadState::Unavailable("missing data.json".to_string()), config()))
    }

    #[test]
    fn lists_split_on_commas() {
        assert_eq!(split_list(Some("a, b,,c")), vec!["a", "b", "c"]);
        assert!(split_list(None).is_empty());
    }

    #[tokio::test]
    async fn unavailable_state_answers_503() {
        let err = variables_handler(State(unavailable())).await.unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn view_applies_query_selection() {
        let state = ready();
        let params = ViewParams {
            supports: Some("supA".to_string()),
            needs: Some("needA,needC".to_string()),
        };
        let Json(view) = view_handler(State(state.clone()), Query(params)).await.unwrap();
        assert_eq!(view["tier"], "LA");
        assert_eq!(view["state"], "both");
        assert_eq!(view["x_variable"], "needs_composite");
        assert_eq!(view["plot"]["marks"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn unknown_variable_is_a_bad_request() {
        let params = ViewParams {
            supports: Some("nope".to_string()),
            needs: None,
        };
        let err = view_handler(State(ready()), Query(params)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_return_effects() {
        let state = ready();
        let event = Event::SelectionChanged {
            supports: vec![],
            needs: vec!["needC".to_string()],
        };
        let Json(effects) = events_handler(State(state.clone()), Json(event)).await.unwrap();
        assert!(effects.iter().any(|e| matches!(e, Effect::Redrawn { tier: Some(Tier::La), .. })));

        let Json(effects) = events_handler(State(state), Json(Event::MapHover { feature_id: 2 })).await.unwrap();
        assert!(effects.contains(&Effect::FeatureHover {
            tier: Tier::La,
            feature_id: 2,
            hover: true
        }));
    }

    #[tokio::test]
    async fn query_finds_area_under_point() {
        let state = ready();
        let params = ViewParams {
            supports: Some("supB".to_string()),
            needs: None,
        };
        view_handler(State(state.clone()), Query(params)).await.unwrap();

        let Json(hit) = query_handler(State(state.clone()), Query(QueryParams { lat: 0.5, lon: 2.5 }))
            .await
            .unwrap();
        let hit = hit.unwrap();
        assert_eq!(hit.area_id.as_deref(), Some("W06000002"));
        assert_eq!(hit.values.get("supB"), Some(&Some(2.0)));
        assert!(hit.colour.is_some());

        let Json(miss) = query_handler(State(state), Query(QueryParams { lat: 0.5, lon: 1.5 }))
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn boundaries_by_tier_name() {
        let Json(la) = boundaries_handler(State(ready()), Path("LA".to_string())).await.unwrap();
        assert_eq!(la.features.len(), 4);
        let err = boundaries_handler(State(ready()), Path("msoa".to_string())).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn images_have_content_types() {
        let response = plot_handler(State(ready())).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");
        let response = legend_handler(State(ready())).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    }
}
