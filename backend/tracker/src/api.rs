//! Axum REST API handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use foodlink_lifecycle::projections::{NearbyDonation, TrackingView};
use foodlink_lifecycle::{DonationError, DonationId, DonationPatch, DonationRecord, GeoPoint};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::errors::TrackerError;
use crate::service::{CreateDonation, DonationService};

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<DonationService>,
    pub default_radius_km: f64,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/donations", post(create_donation))
        .route("/pending-donations", get(list_pending_near))
        .route("/pending-donations/stream", get(stream_pending_near))
        .route("/donations/:id", get(get_donation).patch(edit_donation))
        .route("/donations/:id/accept", post(accept_donation))
        .route("/donations/:id/start", post(start_pickup))
        .route("/donations/:id/location", post(update_location))
        .route("/donations/:id/complete", post(complete_pickup))
        .route("/donations/:id/cancel", post(cancel_donation))
        .route("/donations/:id/tracking", get(get_tracking))
        .route("/donations/:id/events", get(stream_donation))
        .route("/donations/:id/tracking/pause", post(pause_tracking))
        .route("/donations/:id/tracking/resume", post(resume_tracking))
        .route("/donors/:donor_id/donations", get(list_mine))
        .route("/donors/:donor_id/active", get(active_for_donor))
        .route("/acceptors/:acceptor_id/donations", get(list_accepted))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub acceptor_id: String,
    pub acceptor_name: String,
    pub coords: GeoPoint,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub coords: GeoPoint,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub donor_id: String,
    #[serde(flatten)]
    pub patch: DonationPatch,
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

#[derive(Serialize)]
pub struct DonationsResponse {
    pub count: usize,
    pub donations: Vec<DonationRecord>,
}

#[derive(Serialize)]
pub struct NearbyResponse {
    pub radius_km: f64,
    pub count: usize,
    pub donations: Vec<NearbyDonation>,
}

#[derive(Serialize)]
pub struct ActiveResponse {
    pub donation: Option<DonationRecord>,
}

#[derive(Serialize)]
pub struct TrackingResponse {
    pub tracking: Option<TrackingView>,
}

#[derive(Serialize)]
pub struct TrackingToggleResponse {
    pub donation_id: DonationId,
    pub changed: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackerError::Donation(e) => match e {
                DonationError::NotFound(_) => StatusCode::NOT_FOUND,
                DonationError::InvalidTransition { .. } => StatusCode::CONFLICT,
                DonationError::InvalidCoordinate { .. }
                | DonationError::InvalidSpeed(_)
                | DonationError::InvalidDistance(_)
                | DonationError::Validation(_) => StatusCode::BAD_REQUEST,
                DonationError::NotOwner { .. } => StatusCode::FORBIDDEN,
                DonationError::TrackingStopped(_) => StatusCode::CONFLICT,
                DonationError::IntegrityViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            TrackerError::Conflict(_) => StatusCode::CONFLICT,
            TrackerError::Http(_) => StatusCode::BAD_GATEWAY,
            TrackerError::Database(_)
            | TrackerError::Migrate(_)
            | TrackerError::Config(_)
            | TrackerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, TrackerError>;

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /donations`
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateDonation>,
) -> Result<(StatusCode, Json<DonationRecord>), TrackerError> {
    let record = state.service.create_donation(body).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /donations/:id`
pub async fn get_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
) -> ApiResult<DonationRecord> {
    Ok(Json(state.service.get_donation(id).await?))
}

/// `PATCH /donations/:id`
///
/// Donor-side edit; only allowed while the donation is pending.
pub async fn edit_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
    Json(body): Json<EditRequest>,
) -> ApiResult<DonationRecord> {
    Ok(Json(
        state
            .service
            .edit_donation(id, body.donor_id, body.patch)
            .await?,
    ))
}

/// `POST /donations/:id/accept`
pub async fn accept_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
    Json(body): Json<AcceptRequest>,
) -> ApiResult<DonationRecord> {
    Ok(Json(
        state
            .service
            .accept_donation(id, body.acceptor_id, body.acceptor_name, body.coords)
            .await?,
    ))
}

/// `POST /donations/:id/start`
pub async fn start_pickup(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
) -> ApiResult<DonationRecord> {
    Ok(Json(state.service.start_pickup(id).await?))
}

/// `POST /donations/:id/location`
pub async fn update_location(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
    Json(body): Json<LocationRequest>,
) -> ApiResult<DonationRecord> {
    Ok(Json(state.service.update_location(id, body.coords).await?))
}

/// `POST /donations/:id/complete`
pub async fn complete_pickup(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
) -> ApiResult<DonationRecord> {
    Ok(Json(state.service.complete_pickup(id).await?))
}

/// `POST /donations/:id/cancel`
pub async fn cancel_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
) -> ApiResult<DonationRecord> {
    Ok(Json(state.service.cancel_donation(id).await?))
}

/// `GET /donations/:id/tracking`
///
/// Distance and ETA between the acceptor and the pickup point. `tracking` is
/// `null` while no acceptor location is attached.
pub async fn get_tracking(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
) -> ApiResult<TrackingResponse> {
    Ok(Json(TrackingResponse {
        tracking: state.service.tracking(id).await?,
    }))
}

/// `POST /donations/:id/tracking/pause`
pub async fn pause_tracking(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
) -> ApiResult<TrackingToggleResponse> {
    // Surface unknown ids as 404 rather than a silent no-op.
    state.service.get_donation(id).await?;
    Ok(Json(TrackingToggleResponse {
        donation_id: id,
        changed: state.service.pause_tracking(id),
    }))
}

/// `POST /donations/:id/tracking/resume`
pub async fn resume_tracking(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
) -> ApiResult<TrackingToggleResponse> {
    Ok(Json(TrackingToggleResponse {
        donation_id: id,
        changed: state.service.resume_tracking(id).await?,
    }))
}

/// `GET /pending-donations?lat=..&lng=..&radius_km=..`
pub async fn list_pending_near(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<NearbyResponse> {
    let radius_km = query.radius_km.unwrap_or(state.default_radius_km);
    let donations = state
        .service
        .list_pending_near(GeoPoint::new(query.lat, query.lng), radius_km)
        .await?;
    Ok(Json(NearbyResponse {
        radius_km,
        count: donations.len(),
        donations,
    }))
}

/// `GET /pending-donations/stream?lat=..&lng=..&radius_km=..` (server-sent events)
pub async fn stream_pending_near(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PendingQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, TrackerError> {
    let radius_km = query.radius_km.unwrap_or(state.default_radius_km);
    let watch = state
        .service
        .watch_pending_near(GeoPoint::new(query.lat, query.lng), radius_km)?;

    let stream = watch.into_stream().map(move |donations| {
        let body = NearbyResponse {
            radius_km,
            count: donations.len(),
            donations,
        };
        Ok(sse_event("pending", &body))
    });
    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

/// `GET /donations/:id/events` (server-sent events)
///
/// One `donation` event per committed change, location ticks included.
pub async fn stream_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<DonationId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, TrackerError> {
    state.service.get_donation(id).await?;
    let updates = state.service.scheduler().watch_donation(id);

    let stream = ReceiverStream::new(updates).map(|record| Ok(sse_event("donation", &record)));
    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

fn sse_event<T: Serialize>(name: &str, body: &T) -> Event {
    let event = Event::default().event(name);
    match serde_json::to_string(body) {
        Ok(json) => event.data(json),
        Err(e) => {
            error!("Failed to encode {name} event: {e}");
            event.comment("encoding failed")
        }
    }
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("ping")
}

/// `GET /donors/:donor_id/donations`
pub async fn list_mine(
    State(state): State<Arc<ApiState>>,
    Path(donor_id): Path<String>,
) -> ApiResult<DonationsResponse> {
    let donations = state.service.list_mine(&donor_id).await?;
    Ok(Json(DonationsResponse {
        count: donations.len(),
        donations,
    }))
}

/// `GET /donors/:donor_id/active`
pub async fn active_for_donor(
    State(state): State<Arc<ApiState>>,
    Path(donor_id): Path<String>,
) -> ApiResult<ActiveResponse> {
    Ok(Json(ActiveResponse {
        donation: state.service.active_for_donor(&donor_id).await?,
    }))
}

/// `GET /acceptors/:acceptor_id/donations`
pub async fn list_accepted(
    State(state): State<Arc<ApiState>>,
    Path(acceptor_id): Path<String>,
) -> ApiResult<DonationsResponse> {
    let donations = state.service.list_accepted(&acceptor_id).await?;
    Ok(Json(DonationsResponse {
        count: donations.len(),
        donations,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::service::tests::service;

    fn app() -> Router {
        router(Arc::new(ApiState {
            service: service(),
            default_radius_km: 50.0,
        }))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn rice_body() -> Value {
        json!({
            "donor_id": "donor-1",
            "food_type": "Rice",
            "quantity": 15,
            "expires_in_hours": 3,
            "location_text": "123 Main St, New Delhi",
            "coords": { "lat": 28.6139, "lng": 77.2090 }
        })
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn lifecycle_over_http() {
        let app = app();
        let (status, created) = call(&app, Method::POST, "/donations", Some(rice_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        assert!(created["acceptor_location"].is_null());
        let id = created["id"].as_i64().unwrap();

        let (status, accepted) = call(
            &app,
            Method::POST,
            &format!("/donations/{id}/accept"),
            Some(json!({
                "acceptor_id": "ngo-1",
                "acceptor_name": "City Welfare Foundation",
                "coords": { "lat": 28.5, "lng": 77.3 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted["status"], "accepted");
        assert_eq!(accepted["acceptor_location"], json!({ "lat": 28.5, "lng": 77.3 }));

        let (status, _) = call(&app, Method::POST, &format!("/donations/{id}/start"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, tracking) =
            call(&app, Method::GET, &format!("/donations/{id}/tracking"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(tracking["tracking"]["distance_km"].as_f64().unwrap() > 0.0);

        let (status, done) =
            call(&app, Method::POST, &format!("/donations/{id}/complete"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["status"], "picked_up");
        assert!(done["acceptor_location"].is_null());

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/donations/{id}/location"),
            Some(json!({ "coords": { "lat": 28.6, "lng": 77.2 } })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("Invalid transition"));
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = app();
        let (status, _) = call(&app, Method::GET, "/donations/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut bad = rice_body();
        bad["coords"] = json!({ "lat": 120.0, "lng": 77.0 });
        let (status, _) = call(&app, Method::POST, "/donations", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, created) = call(&app, Method::POST, "/donations", Some(rice_body())).await;
        let id = created["id"].as_i64().unwrap();
        let (status, _) = call(
            &app,
            Method::PATCH,
            &format!("/donations/{id}"),
            Some(json!({ "donor_id": "intruder", "quantity": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, edited) = call(
            &app,
            Method::PATCH,
            &format!("/donations/{id}"),
            Some(json!({ "donor_id": "donor-1", "quantity": 40, "unit": "kg" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["quantity"], 40);
        assert_eq!(edited["unit"], "kg");
    }

    #[tokio::test]
    async fn read_views_over_http() {
        let app = app();
        let (_, created) = call(&app, Method::POST, "/donations", Some(rice_body())).await;
        let id = created["id"].as_i64().unwrap();

        let (status, near) = call(
            &app,
            Method::GET,
            "/pending-donations?lat=28.59&lng=77.20&radius_km=10",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(near["count"], 1);
        assert_eq!(near["donations"][0]["id"], id);
        assert!(near["donations"][0]["distance_km"].as_f64().unwrap() < 10.0);

        let (_, far) = call(
            &app,
            Method::GET,
            "/pending-donations?lat=31.255&lng=75.69",
            None,
        )
        .await;
        assert_eq!(far["radius_km"], 50.0);
        assert_eq!(far["count"], 0);

        let (_, mine) = call(&app, Method::GET, "/donors/donor-1/donations", None).await;
        assert_eq!(mine["count"], 1);

        let (_, active) = call(&app, Method::GET, "/donors/donor-1/active", None).await;
        assert!(active["donation"].is_null());

        call(
            &app,
            Method::POST,
            &format!("/donations/{id}/accept"),
            Some(json!({
                "acceptor_id": "ngo-1",
                "acceptor_name": "City Welfare Foundation",
                "coords": { "lat": 28.5, "lng": 77.3 }
            })),
        )
        .await;
        let (_, active) = call(&app, Method::GET, "/donors/donor-1/active", None).await;
        assert_eq!(active["donation"]["id"], id);

        let (_, accepted) = call(&app, Method::GET, "/acceptors/ngo-1/donations", None).await;
        assert_eq!(accepted["count"], 1);
    }

    #[tokio::test]
    async fn tracking_can_be_paused_and_resumed() {
        let app = app();
        let (_, created) = call(&app, Method::POST, "/donations", Some(rice_body())).await;
        let id = created["id"].as_i64().unwrap();
        call(
            &app,
            Method::POST,
            &format!("/donations/{id}/accept"),
            Some(json!({
                "acceptor_id": "ngo-1",
                "acceptor_name": "City Welfare Foundation",
                "coords": { "lat": 28.5, "lng": 77.3 }
            })),
        )
        .await;
        call(&app, Method::POST, &format!("/donations/{id}/start"), None).await;

        let (status, paused) =
            call(&app, Method::POST, &format!("/donations/{id}/tracking/pause"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paused["changed"], true);

        let (_, resumed) =
            call(&app, Method::POST, &format!("/donations/{id}/tracking/resume"), None).await;
        assert_eq!(resumed["changed"], true);

        let (status, _) =
            call(&app, Method::POST, "/donations/4242/tracking/pause", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(&app, Method::POST, &format!("/donations/{id}/cancel"), None).await;
    }

    #[tokio::test]
    async fn donation_events_stream_committed_changes() {
        let app = app();
        let (_, created) = call(&app, Method::POST, "/donations", Some(rice_body())).await;
        let id = created["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/donations/{id}/events"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        call(
            &app,
            Method::POST,
            &format!("/donations/{id}/accept"),
            Some(json!({
                "acceptor_id": "ngo-1",
                "acceptor_name": "City Welfare Foundation",
                "coords": { "lat": 28.5, "lng": 77.3 }
            })),
        )
        .await;

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.starts_with("event: donation"));
        assert!(text.contains("\"status\":\"accepted\""));

        let (status, _) = call(&app, Method::GET, "/donations/4242/events", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pending_stream_rejects_bad_observer() {
        let app = app();
        let (status, body) = call(
            &app,
            Method::GET,
            "/pending-donations/stream?lat=95&lng=0",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
}
