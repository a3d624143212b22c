use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::bulk::BulkSyncJob;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult, DataSourceError};
use crate::gateway::{ColumnInfo, QueryGateway, Row, Statement};
use crate::launcher::ViewerLauncher;
use crate::queries::{self, Dialect};
use crate::records::{assign_row_ids, sort_by_distance, sort_by_length, sort_by_month, BulkRecord};
use crate::resolver::{ConnectionDescriptor, ConnectionResolver};
use crate::settings::ConfigStore;

const APPEND_OK: &str = "Data appended successfully";

#[derive(Clone)]
pub struct ApiState {
    config: Arc<ConfigStore>,
    resolver: ConnectionResolver,
    gateway: QueryGateway,
    companion: Arc<ConnectionDescriptor>,
    launcher: Arc<dyn ViewerLauncher>,
    bulk: BulkSyncJob,
    gis_table: String,
}

impl ApiState {
    pub fn new(
        config: Arc<ConfigStore>,
        app: &AppConfig,
        gateway: QueryGateway,
        launcher: Arc<dyn ViewerLauncher>,
    ) -> AppResult<Self> {
        let resolver = ConnectionResolver::new(app);
        let companion = Arc::new(resolver.companion(&config.snapshot())?);
        Ok(Self {
            config,
            resolver,
            gateway,
            companion,
            launcher,
            bulk: BulkSyncJob::new(app.gis_table.clone(), app.bulk_replace),
            gis_table: app.gis_table.clone(),
        })
    }

    fn primary(&self) -> AppResult<Arc<ConnectionDescriptor>> {
        Ok(Arc::new(self.resolver.resolve(&self.config.snapshot())?))
    }

    async fn read(&self, statement: fn(Dialect) -> Statement) -> Result<Vec<Row>, ApiError> {
        let descriptor = self.primary()?;
        let statement = statement(descriptor.dialect());
        Ok(self.gateway.query(descriptor, statement).await?)
    }
}

pub fn router(state: ApiState, body_limit: usize) -> Router {
    Router::new()
        .route("/data", get(monthly_lengths))
        .route("/operator", get(operator_lengths))
        .route("/map", get(inspection_map))
        .route("/fault", get(fault_details))
        .route("/insp", get(inspections_by_template))
        .route("/fields", get(companion_fields))
        .route("/append", post(append))
        .route("/launch", post(launch))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        error!(target: "api_server", error = %err, status = status.as_u16(), "request failed");
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<DataSourceError> for ApiError {
    fn from(err: DataSourceError) -> Self {
        AppError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

async fn monthly_lengths(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Row>>, ApiError> {
    let mut rows = state.read(queries::monthly_lengths).await?;
    sort_by_month(&mut rows);
    Ok(Json(rows))
}

async fn operator_lengths(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Row>>, ApiError> {
    let mut rows = state.read(queries::operator_lengths).await?;
    sort_by_length(&mut rows);
    Ok(Json(rows))
}

async fn inspection_map(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Row>>, ApiError> {
    Ok(Json(state.read(queries::inspection_map).await?))
}

async fn fault_details(State(state): State<ApiState>) -> Result<Json<Vec<Row>>, ApiError> {
    let mut rows = state.read(queries::fault_details).await?;
    sort_by_distance(&mut rows);
    assign_row_ids(&mut rows);
    Ok(Json(rows))
}

async fn inspections_by_template(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Row>>, ApiError> {
    Ok(Json(state.read(queries::inspections_by_template).await?))
}

async fn companion_fields(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ColumnInfo>>, ApiError> {
    let columns = state
        .gateway
        .columns(Arc::clone(&state.companion), state.gis_table.clone())
        .await?;
    Ok(Json(columns))
}

#[derive(Debug, Deserialize)]
struct AppendRequest {
    data: Vec<BulkRecord>,
}

async fn append(
    State(state): State<ApiState>,
    payload: Result<Json<AppendRequest>, JsonRejection>,
) -> Result<&'static str, ApiError> {
    let Json(AppendRequest { data }) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    debug!(target: "api_server", records = data.len(), "bulk append requested");
    let report = state
        .bulk
        .run(&state.gateway, Arc::clone(&state.companion), data)
        .await?;
    info!(
        target: "api_server",
        deleted = report.deleted,
        inserted = report.inserted,
        strategy = ?state.bulk.strategy(),
        "companion table replaced"
    );
    Ok(APPEND_OK)
}

fn launch_id(body: &Value) -> Option<(Value, String)> {
    match body.get("id")? {
        Value::String(text) if !text.trim().is_empty() => {
            Some((Value::String(text.clone()), text.clone()))
        }
        Value::Number(number) => Some((Value::Number(number.clone()), number.to_string())),
        _ => None,
    }
}

async fn launch(
    State(state): State<ApiState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Some((echo, asset_id)) = payload.ok().and_then(|Json(body)| launch_id(&body)) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No ID provided" })),
        )
            .into_response();
    };

    let config = state.config.snapshot();
    match state
        .launcher
        .launch(&config.posm_executable_path, &config.inspection_type, &asset_id)
        .await
    {
        Ok(()) => Json(json!({ "message": "POSM launched successfully!", "id": echo }))
            .into_response(),
        Err(err) => {
            error!(target: "api_server", error = %err, asset_id = %asset_id, "launch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to launch POSM", "details": err.to_string() })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::settings::{Configuration, LOCAL_CONNECTION_LABEL};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use parking_lot::Mutex;
    use rusqlite::Connection;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingLauncher {
        calls: Mutex<Vec<(String, String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ViewerLauncher for RecordingLauncher {
        async fn launch(&self, executable: &str, template: &str, asset_id: &str) -> AppResult<()> {
            self.calls
                .lock()
                .push((executable.into(), template.into(), asset_id.into()));
            if self.fail {
                return Err(AppError::ExternalLaunch(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "viewer missing",
                )));
            }
            Ok(())
        }
    }

    fn seed_primary(path: &Path) {
        let connection = Connection::open(path).unwrap();
        connection
            .execute_batch(
                "CREATE TABLE SpecialFields (
                    SessionID INTEGER, AssetID TEXT, Date TEXT, TemplateName TEXT,
                    OperatorName TEXT, StartID TEXT, EndID TEXT, AssetLocation TEXT, City TEXT,
                    PacpQuickStructRatingNum TEXT, PacpQuickMaintRatingNum TEXT,
                    LengthSurveryed REAL
                 );
                 CREATE TABLE Session (SessionID INTEGER, MediaFolder TEXT);
                 CREATE TABLE FaultCodes (FaultCodeID INTEGER, FaultName TEXT);
                 CREATE TABLE Data (
                    SessionID INTEGER, FaultCodeID INTEGER, StructWeight REAL, MaintWeight REAL,
                    Distance REAL, PictureLocation TEXT, MpegLocation TEXT
                 );
                 INSERT INTO SpecialFields VALUES
                    (1, 'MH-1', '2024-03-05', 'NASSCO PACP', 'Ann', 'MH-1', 'MH-2', 'Main St', 'Oslo', '4231', '1200', 30.0),
                    (2, 'MH-9', '2024-01-20', 'NASSCO PACP', 'Bo', 'MH-9', 'MH-10', 'Side St', 'Oslo', '1000', '2000', 10.0),
                    (3, 'MH-5', '2024-03-22', 'POSM', 'Cy', 'MH-5', 'MH-6', 'Hill Rd', 'Bergen', NULL, '3000', 20.0);
                 INSERT INTO Session VALUES (1, 'C:\\media\\1'), (2, 'C:\\media\\2'), (3, NULL);
                 INSERT INTO FaultCodes VALUES (10, 'Crack'), (11, 'Root');
                 INSERT INTO Data VALUES
                    (1, 10, 2.0, 0.0, 5.0, 'p5.jpg', NULL),
                    (1, 11, 0.0, 1.0, 2.0, 'p2.jpg', NULL),
                    (1, 10, 3.0, 0.0, 8.0, NULL, 'v8.mpg');",
            )
            .unwrap();
    }

    fn seed_companion(path: &Path) {
        let connection = Connection::open(path).unwrap();
        connection
            .execute_batch(
                "CREATE TABLE PosmGIS (AssetID TEXT PRIMARY KEY, Material TEXT, Diameter REAL);
                 INSERT INTO PosmGIS VALUES ('OLD-1', 'PVC', 8);",
            )
            .unwrap();
    }

    fn fixture_config(dir: &Path) -> Configuration {
        Configuration {
            connection_type: LOCAL_CONNECTION_LABEL.into(),
            posm_executable_path: dir.join("POSM.exe").to_string_lossy().into_owned(),
            inspection_type: "NASSCO PACP".into(),
            ..Configuration::default()
        }
    }

    struct Fixture {
        dir: TempDir,
        app: Router,
        launcher: Arc<RecordingLauncher>,
    }

    fn fixture(launcher: RecordingLauncher) -> Fixture {
        fixture_with(launcher, test_config)
    }

    fn fixture_with(launcher: RecordingLauncher, settings: impl FnOnce(&Path) -> AppConfig) -> Fixture {
        let dir = tempdir().unwrap();
        seed_primary(&dir.path().join("POSM.mdb"));
        seed_companion(&dir.path().join("POSMGISData.mdb"));
        let config = Arc::new(ConfigStore::with_document(
            dir.path().join("config.json"),
            fixture_config(dir.path()),
        ));
        let launcher = Arc::new(launcher);
        let app_config = settings(dir.path());
        let state = ApiState::new(
            config,
            &app_config,
            QueryGateway::default(),
            Arc::clone(&launcher) as Arc<dyn ViewerLauncher>,
        )
        .unwrap();
        Fixture {
            app: router(state, app_config.body_limit_bytes),
            dir,
            launcher,
        }
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post(app: &Router, uri: &str, body: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn faults_come_back_by_distance_with_fresh_ids() {
        let fixture = fixture(RecordingLauncher::default());

        let (status, first) = get_json(&fixture.app, "/fault").await;
        assert_eq!(status, StatusCode::OK);
        let rows = first.as_array().unwrap();
        let distances = rows
            .iter()
            .map(|row| row["Distance"].as_f64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(distances, [2.0, 5.0, 8.0]);
        assert_eq!(rows[0]["FaultName"], "Root");
        assert_eq!(rows[0]["SessionID"], 1);
        assert_eq!(rows[0]["FaultCodeID"], 11);
        assert_eq!(rows[0]["StructWeight"], 0.0);
        assert_eq!(rows[0]["MediaFolder"], "C:\\media\\1");
        assert!(rows[0]["MpegLocation"].is_null());

        let ids = rows
            .iter()
            .map(|row| row["id"].as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids.iter().collect::<std::collections::HashSet<_>>().len(), 3);

        let (_, second) = get_json(&fixture.app, "/fault").await;
        assert_ne!(second[0]["id"], first[0]["id"]);
    }

    #[tokio::test]
    async fn operators_are_ascending_by_length() {
        let fixture = fixture(RecordingLauncher::default());
        let (status, body) = get_json(&fixture.app, "/operator").await;
        assert_eq!(status, StatusCode::OK);
        let names = body
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["OperatorName"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, ["Bo", "Cy", "Ann"]);
        assert_eq!(body[0]["Length Surveyed"], 10.0);
    }

    #[tokio::test]
    async fn monthly_series_is_ascending_by_month() {
        let fixture = fixture(RecordingLauncher::default());
        let (_, body) = get_json(&fixture.app, "/data").await;
        let months = body
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["MonthYear"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(months, ["2024-01", "2024-03", "2024-03"]);
    }

    #[tokio::test]
    async fn map_and_template_counts_use_page_keys() {
        let fixture = fixture(RecordingLauncher::default());

        let (_, map) = get_json(&fixture.app, "/map").await;
        let first = map
            .as_array()
            .unwrap()
            .iter()
            .find(|row| row["AssetID"] == "MH-1")
            .unwrap();
        assert_eq!(first["structRating"], "4");
        assert_eq!(first["maintRating"], "1");
        assert_eq!(first["City"], "Oslo");

        let (_, counts) = get_json(&fixture.app, "/insp").await;
        let pacp = counts
            .as_array()
            .unwrap()
            .iter()
            .find(|row| row["TemplateName"] == "NASSCO PACP")
            .unwrap();
        assert_eq!(pacp["InspectionCount"], 2);
    }

    #[tokio::test]
    async fn fields_describe_companion_table() {
        let fixture = fixture(RecordingLauncher::default());
        let (status, body) = get_json(&fixture.app, "/fields").await;
        assert_eq!(status, StatusCode::OK);
        let names = body
            .as_array()
            .unwrap()
            .iter()
            .map(|column| column["COLUMN_NAME"].as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, ["AssetID", "Material", "Diameter"]);
        assert_eq!(body[0]["ORDINAL_POSITION"], 1);
    }

    #[tokio::test]
    async fn append_replaces_companion_rows() {
        let fixture = fixture(RecordingLauncher::default());
        let (status, body) = post(
            &fixture.app,
            "/append",
            r#"{"data":[{"AssetID":"NEW-1","Material":"HDPE"},{"AssetID":"NEW-2","Diameter":12}]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, APPEND_OK);

        let connection = Connection::open(fixture.dir.path().join("POSMGISData.mdb")).unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM PosmGIS WHERE AssetID LIKE 'NEW-%'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    fn companion_ids(dir: &Path) -> Vec<String> {
        let connection = Connection::open(dir.join("POSMGISData.mdb")).unwrap();
        let mut stmt = connection
            .prepare("SELECT AssetID FROM PosmGIS ORDER BY rowid")
            .unwrap();
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        ids
    }

    #[tokio::test]
    async fn append_failure_under_default_settings_keeps_inserted_prefix() {
        let fixture = fixture_with(RecordingLauncher::default(), |root| AppConfig {
            packaged: false,
            dev_dir: root.to_path_buf(),
            local_db_extension: "mdb".into(),
            gis_file_stem: "POSMGISData".into(),
            gis_table: "PosmGIS".into(),
            ..AppConfig::from_env()
        });

        let (status, _) = post(
            &fixture.app,
            "/append",
            r#"{"data":[{"AssetID":"A"},{"AssetID":"A"},{"AssetID":"C"}]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(companion_ids(fixture.dir.path()), ["A"]);
    }

    #[tokio::test]
    async fn append_matches_columns_ignoring_case() {
        let fixture = fixture(RecordingLauncher::default());
        let (status, _) = post(
            &fixture.app,
            "/append",
            r#"{"data":[{"assetid":"NEW-1","material":"HDPE"}]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(companion_ids(fixture.dir.path()), ["NEW-1"]);
    }

    #[tokio::test]
    async fn append_rejects_unknown_columns_and_bad_payloads() {
        let fixture = fixture(RecordingLauncher::default());

        let (status, body) = post(
            &fixture.app,
            "/append",
            r#"{"data":[{"AssetID":"X","Colour":"red"}]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Colour"));

        let (status, _) = post(&fixture.app, "/append", r#"{"rows":[]}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, fields) = get_json(&fixture.app, "/fields").await;
        assert_eq!(fields.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn launch_without_id_never_invokes_viewer() {
        let fixture = fixture(RecordingLauncher::default());
        for body in ["{}", r#"{"id":""}"#, r#"{"id":null}"#, "not json"] {
            let (status, text) = post(&fixture.app, "/launch", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            let parsed: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed["error"], "No ID provided");
        }
        assert!(fixture.launcher.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn launch_echoes_id_verbatim() {
        let fixture = fixture(RecordingLauncher::default());

        let (status, text) = post(&fixture.app, "/launch", r#"{"id":"MH 1/A"}"#).await;
        assert_eq!(status, StatusCode::OK);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["message"], "POSM launched successfully!");
        assert_eq!(parsed["id"], "MH 1/A");

        let (_, text) = post(&fixture.app, "/launch", r#"{"id":1042}"#).await;
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["id"], 1042);

        let calls = fixture.launcher.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].0.ends_with("POSM.exe"));
        assert_eq!(calls[0].1, "NASSCO PACP");
        assert_eq!(calls[0].2, "MH 1/A");
        assert_eq!(calls[1].2, "1042");
    }

    #[tokio::test]
    async fn launch_failure_carries_details() {
        let fixture = fixture(RecordingLauncher {
            fail: true,
            ..RecordingLauncher::default()
        });
        let (status, text) = post(&fixture.app, "/launch", r#"{"id":"MH-1"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["error"], "Failed to launch POSM");
        assert!(parsed["details"].as_str().unwrap().contains("viewer missing"));
    }

    #[tokio::test]
    async fn unreachable_primary_is_a_plain_text_500() {
        let fixture = fixture(RecordingLauncher::default());
        std::fs::remove_file(fixture.dir.path().join("POSM.mdb")).unwrap();

        let response = fixture
            .app
            .clone()
            .oneshot(Request::builder().uri("/map").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!bytes.is_empty());
    }
}
