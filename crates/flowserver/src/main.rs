use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, ResponseError,
    Result as ActixResult,
};
use actix_ws::Message;
use flowcore::{FlowError, StoreError};
use flowruntime::{CycleReport, FlowLoader, FlowRuntime, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: FlowRuntime,
}

/// Runtime error mapped onto an HTTP status
#[derive(Debug)]
struct ApiError(FlowError);

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        Self(err)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match &self.0 {
            FlowError::Definition(_) | FlowError::Serialization(_) => StatusCode::BAD_REQUEST,
            FlowError::NotFound(_) | FlowError::Store(StoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            FlowError::Inactive(_) | FlowError::CycleInFlight(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            error!(error = %self.0, "request failed");
        }
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.0.to_string(),
        })
    }
}

/// Response for flow creation
#[derive(Debug, Serialize)]
struct FlowResponse {
    id: Uuid,
    message: String,
}

/// Summary of one cycle
#[derive(Debug, Serialize)]
struct CycleResponse {
    flow_id: Uuid,
    succeeded: bool,
    execution_ids: Vec<Uuid>,
    emitted: usize,
    skipped: usize,
    trigger_error: Option<serde_json::Map<String, serde_json::Value>>,
}

impl From<CycleReport> for CycleResponse {
    fn from(report: CycleReport) -> Self {
        Self {
            flow_id: report.flow_id,
            succeeded: report.succeeded(),
            execution_ids: report.executions.iter().map(|e| e.id).collect(),
            emitted: report.emitted,
            skipped: report.skipped,
            trigger_error: report.trigger_error,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TestRunRequest {
    until_step: Option<Uuid>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "flowengine"
    }))
}

/// List all flows
#[get("/api/flows")]
async fn list_flows(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let flows: Vec<_> = data
        .runtime
        .list_flows()
        .await
        .into_iter()
        .map(|f| {
            serde_json::json!({
                "id": f.id,
                "name": f.name,
                "owner": f.owner,
                "active": f.active,
                "steps": f.steps.len(),
                "polling": data.runtime.is_polling(f.id),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(flows))
}

/// Register a flow
#[post("/api/flows")]
async fn create_flow(
    data: web::Data<AppState>,
    body: String,
) -> Result<HttpResponse, ApiError> {
    let flow = flowruntime::parse_flow(&body)?;

    info!(flow_id = %flow.id, name = %flow.name, "creating flow");
    let flow_id = data.runtime.register_flow(flow).await?;

    Ok(HttpResponse::Created().json(FlowResponse {
        id: flow_id,
        message: "Flow created successfully".to_string(),
    }))
}

/// Get a specific flow
#[get("/api/flows/{id}")]
async fn get_flow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let flow = data.runtime.get_flow(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(flow))
}

/// Delete a flow
#[actix_web::delete("/api/flows/{id}")]
async fn delete_flow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let flow_id = path.into_inner();
    data.runtime.remove_flow(flow_id).await?;
    info!(flow_id = %flow_id, "deleted flow");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Flow deleted successfully"
    })))
}

#[post("/api/flows/{id}/activate")]
async fn activate_flow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let flow_id = path.into_inner();
    data.runtime.activate(flow_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": flow_id,
        "active": true,
        "polling": data.runtime.is_polling(flow_id),
    })))
}

#[post("/api/flows/{id}/deactivate")]
async fn deactivate_flow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let flow_id = path.into_inner();
    data.runtime.deactivate(flow_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": flow_id,
        "active": false,
    })))
}

/// Test run a flow; the body may name a step to stop after
#[post("/api/flows/{id}/test")]
async fn test_flow(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: Option<web::Json<TestRunRequest>>,
) -> Result<HttpResponse, ApiError> {
    let flow_id = path.into_inner();
    let request = body.map(|b| b.into_inner()).unwrap_or_default();

    info!(flow_id = %flow_id, until_step = ?request.until_step, "test run");
    let report = data.runtime.test_run(flow_id, request.until_step).await?;
    Ok(HttpResponse::Ok().json(CycleResponse::from(report)))
}

#[get("/api/flows/{id}/executions")]
async fn list_executions(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let flow_id = path.into_inner();
    data.runtime.get_flow(flow_id).await?;
    let executions = data.runtime.executions(flow_id).await?;
    Ok(HttpResponse::Ok().json(executions))
}

/// An execution with its steps
#[get("/api/executions/{id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let (execution, steps) = data.runtime.execution(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "execution": execution,
        "steps": steps,
    })))
}

/// Start a live run of a webhook flow with the request body as payload
#[post("/webhooks/{flow_id}")]
async fn receive_webhook(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let flow_id = path.into_inner();
    let payload = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).map_err(FlowError::from)?
    };

    info!(flow_id = %flow_id, bytes = body.len(), "webhook received");
    let report = data.runtime.handle_webhook(flow_id, payload).await?;
    if !report.succeeded() {
        warn!(flow_id = %flow_id, "webhook run failed");
    }
    Ok(HttpResponse::Ok().json(CycleResponse::from(report)))
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "WebSocket client lagging, events dropped");
                        }
                        Err(_) => break,
                    }
                }

                // Handle incoming WebSocket messages (ping/pong)
                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List installed apps with their triggers and actions
#[get("/api/apps")]
async fn list_apps(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.runtime.registry();
    let apps: Vec<_> = registry
        .list_apps()
        .iter()
        .filter_map(|key| registry.get_metadata(key))
        .collect();

    Ok(HttpResponse::Ok().json(apps))
}

fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_flows)
        .service(create_flow)
        .service(get_flow)
        .service(delete_flow)
        .service(activate_flow)
        .service(deactivate_flow)
        .service(test_flow)
        .service(list_executions)
        .service(get_execution)
        .service(receive_webhook)
        .service(websocket_events)
        .service(list_apps);
}

fn build_runtime() -> FlowRuntime {
    let mut registry = flowruntime::AppRegistry::new();
    flowapps::register_all(&mut registry);
    FlowRuntime::with_config(registry, RuntimeConfig::from_env())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Flow Engine Server");

    let runtime = build_runtime();
    info!(apps = ?runtime.registry().list_apps(), "✅ Runtime initialized with built-in apps");

    if let Ok(dir) = std::env::var("FLOWS_DIR") {
        for flow in FlowLoader::new(&dir).load_all()? {
            let name = flow.name.clone();
            match runtime.register_flow(flow).await {
                Ok(flow_id) => info!(flow_id = %flow_id, name = %name, "loaded flow"),
                Err(e) => warn!(name = %name, error = %e, "skipping invalid flow"),
            }
        }
    }

    let app_state = web::Data::new(AppState {
        runtime: runtime.clone(),
    });

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    runtime.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::json;

    const WEBHOOK_FLOW: &str = r#"{
        "id": "2d4b8f0a-51c3-4c1e-8f4e-3b1f2a6c9d01",
        "name": "echo",
        "owner": "user-1",
        "steps": [
            { "id": "2d4b8f0a-51c3-4c1e-8f4e-3b1f2a6c9d02", "type": "trigger",
              "app_key": "webhook", "key": "catch_raw_webhook", "position": 1 },
            { "id": "2d4b8f0a-51c3-4c1e-8f4e-3b1f2a6c9d03", "type": "action",
              "app_key": "debug", "key": "log", "position": 2,
              "parameters": { "message": "{{ trigger.ref }}" } }
        ]
    }"#;

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState {
            runtime: build_runtime(),
        })
    }

    #[actix_web::test]
    async fn test_webhook_lifecycle() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_payload(WEBHOOK_FLOW)
            .to_request();
        let created: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let flow_id = created["id"].as_str().unwrap().to_string();

        // Inactive flows refuse webhooks
        let req = test::TestRequest::post()
            .uri(&format!("/webhooks/{}", flow_id))
            .set_json(json!({ "ref": "main" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri(&format!("/api/flows/{}/activate", flow_id))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::post()
            .uri(&format!("/webhooks/{}", flow_id))
            .set_json(json!({ "ref": "main" }))
            .to_request();
        let run: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(run["succeeded"], true);
        let execution_id = run["execution_ids"][0].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/executions/{}", execution_id))
            .to_request();
        let detail: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(detail["steps"].as_array().unwrap().len(), 2);
        assert_eq!(detail["steps"][1]["data_out"]["message"], "main");
    }

    #[actix_web::test]
    async fn test_errors_map_to_statuses() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/flows/{}", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/flows")
            .set_payload("{ not json")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/health").to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
    }
}
