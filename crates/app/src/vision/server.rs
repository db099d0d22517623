//! Actix Web control surface.
//!
//! The server runs on a dedicated thread so the pipeline threads stay free
//! from Actix runtime concerns. Handlers hand blocking controller calls
//! (source resolution can spawn `yt-dlp`) to the blocking pool.

use std::{net::SocketAddr, thread::JoinHandle};

use actix_web::{
    App, HttpResponse, HttpServer,
    error::InternalError,
    http::header::ContentType,
    web,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::vision::{
    controller::{PipelineController, StartError},
    telemetry,
};

/// Handle for the control server thread.
pub(crate) struct ControlServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Whether the server thread already exited, e.g. after a failed bind.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Deserialize)]
struct SeeUrlRequest {
    url: String,
}

#[derive(Deserialize)]
struct MetadataQuery {
    url: String,
}

#[derive(Debug, Serialize)]
struct SeeUrlResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumb_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SeeUrlResponse {
    fn started(thumb_url: Option<String>) -> Self {
        Self {
            success: true,
            thumb_url,
            error: None,
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            thumb_url: None,
            error: Some(error.to_string()),
        }
    }
}

/// Spawn the control server thread and return a handle that can stop it.
pub(crate) fn spawn_control_server(
    controller: PipelineController,
    addr: SocketAddr,
) -> Result<ControlServer> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("stream-control-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(controller.clone()))
                    .configure(routes)
            })
            .workers(2)
            .bind(addr)?
            .run();

            info!(%addr, "control server listening");
            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn control server thread")?;

    Ok(ControlServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

fn routes(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(SeeUrlResponse::failed(&err));
        InternalError::from_response(err, response).into()
    });
    cfg.app_data(json_config)
        .route("/seeurl", web::post().to(see_url))
        .route("/metadata", web::get().to(metadata))
        .route("/metrics", web::get().to(metrics_route))
        .route("/healthz", web::get().to(healthz));
}

/// Start annotating the stream behind `url`, superseding any current run.
async fn see_url(
    body: web::Json<SeeUrlRequest>,
    controller: web::Data<PipelineController>,
) -> HttpResponse {
    let url = body.into_inner().url;
    let controller = controller.get_ref().clone();
    match web::block(move || controller.start(&url)).await {
        Ok(Ok(metadata)) => HttpResponse::Ok().json(SeeUrlResponse::started(metadata.thumb_url)),
        Ok(Err(err @ StartError::Resolve(_))) => {
            warn!("rejected source: {err}");
            HttpResponse::BadRequest().json(SeeUrlResponse::failed(err))
        }
        Ok(Err(err)) => {
            error!("could not start run: {err}");
            HttpResponse::InternalServerError().json(SeeUrlResponse::failed(err))
        }
        Err(err) => HttpResponse::InternalServerError().json(SeeUrlResponse::failed(err)),
    }
}

async fn metadata(
    query: web::Query<MetadataQuery>,
    controller: web::Data<PipelineController>,
) -> HttpResponse {
    let url = query.into_inner().url;
    let controller = controller.get_ref().clone();
    match web::block(move || controller.metadata(&url)).await {
        Ok(Ok(metadata)) => HttpResponse::Ok().json(metadata),
        Ok(Err(err)) => HttpResponse::BadRequest().json(SeeUrlResponse::failed(err)),
        Err(err) => HttpResponse::InternalServerError().json(SeeUrlResponse::failed(err)),
    }
}

async fn metrics_route() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable()
            .content_type(ContentType::plaintext())
            .body("metrics recorder not installed"),
    }
}

async fn healthz(controller: web::Data<PipelineController>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "active_runs": controller.active_runs(),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use actix_web::{http::StatusCode, test};

    use super::*;
    use crate::vision::{
        controller::RunBackend,
        data::StopFlag,
        pipeline::PipelineReport,
        resolver::{ResolveError, SourceResolver, StreamMetadata},
    };

    struct PrefixResolver;

    impl SourceResolver for PrefixResolver {
        fn resolve(&self, source: &str) -> Result<StreamMetadata, ResolveError> {
            match source.strip_prefix("ok:") {
                Some(name) => Ok(StreamMetadata {
                    video_url: format!("rtsp://{name}"),
                    thumb_url: Some(format!("https://thumbs/{name}.jpg")),
                }),
                None => Err(ResolveError::Unsupported(source.to_string())),
            }
        }
    }

    struct InstantBackend;

    impl RunBackend for InstantBackend {
        fn run(&self, _metadata: &StreamMetadata, _stop: &StopFlag) -> Result<PipelineReport> {
            Ok(PipelineReport::default())
        }
    }

    fn controller() -> PipelineController {
        PipelineController::new(Box::new(PrefixResolver), Box::new(InstantBackend))
    }

    #[actix_web::test]
    async fn seeurl_starts_a_run_and_returns_the_thumbnail() {
        let controller = controller();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(controller.clone()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/seeurl")
            .set_json(serde_json::json!({"url": "ok:cam"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["thumb_url"], "https://thumbs/cam.jpg");
        assert!(controller.wait_idle(Duration::from_secs(5)));
    }

    #[actix_web::test]
    async fn unresolvable_sources_are_rejected() {
        let controller = controller();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(controller.clone()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/seeurl")
            .set_json(serde_json::json!({"url": "ftp://nowhere"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("unsupported source"));
        assert!(!controller.is_busy());
    }

    #[actix_web::test]
    async fn malformed_bodies_get_a_json_error() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(controller()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/seeurl")
            .insert_header(ContentType::json())
            .set_payload("{\"link\": 1}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn metadata_and_health_endpoints() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(controller()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/metadata?url=ok:door")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["video_url"], "rtsp://door");

        let req = test::TestRequest::get().uri("/healthz").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_runs"], 0);
    }
}
