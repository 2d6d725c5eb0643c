//! HTTP front end: listener, routing, and session spawn.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpResponseBuilder, HttpServer};
use frame_source::{SourceError, SourceRegistry, SourceRequest};
use infer_core::InferenceEngine;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::query::RequestQuery;
use crate::session::{StreamSession, BOUNDARY, SERVER_TOKEN};

struct AppState {
    engine: Arc<InferenceEngine>,
    registry: SourceRegistry,
    cadence: Duration,
    metrics: Option<PrometheusHandle>,
}

/// Bind and run the accept loop until shutdown.
pub async fn run(
    config: ServerConfig,
    engine: Arc<InferenceEngine>,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let workers = config.threads.max(1);
    let cadence = config.frame_pause;
    let working_dir = config.working_dir.clone();

    info!(
        address = %config.address,
        port = config.port,
        workers,
        working_dir = %working_dir.display(),
        "listening for stream requests"
    );

    let state = web::Data::new(AppState {
        engine,
        registry: SourceRegistry::with_defaults(working_dir),
        cadence,
        metrics,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/metrics", web::get().to(metrics_route))
            .default_service(web::get().to(stream_route))
    })
    .workers(workers)
    .bind((config.address, config.port))?
    .run()
    .await?;

    Ok(())
}

/// Serve one MJPEG session for any GET request.
///
/// The first path segment selects the frame-source factory; remaining
/// segments and query parameters parameterize it.
async fn stream_route(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let query = RequestQuery::parse(req.path(), req.query_string());

    let Some((source_type, segments)) = query.path.split_first() else {
        debug!("request without a source type; closing after the header");
        return multipart_header().finish();
    };

    let request = SourceRequest {
        segments,
        options: &query.parameters,
    };
    let source = match state.registry.create(source_type, &request) {
        Ok(source) => source,
        Err(SourceError::UnknownType(tag)) => {
            debug!(%tag, "no frame source registered; closing after the header");
            return multipart_header().finish();
        }
        Err(err) => {
            warn!(error = %err, "frame source construction failed; closing after the header");
            return multipart_header().finish();
        }
    };

    let context = match state.engine.inference_context() {
        Ok(context) => context,
        Err(err) => {
            error!(error = %err, "failed to create inference context");
            return HttpResponse::InternalServerError().finish();
        }
    };

    debug!(%source_type, "starting inference stream");
    let session = StreamSession::new(context, source, state.cadence);
    multipart_header().streaming(session.into_body())
}

async fn metrics_route(state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}

fn multipart_header() -> HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    builder
        .insert_header(("Server", SERVER_TOKEN))
        .insert_header(("Cache-Control", "no-cache"))
        .content_type(format!("multipart/x-mixed-replace; boundary={BOUNDARY}"));
    builder
}
