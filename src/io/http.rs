//! Control and metrics HTTP endpoint
//!
//! - `GET /metrics` - Prometheus text format
//! - `GET /health` - orchestrator state as JSON
//! - `POST /doorbell` - virtual doorbell press
//!
//! Uses hyper for the HTTP server.

use crate::domain::types::{PressEvent, PressSource};
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::orchestrator::{Orchestrator, PressDisposition};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum {}", avg * count);
    let _ = writeln!(output, "{name}_count {count}");
}

/// Per-result recognition counter with a `result` label
fn write_recognitions(output: &mut String, summary: &MetricsSummary) {
    let name = "facegate_recognitions_total";
    let _ = writeln!(output, "# HELP {name} Recognition runs by result");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (result, val) in [
        ("identified", summary.identified_total),
        ("no_match", summary.no_match_total),
        ("no_face_detected", summary.no_face_total),
        ("invalid_image", summary.invalid_image_total),
        ("service_error", summary.service_error_total),
    ] {
        let _ = writeln!(output, "{name}{{result=\"{result}\"}} {val}");
    }
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "facegate_presses_total",
        "Doorbell presses received",
        MetricType::Counter,
        summary.presses_total,
    );
    write_metric(
        &mut output,
        "facegate_presses_dropped_busy_total",
        "Presses dropped while a session was in flight",
        MetricType::Counter,
        summary.presses_dropped_busy,
    );
    write_metric(
        &mut output,
        "facegate_sessions_total",
        "Door sessions completed",
        MetricType::Counter,
        summary.sessions_total,
    );
    write_recognitions(&mut output, &summary);
    write_metric(
        &mut output,
        "facegate_camera_unavailable_total",
        "Sessions where the camera produced no usable image",
        MetricType::Counter,
        summary.camera_unavailable_total,
    );
    write_metric(
        &mut output,
        "facegate_unlocks_total",
        "Unlock cycles started",
        MetricType::Counter,
        summary.unlocks_total,
    );
    write_metric(
        &mut output,
        "facegate_speech_errors_total",
        "Spoken messages that failed to play",
        MetricType::Counter,
        summary.speech_errors_total,
    );
    write_metric(
        &mut output,
        "facegate_busy",
        "1 while a session is in flight",
        MetricType::Gauge,
        summary.busy,
    );

    write_histogram(
        &mut output,
        "facegate_recognition_latency_ms",
        "Recognition pipeline latency in milliseconds",
        &summary.recognition_buckets,
        summary.recognition_avg_ms,
    );
    write_metric(
        &mut output,
        "facegate_recognition_latency_p95_ms",
        "95th percentile recognition latency",
        MetricType::Gauge,
        summary.recognition_p95_ms,
    );

    output
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    orchestrator: Arc<Orchestrator>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics),
        ),
        (&Method::GET, "/health") => {
            let state = orchestrator.gate().state();
            respond(
                StatusCode::OK,
                "application/json",
                format!(r#"{{"ok":true,"state":"{}"}}"#, state.as_str()),
            )
        }
        // Virtual doorbell press - POST /doorbell
        (&Method::POST, "/doorbell") => {
            match orchestrator.submit(PressEvent::new(PressSource::Virtual)) {
                PressDisposition::Accepted => {
                    info!("virtual_press_accepted");
                    respond(StatusCode::ACCEPTED, "application/json", r#"{"ok":true}"#)
                }
                PressDisposition::DroppedBusy => respond(
                    StatusCode::CONFLICT,
                    "application/json",
                    r#"{"ok":false,"error":"busy"}"#,
                ),
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    Ok(response)
}

/// Start the control/metrics HTTP server
pub async fn start_http_server(
    port: u16,
    metrics: Arc<Metrics>,
    orchestrator: Arc<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let orchestrator = orchestrator.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let orchestrator = orchestrator.clone();
                                async move { handle_request(req, metrics, orchestrator).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
