//! Mock Face API HTTP Server
//!
//! Simulates the face detection/identification service for local testing.
//!
//! Endpoints (Face v1.0 wire format):
//! - `POST /face/v1.0/detect` - one face per enrolled person, or none with --no-face
//! - `POST /face/v1.0/identify` - every detected face matches its person
//! - `GET /face/v1.0/persongroups/{group}/persons/{id}` - person name
//!
//! Usage:
//!   cargo run --bin mock_face_api -- --port 8090 --person Alice --person Bob
//!   cargo run --bin mock_face_api -- --unknown

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

const API_PREFIX: &str = "/face/v1.0";

#[derive(Parser, Debug)]
#[command(name = "mock_face_api")]
#[command(about = "Mock face recognition service for local simulation")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "8090")]
    port: u16,

    /// Enrolled person names; each detect returns one face per person
    #[arg(long = "person", default_value = "Alice")]
    persons: Vec<String>,

    /// Detect returns no faces
    #[arg(long)]
    no_face: bool,

    /// Identify returns no candidates
    #[arg(long)]
    unknown: bool,

    /// Required subscription key (any key accepted when unset)
    #[arg(long)]
    key: Option<String>,

    /// Artificial latency per request (ms)
    #[arg(long, default_value = "0")]
    latency_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyBody {
    person_group_id: String,
    face_ids: Vec<Uuid>,
}

struct MockState {
    args: Args,
    /// Enrolled people in CLI order
    people: Vec<(Uuid, String)>,
    /// Faces handed out by detect, mapped to the person they belong to
    faces: Mutex<HashMap<Uuid, Uuid>>,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    response
}

fn api_error(status: StatusCode, code: &str, message: &str) -> Response<Full<Bytes>> {
    json_response(status, json!({ "error": { "code": code, "message": message } }))
}

fn detect(state: &MockState, image: &[u8]) -> Response<Full<Bytes>> {
    if image.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "InvalidImage", "Image is empty.");
    }
    if state.args.no_face {
        println!("[MOCK] detect: {} bytes -> no faces", image.len());
        return json_response(StatusCode::OK, json!([]));
    }

    let mut faces = state.faces.lock();
    let detected: Vec<serde_json::Value> = state
        .people
        .iter()
        .enumerate()
        .map(|(i, (person_id, _))| {
            let face_id = Uuid::now_v7();
            faces.insert(face_id, *person_id);
            json!({
                "faceId": face_id,
                "faceRectangle": { "top": 60, "left": 120 + 160 * i, "width": 140, "height": 140 }
            })
        })
        .collect();

    println!("[MOCK] detect: {} bytes -> {} face(s)", image.len(), detected.len());
    json_response(StatusCode::OK, serde_json::Value::Array(detected))
}

fn identify(state: &MockState, body: &[u8]) -> Response<Full<Bytes>> {
    let request: IdentifyBody = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, "BadArgument", &e.to_string()),
    };

    let faces = state.faces.lock();
    let results: Vec<serde_json::Value> = request
        .face_ids
        .iter()
        .map(|face_id| {
            let candidates = match faces.get(face_id) {
                Some(person_id) if !state.args.unknown => {
                    json!([{ "personId": person_id, "confidence": 0.87 }])
                }
                _ => json!([]),
            };
            json!({ "faceId": face_id, "candidates": candidates })
        })
        .collect();

    println!(
        "[MOCK] identify: group={} faces={} unknown={}",
        request.person_group_id,
        request.face_ids.len(),
        state.args.unknown
    );
    json_response(StatusCode::OK, serde_json::Value::Array(results))
}

fn get_person(state: &MockState, group_id: &str, person_id: &str) -> Response<Full<Bytes>> {
    let found = Uuid::parse_str(person_id)
        .ok()
        .and_then(|id| state.people.iter().find(|(pid, _)| *pid == id));

    match found {
        Some((pid, name)) => {
            println!("[MOCK] person: group={group_id} id={pid} -> {name}");
            json_response(StatusCode::OK, json!({ "personId": pid, "name": name, "userData": "" }))
        }
        None => api_error(StatusCode::NOT_FOUND, "PersonNotFound", "Person is not found."),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<MockState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if state.args.latency_ms > 0 {
        tokio::time::sleep(Duration::from_millis(state.args.latency_ms)).await;
    }

    if let Some(expected) = &state.args.key {
        let provided = req
            .headers()
            .get("Ocp-Apim-Subscription-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            println!("[MOCK] rejected request with bad subscription key");
            return Ok(api_error(
                StatusCode::UNAUTHORIZED,
                "Unspecified",
                "Access denied due to invalid subscription key.",
            ));
        }
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Ok(api_error(StatusCode::BAD_REQUEST, "BadArgument", &e.to_string()));
        }
    };

    let Some(route) = path.strip_prefix(API_PREFIX) else {
        return Ok(api_error(StatusCode::NOT_FOUND, "NotFound", "Resource not found."));
    };
    let segments: Vec<&str> = route.trim_matches('/').split('/').collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::POST, ["detect"]) => detect(&state, &body),
        (&Method::POST, ["identify"]) => identify(&state, &body),
        (&Method::GET, ["persongroups", group_id, "persons", person_id]) => {
            get_person(&state, group_id, person_id)
        }
        _ => api_error(StatusCode::NOT_FOUND, "NotFound", "Resource not found."),
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let port = args.port;
    let people: Vec<(Uuid, String)> =
        args.persons.iter().map(|name| (Uuid::now_v7(), name.clone())).collect();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║               Mock Face Recognition API                  ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!("  Endpoint:  http://127.0.0.1:{port}{API_PREFIX}");
    for (id, name) in &people {
        println!("  Person:    {name} ({id})");
    }
    println!("  No face:   {}", args.no_face);
    println!("  Unknown:   {}", args.unknown);
    println!();

    let state = Arc::new(MockState { args, people, faces: Mutex::new(HashMap::new()) });
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, state).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("[MOCK] Connection error from {peer}: {e}");
            }
        });
    }
}
