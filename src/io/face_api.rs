//! Face API REST client
//!
//! Speaks the Azure Face v1.0 wire format:
//! - `POST {endpoint}/detect?returnFaceId=true` with the raw image body
//! - `POST {endpoint}/identify` with `{personGroupId, faceIds}`
//! - `GET {endpoint}/persongroups/{group}/persons/{personId}`
//!
//! The subscription key travels in the `Ocp-Apim-Subscription-Key` header.

use crate::domain::error::FaceApiError;
use crate::domain::types::{Candidate, FaceId, IdentifyResult, PersonId};
use crate::infra::config::Config;
use crate::services::recognition::FaceService;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Longest error body kept in `FaceApiError::Status`
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedFace {
    face_id: FaceId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyRequest<'a> {
    person_group_id: &'a str,
    face_ids: &'a [FaceId],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifiedFace {
    face_id: FaceId,
    #[serde(default)]
    candidates: Vec<CandidateDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateDto {
    person_id: PersonId,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    name: String,
}

impl From<IdentifiedFace> for IdentifyResult {
    fn from(face: IdentifiedFace) -> Self {
        IdentifyResult {
            face_id: face.face_id,
            candidates: face
                .candidates
                .into_iter()
                .map(|c| Candidate { person_id: c.person_id, confidence: c.confidence })
                .collect(),
        }
    }
}

pub struct FaceApiClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_key: String,
}

impl FaceApiClient {
    pub fn new(
        endpoint: &str,
        subscription_key: &str,
        timeout: Duration,
    ) -> Result<Self, FaceApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription_key: subscription_key.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, FaceApiError> {
        let client = Self::new(
            config.face_endpoint(),
            config.face_subscription_key(),
            Duration::from_millis(config.face_timeout_ms()),
        )?;
        let key_configured = !client.subscription_key.is_empty();
        info!(
            endpoint = %client.endpoint,
            key_configured = %key_configured,
            "face_api_client_ready"
        );
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        call: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, FaceApiError> {
        let start = Instant::now();
        let response = request.header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        debug!(
            call = call,
            status = %status.as_u16(),
            latency_ms = %start.elapsed().as_millis(),
            "face_api_response"
        );

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let body = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(FaceApiError::Status { status: status.as_u16(), body });
        }

        serde_json::from_slice(&body).map_err(|e| FaceApiError::Decode(format!("{call}: {e}")))
    }
}

#[async_trait]
impl FaceService for FaceApiClient {
    async fn detect_faces(&self, image: Bytes) -> Result<Vec<FaceId>, FaceApiError> {
        let request = self
            .http
            .post(self.url("detect"))
            .query(&[("returnFaceId", "true")])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image);

        let faces: Vec<DetectedFace> = self.send("detect", request).await?;
        Ok(faces.into_iter().map(|f| f.face_id).collect())
    }

    async fn identify(
        &self,
        group_id: &str,
        face_ids: &[FaceId],
    ) -> Result<Vec<IdentifyResult>, FaceApiError> {
        let body = IdentifyRequest { person_group_id: group_id, face_ids };
        let request = self.http.post(self.url("identify")).json(&body);

        let faces: Vec<IdentifiedFace> = self.send("identify", request).await?;
        Ok(faces.into_iter().map(IdentifyResult::from).collect())
    }

    async fn get_person_name(
        &self,
        group_id: &str,
        person_id: PersonId,
    ) -> Result<String, FaceApiError> {
        let path = format!("persongroups/{group_id}/persons/{person_id}");
        let person: Person = self.send("get_person", self.http.get(self.url(&path))).await?;
        Ok(person.name)
    }
}
