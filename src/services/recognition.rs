//! Recognition pipeline: validate -> detect -> identify -> resolve -> decide
//!
//! Every remote call is bounded by the configured timeout. Any service or
//! transport failure aborts the remaining stages and surfaces as
//! `Failure(ServiceError)`; nothing is retried.

use crate::domain::error::{FaceApiError, RecognitionError};
use crate::domain::types::{CapturedImage, FaceId, IdentifyResult, PersonId, RecognitionResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Remote face detection / identification service
#[async_trait]
pub trait FaceService: Send + Sync {
    /// Detect faces in an encoded image, in detection order
    async fn detect_faces(&self, image: Bytes) -> Result<Vec<FaceId>, FaceApiError>;

    /// Match detected faces against the enrolled people of `group_id`
    async fn identify(
        &self,
        group_id: &str,
        face_ids: &[FaceId],
    ) -> Result<Vec<IdentifyResult>, FaceApiError>;

    /// Display name of an enrolled person
    async fn get_person_name(
        &self,
        group_id: &str,
        person_id: PersonId,
    ) -> Result<String, FaceApiError>;
}

pub struct RecognitionPipeline {
    service: Arc<dyn FaceService>,
    group_id: String,
    call_timeout: Duration,
}

impl RecognitionPipeline {
    pub fn new(
        service: Arc<dyn FaceService>,
        group_id: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self { service, group_id: group_id.into(), call_timeout }
    }

    /// Resolve a captured image to a recognition result. Never fails.
    pub async fn recognize(&self, image: &CapturedImage) -> RecognitionResult {
        let start = Instant::now();
        let result = match self.identify_visitor(image).await {
            Ok(Some(name)) => RecognitionResult::Identified(name),
            Ok(None) => RecognitionResult::NoMatch,
            Err(e) => RecognitionResult::Failure(e.into()),
        };

        info!(
            image = %image.path.display(),
            result = %result.as_str(),
            latency_ms = %start.elapsed().as_millis(),
            "recognition_complete"
        );
        result
    }

    async fn identify_visitor(
        &self,
        image: &CapturedImage,
    ) -> Result<Option<String>, RecognitionError> {
        let bytes = load_image(image).await?;

        let face_ids = self.bounded("detect", self.service.detect_faces(bytes)).await?;
        if face_ids.is_empty() {
            debug!("recognition_no_face");
            return Err(RecognitionError::NoFaceDetected);
        }
        debug!(faces = %face_ids.len(), "recognition_faces_detected");

        let mut results = self
            .bounded("identify", self.service.identify(&self.group_id, &face_ids))
            .await?;
        // Keep detection order regardless of response order
        results.sort_by_key(|r| {
            face_ids.iter().position(|id| *id == r.face_id).unwrap_or(usize::MAX)
        });

        let mut names = Vec::new();
        for result in &results {
            let Some(best) = result.candidates.first() else {
                continue;
            };
            let name = self
                .bounded(
                    "get_person",
                    self.service.get_person_name(&self.group_id, best.person_id),
                )
                .await?;
            debug!(
                face_id = %result.face_id,
                person_id = %best.person_id,
                confidence = %best.confidence,
                name = %name,
                "recognition_candidate_resolved"
            );
            names.push(name);
        }

        // First match wins
        Ok(names.into_iter().next())
    }

    /// Apply the per-call timeout and collapse failures to `ServiceError`
    async fn bounded<T>(
        &self,
        stage: &'static str,
        call: impl Future<Output = Result<T, FaceApiError>>,
    ) -> Result<T, RecognitionError> {
        let outcome = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(FaceApiError::Timeout(self.call_timeout.as_millis() as u64)),
        };

        outcome.map_err(|e| {
            warn!(stage = stage, error = %e, "face_api_call_failed");
            RecognitionError::from(e)
        })
    }
}

/// Read an image after checking it is a supported, non-empty file
pub async fn load_image(image: &CapturedImage) -> Result<Bytes, RecognitionError> {
    if image.format().is_none() {
        warn!(image = %image.path.display(), "recognition_unsupported_format");
        return Err(RecognitionError::InvalidImage);
    }

    match tokio::fs::read(&image.path).await {
        Ok(data) if !data.is_empty() => Ok(Bytes::from(data)),
        Ok(_) => {
            warn!(image = %image.path.display(), "recognition_empty_image");
            Err(RecognitionError::InvalidImage)
        }
        Err(e) => {
            warn!(image = %image.path.display(), error = %e, "recognition_image_unreadable");
            Err(RecognitionError::InvalidImage)
        }
    }
}

/// Scriptable face service for unit tests
#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use crate::domain::types::Candidate;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    pub struct StubFaceService {
        pub faces: Vec<(FaceId, Option<(PersonId, String)>)>,
        pub fail_stage: Option<&'static str>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl StubFaceService {
        pub fn no_faces() -> Self {
            Self::default()
        }

        /// One detected face per entry; None means no candidate
        pub fn with_people(people: &[Option<&str>]) -> Self {
            let faces = people
                .iter()
                .map(|p| {
                    let face = FaceId(Uuid::now_v7());
                    let person = p.map(|name| (PersonId(Uuid::now_v7()), name.to_string()));
                    (face, person)
                })
                .collect();
            Self { faces, ..Default::default() }
        }

        pub fn failing_at(mut self, stage: &'static str) -> Self {
            self.fail_stage = Some(stage);
            self
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        async fn enter(&self, stage: &'static str) -> Result<(), FaceApiError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_stage == Some(stage) {
                return Err(FaceApiError::Status { status: 500, body: stage.to_string() });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl FaceService for StubFaceService {
        async fn detect_faces(&self, _image: Bytes) -> Result<Vec<FaceId>, FaceApiError> {
            self.enter("detect").await?;
            Ok(self.faces.iter().map(|(id, _)| *id).collect())
        }

        async fn identify(
            &self,
            _group_id: &str,
            face_ids: &[FaceId],
        ) -> Result<Vec<IdentifyResult>, FaceApiError> {
            self.enter("identify").await?;
            let by_face: HashMap<_, _> = self.faces.iter().cloned().collect();
            Ok(face_ids
                .iter()
                .map(|id| IdentifyResult {
                    face_id: *id,
                    candidates: by_face
                        .get(id)
                        .cloned()
                        .flatten()
                        .map(|(person_id, _)| vec![Candidate { person_id, confidence: 0.9 }])
                        .unwrap_or_default(),
                })
                .collect())
        }

        async fn get_person_name(
            &self,
            _group_id: &str,
            person_id: PersonId,
        ) -> Result<String, FaceApiError> {
            self.enter("get_person").await?;
            self.faces
                .iter()
                .filter_map(|(_, p)| p.as_ref())
                .find(|(id, _)| *id == person_id)
                .map(|(_, name)| name.clone())
                .ok_or_else(|| FaceApiError::Status { status: 404, body: "no person".into() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubFaceService;
    use super::*;
    use crate::domain::types::FailureReason;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn jpeg() -> NamedTempFile {
        let mut file = Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]).unwrap();
        file
    }

    fn pipeline(service: StubFaceService) -> RecognitionPipeline {
        RecognitionPipeline::new(Arc::new(service), "visitors", Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_zero_faces_is_no_face_detected() {
        let file = jpeg();
        let result = pipeline(StubFaceService::no_faces())
            .recognize(&CapturedImage::new(file.path()))
            .await;
        assert_eq!(result, RecognitionResult::Failure(FailureReason::NoFaceDetected));
    }

    #[tokio::test]
    async fn test_single_face_identified() {
        let file = jpeg();
        let result = pipeline(StubFaceService::with_people(&[Some("Alice")]))
            .recognize(&CapturedImage::new(file.path()))
            .await;
        assert_eq!(result, RecognitionResult::Identified("Alice".to_string()));
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let file = jpeg();
        let service = StubFaceService::with_people(&[None, Some("Alice"), Some("Bob")]);
        let result = pipeline(service).recognize(&CapturedImage::new(file.path())).await;
        assert_eq!(result, RecognitionResult::Identified("Alice".to_string()));
    }

    #[tokio::test]
    async fn test_no_candidates_is_no_match() {
        let file = jpeg();
        let result = pipeline(StubFaceService::with_people(&[None, None]))
            .recognize(&CapturedImage::new(file.path()))
            .await;
        assert_eq!(result, RecognitionResult::NoMatch);
    }

    #[tokio::test]
    async fn test_service_error_aborts() {
        let file = jpeg();
        for stage in ["detect", "identify", "get_person"] {
            let service = StubFaceService::with_people(&[Some("Alice")]).failing_at(stage);
            let result = pipeline(service).recognize(&CapturedImage::new(file.path())).await;
            assert_eq!(
                result,
                RecognitionResult::Failure(FailureReason::ServiceError),
                "stage {stage}"
            );
        }
    }

    #[tokio::test]
    async fn test_timeout_is_service_error() {
        let file = jpeg();
        let service =
            StubFaceService::with_people(&[Some("Alice")]).delayed(Duration::from_millis(500));
        let started = Instant::now();
        let result = pipeline(service).recognize(&CapturedImage::new(file.path())).await;
        assert_eq!(result, RecognitionResult::Failure(FailureReason::ServiceError));
        assert!(started.elapsed() < Duration::from_millis(450));
    }

    #[tokio::test]
    async fn test_invalid_images_never_reach_service() {
        let service = Arc::new(StubFaceService::with_people(&[Some("Alice")]));
        let pipeline = RecognitionPipeline::new(service.clone(), "visitors", Duration::from_secs(1));

        let empty = Builder::new().suffix(".png").tempfile().unwrap();
        let mut text = Builder::new().suffix(".txt").tempfile().unwrap();
        text.write_all(b"not an image").unwrap();

        for image in [
            CapturedImage::new(empty.path()),
            CapturedImage::new(text.path()),
            CapturedImage::new("/nonexistent/snap.jpg"),
        ] {
            assert_eq!(
                pipeline.recognize(&image).await,
                RecognitionResult::Failure(FailureReason::InvalidImage)
            );
        }
        assert_eq!(service.calls.load(std::sync::atomic::Ordering::Relaxed), 0);
    }
}
