use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{AttendanceSession, DbId, FaceMatch, QrPayload};

/// Decides whether a scanned QR value is good for a session at a moment.
#[async_trait]
pub trait QrTokenValidator: Send + Sync {
    async fn validate(
        &self,
        token: &str,
        session: &AttendanceSession,
        at: NaiveDateTime,
    ) -> Result<bool, AppError>;
}

/// Asks the face-match service who is in an image.
#[async_trait]
pub trait FaceVerifier: Send + Sync {
    async fn identify(&self, image: &str) -> Result<FaceMatch, AppError>;
}

/// Renders the payload shown in class for `session`.
pub fn issue_qr_token(session: &AttendanceSession, at: NaiveDateTime) -> Result<String, AppError> {
    let payload = QrPayload {
        session_id: session.id,
        schedule_id: session.schedule_id,
        nonce: session.qr_nonce.clone(),
        issued_at: at,
    };
    serde_json::to_string(&payload)
        .map_err(|e| AppError::External(format!("Failed to encode QR payload: {}", e)))
}

/// Accepts tokens produced by [`issue_qr_token`] for the same session.
///
/// The lifetime comes from the session settings when present, otherwise
/// from `default_lifetime_secs`; `None` means tokens never expire.
pub struct SessionQrValidator {
    default_lifetime_secs: Option<i64>,
}

impl SessionQrValidator {
    pub fn new(default_lifetime_secs: Option<i64>) -> Self {
        Self { default_lifetime_secs }
    }
}

#[async_trait]
impl QrTokenValidator for SessionQrValidator {
    async fn validate(
        &self,
        token: &str,
        session: &AttendanceSession,
        at: NaiveDateTime,
    ) -> Result<bool, AppError> {
        let payload: QrPayload = match serde_json::from_str(token) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("unreadable QR token for session {}: {}", session.id, e);
                return Ok(false);
            }
        };

        if payload.session_id != session.id
            || payload.schedule_id != session.schedule_id
            || payload.nonce != session.qr_nonce
        {
            return Ok(false);
        }
        if payload.issued_at > at {
            return Ok(false);
        }

        let lifetime = session.settings.qr_token_lifetime_secs.or(self.default_lifetime_secs);
        if let Some(secs) = lifetime {
            if (at - payload.issued_at).num_seconds() > secs {
                debug!("expired QR token for session {}", session.id);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Serialize)]
struct VerifyFaceRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyFaceResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "match")]
    matched: bool,
    #[serde(default)]
    student_id: Option<DbId>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the face-recognition service (`POST {base}/api/faces/verify`).
pub struct HttpFaceVerifier {
    client: Client,
    base_url: String,
}

impl HttpFaceVerifier {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::External(format!("Failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FaceVerifier for HttpFaceVerifier {
    async fn identify(&self, image: &str) -> Result<FaceMatch, AppError> {
        let url = format!("{}/api/faces/verify", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&VerifyFaceRequest { image })
            .send()
            .await
            .map_err(|e| AppError::External(format!("Face service unreachable: {}", e)))?;

        let status = response.status();
        let body: VerifyFaceResponse = response
            .json()
            .await
            .map_err(|e| AppError::External(format!("Face service sent an unreadable reply: {}", e)))?;

        if status.is_client_error() {
            // No face, several faces, or nobody registered.
            let reason = body.error.unwrap_or_else(|| status.to_string());
            return Err(AppError::Validation(reason));
        }
        if !status.is_success() || !body.success {
            warn!("face service error {}: {:?}", status, body.error);
            return Err(AppError::External(format!(
                "Face service error {}: {}",
                status,
                body.error.unwrap_or_default()
            )));
        }

        Ok(FaceMatch {
            matched: body.matched,
            subject_id: body.student_id,
            confidence: body.confidence.unwrap_or(0.0),
        })
    }
}
