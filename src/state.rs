use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::{AppConfig, AttendancePolicy};
use crate::error::AppError;
use crate::services::{AssignmentService, AttendanceService, ScheduleService, StatisticsService};
use crate::verification::{FaceVerifier, HttpFaceVerifier, QrTokenValidator, SessionQrValidator};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub policy: AttendancePolicy,
    pub qr: Arc<dyn QrTokenValidator>,
    pub face: Option<Arc<dyn FaceVerifier>>,
}

impl AppState {
    pub fn from_config(db: SqlitePool, config: &AppConfig) -> Result<Self, AppError> {
        let face: Option<Arc<dyn FaceVerifier>> = match &config.face_service_url {
            Some(url) => Some(Arc::new(HttpFaceVerifier::new(url.clone())?)),
            None => None,
        };

        Ok(Self {
            db,
            policy: config.attendance.clone(),
            qr: Arc::new(SessionQrValidator::new(config.attendance.qr_token_lifetime_secs)),
            face,
        })
    }

    pub fn schedules(&self) -> ScheduleService {
        ScheduleService::new(self.db.clone())
    }

    pub fn assignments(&self) -> AssignmentService {
        AssignmentService::new(self.db.clone())
    }

    pub fn attendance(&self) -> AttendanceService {
        AttendanceService::new(
            self.db.clone(),
            self.policy.clone(),
            self.qr.clone(),
            self.face.clone(),
        )
    }

    pub fn statistics(&self) -> StatisticsService {
        StatisticsService::new(self.db.clone())
    }
}
