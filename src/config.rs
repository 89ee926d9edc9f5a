use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::AppError;

/// Attendance rules applied when a session's own settings are silent.
#[derive(Clone, Debug, PartialEq)]
pub struct AttendancePolicy {
    /// Minutes after a session opens during which a check-in counts as on time.
    pub late_threshold_minutes: i64,
    pub allow_late: bool,
    pub min_face_confidence: f64,
    pub qr_token_lifetime_secs: Option<i64>,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            late_threshold_minutes: 10,
            allow_late: true,
            min_face_confidence: 0.6,
            qr_token_lifetime_secs: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub face_service_url: Option<String>,
    pub attendance: AttendancePolicy,
}

impl AppConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let defaults = AttendancePolicy::default();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://presence.db?mode=rwc".to_string());
        let bind_addr = parse_var("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?;
        let max_connections = parse_var("DB_MAX_CONNECTIONS", 5u32)?;
        let face_service_url = env::var("FACE_SERVICE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let attendance = AttendancePolicy {
            late_threshold_minutes: parse_var("LATE_THRESHOLD_MINUTES", defaults.late_threshold_minutes)?,
            allow_late: parse_var("ALLOW_LATE_CHECK_IN", defaults.allow_late)?,
            min_face_confidence: parse_var("FACE_MIN_CONFIDENCE", defaults.min_face_confidence)?,
            qr_token_lifetime_secs: match env::var("QR_TOKEN_LIFETIME_SECS") {
                Ok(raw) => Some(parse_value("QR_TOKEN_LIFETIME_SECS", &raw)?),
                Err(_) => None,
            },
        };

        if attendance.late_threshold_minutes < 0 {
            return Err(AppError::Validation(
                "LATE_THRESHOLD_MINUTES must not be negative".to_string(),
            ));
        }
        if attendance.qr_token_lifetime_secs.is_some_and(|secs| secs <= 0) {
            return Err(AppError::Validation(
                "QR_TOKEN_LIFETIME_SECS must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&attendance.min_face_confidence) {
            return Err(AppError::Validation(
                "FACE_MIN_CONFIDENCE must be between 0 and 1".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            bind_addr,
            max_connections,
            face_service_url,
            attendance,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("{} has an invalid value: {:?}", name, raw)))
}
