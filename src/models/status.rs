//! Enums persisted as TEXT columns.
//!
//! Each variant maps to the exact string stored in the database and used on
//! the wire, so rows and request bodies share one vocabulary.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! define_text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

define_text_enum! {
    /// Lifecycle of an attendance session. `Closed` and `Canceled` are terminal.
    SessionStatus {
        Active = "ACTIVE",
        Closed = "CLOSED",
        Canceled = "CANCELED",
    }
}

define_text_enum! {
    /// How students are expected to prove presence in a session.
    VerificationType {
        QrCode = "QR_CODE",
        FaceRecognition = "FACE_RECOGNITION",
        Manual = "MANUAL",
        Both = "BOTH",
    }
}

define_text_enum! {
    /// One student's outcome for one session.
    AttendanceStatus {
        Present = "PRESENT",
        Late = "LATE",
        Absent = "ABSENT",
        Excused = "EXCUSED",
    }
}

define_text_enum! {
    Role {
        Admin = "ADMIN",
        Lecturer = "LECTURER",
        Assistant = "ASSISTANT",
        Student = "STUDENT",
    }
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl VerificationType {
    pub fn accepts_qr(self) -> bool {
        matches!(self, VerificationType::QrCode | VerificationType::Both)
    }

    pub fn accepts_face(self) -> bool {
        matches!(self, VerificationType::FaceRecognition | VerificationType::Both)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip_through_serde() {
        let json = serde_json::to_string(&VerificationType::FaceRecognition).unwrap();
        assert_eq!(json, "\"FACE_RECOGNITION\"");
        let back: VerificationType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, VerificationType::FaceRecognition);
    }

    #[test]
    fn test_unknown_value_is_rejected() {
        let err = "FINISHED".parse::<SessionStatus>().unwrap_err();
        assert_eq!(err.kind, "SessionStatus");
        assert!(serde_json::from_str::<AttendanceStatus>("\"present\"").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Closed.is_terminal());
        assert!(SessionStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_verification_type_accepts() {
        assert!(VerificationType::Both.accepts_qr());
        assert!(VerificationType::Both.accepts_face());
        assert!(!VerificationType::Manual.accepts_qr());
        assert!(!VerificationType::QrCode.accepts_face());
    }
}
