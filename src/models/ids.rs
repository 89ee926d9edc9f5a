use serde::{Deserialize, Deserializer, Serialize};

/// Canonical identifier for every persisted record.
pub type DbId = i64;

/// An identifier as it arrives from outside: upstream JSON sources send ids as
/// integers, floats or strings depending on where they were produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawId {
    pub fn normalize(&self) -> Result<DbId, String> {
        let id = match self {
            RawId::Int(v) => *v,
            RawId::Float(v) => {
                if !v.is_finite() || v.fract() != 0.0 || *v > i64::MAX as f64 || *v < i64::MIN as f64 {
                    return Err(format!("identifier {} is not an integer", v));
                }
                *v as i64
            }
            RawId::Text(s) => return parse_id(s),
        };

        if id <= 0 {
            return Err(format!("identifier {} must be positive", id));
        }
        Ok(id)
    }
}

/// Parses a textual identifier, accepting integral decimals such as `"42.0"`.
pub fn parse_id(text: &str) -> Result<DbId, String> {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return RawId::Int(v).normalize();
    }
    match trimmed.parse::<f64>() {
        Ok(v) => RawId::Float(v).normalize(),
        Err(_) => Err(format!("identifier {:?} is not numeric", text)),
    }
}

pub fn deserialize_id<'de, D>(deserializer: D) -> Result<DbId, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer)?
        .normalize()
        .map_err(serde::de::Error::custom)
}

pub fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<DbId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawId>::deserialize(deserializer)? {
        Some(raw) => raw.normalize().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Payload {
        #[serde(deserialize_with = "deserialize_id")]
        id: DbId,
        #[serde(default, deserialize_with = "deserialize_opt_id")]
        other: Option<DbId>,
    }

    #[test]
    fn test_integer_float_and_string_ids_normalize_to_same_value() {
        for body in [r#"{"id": 42}"#, r#"{"id": 42.0}"#, r#"{"id": "42"}"#, r#"{"id": " 42 "}"#] {
            let p: Payload = serde_json::from_str(body).unwrap();
            assert_eq!(p.id, 42, "body: {}", body);
            assert_eq!(p.other, None);
        }
    }

    #[test]
    fn test_optional_id_accepts_string() {
        let p: Payload = serde_json::from_str(r#"{"id": 1, "other": "7"}"#).unwrap();
        assert_eq!(p.other, Some(7));
    }

    #[test]
    fn test_rejects_fractional_negative_and_garbage() {
        assert!(serde_json::from_str::<Payload>(r#"{"id": 4.5}"#).is_err());
        assert!(serde_json::from_str::<Payload>(r#"{"id": -3}"#).is_err());
        assert!(serde_json::from_str::<Payload>(r#"{"id": "abc"}"#).is_err());
        assert!(parse_id("0").is_err());
    }
}
