//! Serde helpers for optional RFC 3339 timestamps.
//!
//! Servers disagree on timestamp precision and some omit the field entirely, so an unparseable
//! value deserializes to `None` instead of failing the whole response.

use serde::{Deserialize, Deserializer, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Deserialize an RFC 3339 formatted string into an `Option<OffsetDateTime>`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.and_then(|s| OffsetDateTime::parse(&s, &Rfc3339).ok()))
}

/// Serialize an `Option<OffsetDateTime>` into an RFC 3339 formatted string.
pub fn serialize<S>(datetime: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match datetime {
        Some(datetime) => {
            let s = datetime
                .format(&Rfc3339)
                .map_err(serde::ser::Error::custom)?;
            serializer.serialize_str(&s)
        }
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use time::OffsetDateTime;
    use time::macros::datetime;

    #[derive(Debug, Serialize, Deserialize)]
    struct Stamped {
        #[serde(default, with = "crate::utils::time")]
        at: Option<OffsetDateTime>,
    }

    #[test]
    fn parses_nanosecond_offsets() {
        let stamped: Stamped =
            serde_json::from_str(r#"{"at":"2024-05-06T18:54:01.234567891-07:00"}"#).unwrap();
        let at = stamped.at.unwrap();
        assert_eq!(at.date(), datetime!(2024-05-06 18:54:01 -7).date());
    }

    #[test]
    fn unparseable_or_missing_is_none() {
        let stamped: Stamped = serde_json::from_str(r#"{"at":"last tuesday"}"#).unwrap();
        assert!(stamped.at.is_none());
        let stamped: Stamped = serde_json::from_str(r#"{}"#).unwrap();
        assert!(stamped.at.is_none());
        let stamped: Stamped = serde_json::from_str(r#"{"at":null}"#).unwrap();
        assert!(stamped.at.is_none());
    }

    #[test]
    fn serializes_rfc3339() {
        let stamped = Stamped {
            at: Some(datetime!(2024-01-02 03:04:05 UTC)),
        };
        assert_eq!(
            serde_json::to_string(&stamped).unwrap(),
            r#"{"at":"2024-01-02T03:04:05Z"}"#
        );
    }
}
