//! Timestamp utilities

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage in a TEXT column
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a timestamp previously written by [`to_db`]
pub fn from_db(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse an optional timestamp column
pub fn from_db_opt(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| from_db(column, &v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_db_round_trip_preserves_instant() {
        let ts = now();
        let parsed = from_db("created_at", &to_db(&ts)).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_from_db_rejects_garbage() {
        let err = from_db("created_at", "yesterday").unwrap_err();
        assert!(err.to_string().contains("created_at"));
    }

    #[test]
    fn test_from_db_opt_none() {
        assert_eq!(from_db_opt("resolved_at", None).unwrap(), None);
    }
}
