use chrono::TimeDelta;

use crate::engine::EngineError;

/// Maximum length of short free-text fields (purpose, destination, names).
pub const MAX_TEXT_LEN: usize = 200;

/// Maximum length of notes and descriptions.
pub const MAX_NOTES_LEN: usize = 4_000;

/// Maximum number of passengers on one reservation.
pub const MAX_PASSENGERS: u32 = 100;

/// Longest reservation window that can be booked in one piece.
pub const MAX_RESERVATION_DAYS: i64 = 90;

/// Longest window accepted by availability queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

/// Longest date range accepted by reports.
pub const MAX_REPORT_RANGE_DAYS: i64 = 3_660;

/// Photos attached to one damage record.
pub const MAX_PHOTOS_PER_RECORD: usize = 32;

pub fn max_reservation_span() -> TimeDelta {
    TimeDelta::days(MAX_RESERVATION_DAYS)
}

pub fn max_query_window() -> TimeDelta {
    TimeDelta::days(MAX_QUERY_WINDOW_DAYS)
}

/// Trim a mandatory free-text field and check its length.
pub(crate) fn required_text(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(EngineError::validation(format!(
            "{field} longer than {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional free-text field; blank becomes `None`.
pub(crate) fn optional_text(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> Result<Option<String>, EngineError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(trimmed) if trimmed.chars().count() > max => Err(EngineError::validation(format!(
            "{field} longer than {max} characters"
        ))),
        Some(trimmed) => Ok(Some(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_rejects_blank() {
        assert_eq!(required_text("purpose", "  Audit ", MAX_TEXT_LEN).unwrap(), "Audit");
        assert!(matches!(
            required_text("purpose", "   ", MAX_TEXT_LEN),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn length_is_counted_in_characters() {
        let exact = "č".repeat(MAX_TEXT_LEN);
        assert!(required_text("destination", &exact, MAX_TEXT_LEN).is_ok());
        let over = "č".repeat(MAX_TEXT_LEN + 1);
        assert!(required_text("destination", &over, MAX_TEXT_LEN).is_err());
    }

    #[test]
    fn optional_text_blank_is_none() {
        assert_eq!(optional_text("notes", Some("  ".into()), MAX_NOTES_LEN).unwrap(), None);
        assert_eq!(optional_text("notes", None, MAX_NOTES_LEN).unwrap(), None);
        assert_eq!(
            optional_text("notes", Some(" keys at desk ".into()), MAX_NOTES_LEN).unwrap(),
            Some("keys at desk".into())
        );
        assert!(optional_text("notes", Some("x".repeat(MAX_NOTES_LEN + 1)), MAX_NOTES_LEN).is_err());
    }
}
