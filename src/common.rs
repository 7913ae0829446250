use serde::{Deserialize, Deserializer};

use crate::error::ApiError;

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl Pagination {
    /// Clamp to `1..=MAX_PAGE_SIZE` and a non-negative offset.
    pub fn normalized(self) -> Self {
        Self {
            limit: self.limit.clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.max(0),
        }
    }
}

/// Lets PATCH bodies tell "absent" (`None`) from explicit `null` (`Some(None)`).
/// Use with `#[serde(default, deserialize_with = "crate::common::nullable")]`.
pub fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// [`nullable`] for RFC 3339 timestamps.
pub fn nullable_datetime<'de, D>(
    deserializer: D,
) -> Result<Option<Option<time::OffsetDateTime>>, D::Error>
where
    D: Deserializer<'de>,
{
    time::serde::rfc3339::option::deserialize(deserializer).map(Some)
}

/// Escapes `%`, `_` and `\` so user input matches literally inside `ILIKE`.
pub fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Trims `value` and checks its length in characters.
pub fn required_text(field: &str, value: &str, max: usize) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(ApiError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Like [`required_text`] but blank input becomes `None`.
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => required_text(field, v, max).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        note: Option<Option<String>>,
    }

    #[test]
    fn nullable_distinguishes_absent_from_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.note, None);
        let null: Patch = serde_json::from_str(r#"{"note":null}"#).unwrap();
        assert_eq!(null.note, Some(None));
        let set: Patch = serde_json::from_str(r#"{"note":"x"}"#).unwrap();
        assert_eq!(set.note, Some(Some("x".into())));
    }

    #[test]
    fn pagination_is_clamped() {
        let p = Pagination { limit: 10_000, offset: -5 }.normalized();
        assert_eq!((p.limit, p.offset), (MAX_PAGE_SIZE, 0));
        let p = Pagination { limit: 0, offset: 3 }.normalized();
        assert_eq!((p.limit, p.offset), (1, 3));
        let p: Pagination = serde_json::from_str("{}").unwrap();
        assert_eq!((p.limit, p.offset), (20, 0));
    }

    #[derive(Debug, Deserialize)]
    struct DuePatch {
        #[serde(default, deserialize_with = "nullable_datetime")]
        due: Option<Option<time::OffsetDateTime>>,
    }

    #[test]
    fn nullable_datetime_parses_rfc3339() {
        let absent: DuePatch = serde_json::from_str("{}").unwrap();
        assert!(absent.due.is_none());
        let null: DuePatch = serde_json::from_str(r#"{"due":null}"#).unwrap();
        assert_eq!(null.due, Some(None));
        let set: DuePatch = serde_json::from_str(r#"{"due":"2024-05-01T10:00:00Z"}"#).unwrap();
        assert_eq!(set.due.unwrap().unwrap().unix_timestamp(), 1_714_557_600);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("milk"), "%milk%");
        assert_eq!(like_pattern("50%_off"), r"%50\%\_off%");
    }

    #[test]
    fn text_validation() {
        assert_eq!(required_text("title", "  hi ", 10).unwrap(), "hi");
        assert!(required_text("title", "   ", 10).is_err());
        assert!(required_text("title", "abcdef", 5).is_err());
        assert_eq!(optional_text("notes", Some("  "), 5).unwrap(), None);
        assert_eq!(optional_text("notes", None, 5).unwrap(), None);
        assert!(optional_text("notes", Some("toolong"), 5).is_err());
    }
}
