use chrono::NaiveDate;
use serde_json::json;

use crate::ipc::error::err;

/// Error carried out of a handler body; turned into the wire error object
/// at the dispatch boundary.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.details = Some(json!({ "table": table }));
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Optional string param; whitespace-only values collapse to None.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Requested page number for list endpoints; absent or invalid means 1.
pub fn get_page(params: &serde_json::Value) -> usize {
    params
        .get("page")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(1)
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_string_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    Ok(raw
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect())
}

/// Dates travel as YYYY-MM-DD strings; validate and normalize here so the
/// stored text sorts chronologically.
pub fn parse_date(raw: &str, key: &str) -> Result<String, HandlerErr> {
    let trimmed = raw.trim();
    match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        Ok(d) => Ok(d.format("%Y-%m-%d").to_string()),
        Err(_) => Err(HandlerErr::bad_params(format!(
            "{} must be YYYY-MM-DD",
            key
        ))),
    }
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    parse_date(&raw, key)
}

pub fn get_optional_date(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match get_optional_str(params, key) {
        Some(raw) => parse_date(&raw, key).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_defaults_to_one() {
        assert_eq!(get_page(&json!({})), 1);
        assert_eq!(get_page(&json!({ "page": 4 })), 4);
        assert_eq!(get_page(&json!({ "page": "x" })), 1);
    }

    #[test]
    fn dates_are_validated_and_normalized() {
        assert_eq!(parse_date("2026-02-03", "date").expect("valid"), "2026-02-03");
        assert!(parse_date("2026-2-30", "date").is_err());
        assert!(parse_date("03/02/2026", "date").is_err());
    }

    #[test]
    fn optional_str_collapses_whitespace_to_none() {
        assert_eq!(get_optional_str(&json!({ "q": "  " }), "q"), None);
        assert_eq!(
            get_optional_str(&json!({ "q": " mar " }), "q"),
            Some("mar".to_string())
        );
    }
}
