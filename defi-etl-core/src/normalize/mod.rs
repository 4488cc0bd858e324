//! Raw payload → canonical records.
//!
//! Normalizers are pure functions over [`RawPayload`]s. A record that fails
//! validation is skipped and reported in [`Normalized::rejected`]. A payload
//! whose overall shape is wrong fails a single-payload dataset; in datasets
//! merged from many payloads it is rejected on its own. Snapshot
//! dates come from the payload, never from the clock, and every output is
//! fully ordered, so the same input always yields the same records.

pub mod categories;
pub mod chains;
pub mod dex;
pub mod global;
pub mod history;
pub mod markets;
pub mod protocols;
pub mod stablecoins;
pub mod tvl;

use crate::raw::RawPayload;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

pub use categories::normalize_categories;
pub use chains::normalize_chains;
pub use dex::normalize_dex_pairs;
pub use global::normalize_global;
pub use history::normalize_token_history;
pub use markets::normalize_markets;
pub use protocols::normalize_protocols;
pub use stablecoins::normalize_stablecoins;
pub use tvl::normalize_protocol_tvl;

/// One record rejected during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{dataset} record #{index}: field '{field}' {reason}")]
pub struct ValidationError {
    pub dataset: String,
    pub index: usize,
    pub field: String,
    pub reason: String,
}

/// Failure of a whole dataset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("{dataset}: unexpected payload shape: {reason}")]
    Shape { dataset: String, reason: String },

    #[error("{dataset}: no valid records ({rejected} rejected)")]
    NoValidRecords { dataset: String, rejected: usize },
}

/// Output of one normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub rejected: Vec<ValidationError>,
}

impl<T> Normalized<T> {
    pub fn new(records: Vec<T>, rejected: Vec<ValidationError>) -> Self {
        Self { records, rejected }
    }

    /// Fail if nothing survived validation.
    pub fn non_empty(self, dataset: &str) -> Result<Self, NormalizeError> {
        if self.records.is_empty() {
            return Err(NormalizeError::NoValidRecords {
                dataset: dataset.to_string(),
                rejected: self.rejected.len(),
            });
        }
        Ok(self)
    }
}

/// Collects rejections and logs each one once.
#[derive(Debug, Default)]
pub(crate) struct Rejections(Vec<ValidationError>);

impl Rejections {
    pub(crate) fn push(&mut self, err: ValidationError) {
        warn!(dataset = %err.dataset, index = err.index, field = %err.field, reason = %err.reason, "skipping invalid record");
        self.0.push(err);
    }

    /// Drop one payload of a merged dataset. It counts as a single rejection
    /// and its siblings are still normalized.
    pub(crate) fn skip_payload(&mut self, err: NormalizeError) {
        let (dataset, reason) = match err {
            NormalizeError::Shape { dataset, reason } => (dataset, reason),
            NormalizeError::NoValidRecords { dataset, rejected } => {
                (dataset, format!("has no valid records ({rejected} rejected)"))
            }
        };
        self.push(ValidationError {
            dataset,
            index: 0,
            field: "payload".to_string(),
            reason,
        });
    }

    pub(crate) fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }
}

/// Dataset label used in errors: the payload's file stem.
pub(crate) fn label(payload: &RawPayload) -> String {
    payload.key().file_stem()
}

/// The payload's data as an array, or the array under `field`.
pub(crate) fn array_at<'a>(
    payload: &'a RawPayload,
    field: Option<&str>,
) -> Result<&'a [Value], NormalizeError> {
    let value = match field {
        Some(f) => payload.data.get(f).unwrap_or(&Value::Null),
        None => &payload.data,
    };
    match value {
        Value::Array(items) => Ok(items),
        // DexScreener answers "no results" with `"pairs": null`
        Value::Null if field.is_some() => Ok(&[]),
        other => Err(NormalizeError::Shape {
            dataset: label(payload),
            reason: format!(
                "expected array{}, found {}",
                field.map(|f| format!(" at '{f}'")).unwrap_or_default(),
                kind(other)
            ),
        }),
    }
}

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Interpret a JSON number, or a string holding one, as a finite f64.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Field access on one JSON object with errors tagged by dataset and index.
pub(crate) struct Fields<'a> {
    dataset: &'a str,
    index: usize,
    obj: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// Wrap `value`, rejecting anything that is not an object.
    pub(crate) fn of(dataset: &'a str, index: usize, value: &'a Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(obj) => Ok(Self { dataset, index, obj }),
            other => Err(ValidationError {
                dataset: dataset.to_string(),
                index,
                field: "<record>".to_string(),
                reason: format!("expected object, found {}", kind(other)),
            }),
        }
    }

    pub(crate) fn error(&self, field: &str, reason: impl Into<String>) -> ValidationError {
        ValidationError {
            dataset: self.dataset.to_string(),
            index: self.index,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Follow a dotted path (`liquidity.usd`).
    pub(crate) fn get(&self, path: &str) -> Option<&'a Value> {
        let mut parts = path.split('.');
        let mut current = self.obj.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub(crate) fn require_str(&self, path: &str) -> Result<String, ValidationError> {
        match self.get(path) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(Value::String(_)) => Err(self.error(path, "is empty")),
            None | Some(Value::Null) => Err(self.error(path, "is missing")),
            Some(other) => Err(self.error(path, format!("expected string, found {}", kind(other)))),
        }
    }

    pub(crate) fn optional_str(&self, path: &str) -> Option<String> {
        match self.get(path) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub(crate) fn require_number(&self, path: &str) -> Result<f64, ValidationError> {
        match self.get(path) {
            None | Some(Value::Null) => Err(self.error(path, "is missing")),
            Some(v) => as_number(v)
                .ok_or_else(|| self.error(path, format!("expected number, found {}", kind(v)))),
        }
    }

    /// Required and `>= 0`.
    pub(crate) fn require_non_negative(&self, path: &str) -> Result<f64, ValidationError> {
        let n = self.require_number(path)?;
        if n < 0.0 {
            return Err(self.error(path, format!("is negative ({n})")));
        }
        Ok(n)
    }

    /// Absent or null is `None`; present but malformed is an error.
    pub(crate) fn optional_number(&self, path: &str) -> Result<Option<f64>, ValidationError> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => as_number(v)
                .map(Some)
                .ok_or_else(|| self.error(path, format!("expected number, found {}", kind(v)))),
        }
    }

    /// Optional, but `>= 0` when present.
    pub(crate) fn optional_non_negative(&self, path: &str) -> Result<Option<f64>, ValidationError> {
        match self.optional_number(path)? {
            Some(n) if n < 0.0 => Err(self.error(path, format!("is negative ({n})"))),
            other => Ok(other),
        }
    }

    pub(crate) fn optional_u32(&self, path: &str) -> Option<u32> {
        self.get(path)
            .and_then(as_number)
            .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= f64::from(u32::MAX))
            .map(|n| n as u32)
    }

    pub(crate) fn string_list(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}
