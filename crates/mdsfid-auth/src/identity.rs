//! Normalized citizen identity.
//!
//! The identity backend is known to emit two payload shapes after a
//! successful validation:
//!
//! - **nested**: `{"id_user": "{\"run_ciudadano\": 1, \"dv_ciudadano\": \"9\"}"}`
//!   where `id_user` is a JSON-encoded string (or, from some deployments, an
//!   embedded object);
//! - **flat**: `{"run_ciudadano": 1, "dv_ciudadano": "9"}`.
//!
//! The nested form wins whenever `id_user` is present and truthy, even if it
//! then fails to yield a RUN. There is no fallback to the flat fields in
//! that case.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::AuthResult;
use crate::error::AuthError;

/// Field holding the nested identity document.
const ID_USER_FIELD: &str = "id_user";
/// National identifier (RUN) field.
const RUN_FIELD: &str = "run_ciudadano";
/// Check digit (DV) field.
const DV_FIELD: &str = "dv_ciudadano";

/// Verified citizen identity.
///
/// A record always carries a non-zero national identifier. The only way to
/// obtain one is [`IdentityRecord::from_payload`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityRecord {
    national_id: u64,
    check_digit: String,
    raw_payload: Map<String, Value>,
}

impl IdentityRecord {
    /// Normalizes a validated backend payload into an identity record.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::IdentityNotFound` if no non-zero national
    /// identifier resolves from either shape.
    pub fn from_payload(payload: Map<String, Value>) -> AuthResult<Self> {
        let (run, dv) = match payload.get(ID_USER_FIELD).filter(|v| is_truthy(v)) {
            Some(nested) => extract_nested(nested),
            None => (
                payload.get(RUN_FIELD).and_then(parse_run),
                payload.get(DV_FIELD).map(stringify_dv).unwrap_or_default(),
            ),
        };

        let national_id = run.ok_or(AuthError::IdentityNotFound)?;

        Ok(Self {
            national_id,
            check_digit: dv,
            raw_payload: payload,
        })
    }

    /// National identifier (RUN).
    #[must_use]
    pub fn national_id(&self) -> u64 {
        self.national_id
    }

    /// Check digit (DV). Empty when the backend omitted it.
    #[must_use]
    pub fn check_digit(&self) -> &str {
        &self.check_digit
    }

    /// Every field returned by the identity backend.
    #[must_use]
    pub fn raw_payload(&self) -> &Map<String, Value> {
        &self.raw_payload
    }

    #[must_use]
    pub fn into_raw_payload(self) -> Map<String, Value> {
        self.raw_payload
    }

    /// Renders the identity as `RUN-DV`, or just the RUN when the check
    /// digit is missing.
    #[must_use]
    pub fn formatted_run(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for IdentityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.check_digit.is_empty() {
            write!(f, "{}", self.national_id)
        } else {
            write!(f, "{}-{}", self.national_id, self.check_digit)
        }
    }
}

fn extract_nested(nested: &Value) -> (Option<u64>, String) {
    let decoded = match nested {
        Value::String(raw) => serde_json::from_str::<Value>(raw).ok(),
        Value::Object(_) => Some(nested.clone()),
        _ => None,
    };

    match decoded {
        Some(Value::Object(fields)) => (
            fields.get(RUN_FIELD).and_then(parse_run),
            fields.get(DV_FIELD).map(stringify_dv).unwrap_or_default(),
        ),
        _ => {
            tracing::warn!("id_user field is not a JSON object; identity unresolved");
            (None, String::new())
        }
    }
}

/// Accepts a positive integer, a float without fractional part or a string
/// of ASCII digits.
fn parse_run(value: &Value) -> Option<u64> {
    let run = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f > 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    };
    run.filter(|&run| run != 0)
}

fn stringify_dv(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Loose truthiness: null, false, 0, "", "0", [] and {} are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
