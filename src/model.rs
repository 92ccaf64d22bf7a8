use serde_json::{Map, Value};

/// Free-form per-repository detail record, serialized verbatim into the output artifact.
pub type DetailRecord = Map<String, Value>;

/// Well-known version-control system identifiers.
pub mod vcs {
    pub const GIT: &str = "git";
    pub const SVN: &str = "svn";
    pub const HG: &str = "hg";
}

/// Inserts `default` under `field` unless the record already carries that field.
///
/// Returns `true` when the field was inserted.
pub fn ensure_field(record: &mut DetailRecord, field: &str, default: Value) -> bool {
    if record.contains_key(field) {
        return false;
    }
    record.insert(field.to_string(), default);
    true
}

/// Adds `by` to the counter `field`, initializing it to zero first if absent.
///
/// An existing value is never discarded: a float counter stays a float and
/// keeps accumulating (see [`add_values`]). Returns the new value.
pub fn increment_counter(record: &mut DetailRecord, field: &str, by: i64) -> Value {
    let next = add_values(record.get(field), &Value::from(by));
    record.insert(field.to_string(), next.clone());
    next
}

/// Numeric sum used for counter merges: integer arithmetic when both sides are
/// integers, floating point otherwise. Non-numeric sides count as zero.
pub fn add_values(current: Option<&Value>, delta: &Value) -> Value {
    let current = current.cloned().unwrap_or(Value::from(0));
    match (current.as_i64(), delta.as_i64()) {
        (Some(a), Some(b)) => Value::from(a + b),
        _ => {
            let a = current.as_f64().unwrap_or(0.0);
            let b = delta.as_f64().unwrap_or(0.0);
            Value::from(a + b)
        }
    }
}
