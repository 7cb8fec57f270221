use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, PartialEq, Eq)]
pub enum Patch<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, Patch::Omitted)
    }
}

pub fn classify_patch<T: DeserializeOwned>(body: &Value, field: &str) -> Result<Patch<T>, String> {
    match body.get(field) {
        None => Ok(Patch::Omitted),
        Some(Value::Null) => Ok(Patch::Null),
        Some(value) => serde_json::from_value(value.clone())
            .map(Patch::Value)
            .map_err(|err| format!("invalid `{field}`: {err}")),
    }
}

pub fn required_text(body: &Value, field: &str) -> Result<Option<String>, String> {
    match classify_patch::<String>(body, field)? {
        Patch::Omitted => Ok(None),
        Patch::Null => Err(format!("`{field}` cannot be null")),
        Patch::Value(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(format!("`{field}` must not be empty"));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

pub fn nullable_text(body: &Value, field: &str) -> Result<Patch<String>, String> {
    Ok(match classify_patch::<String>(body, field)? {
        Patch::Value(value) if value.trim().is_empty() => Patch::Null,
        Patch::Value(value) => Patch::Value(value.trim().to_string()),
        other => other,
    })
}

pub fn check_length(field: &str, value: &str, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len > max {
        return Err(format!("`{field}` is {len} characters long, at most {max} allowed"));
    }
    Ok(())
}
