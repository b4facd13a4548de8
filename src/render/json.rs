use serde::Serialize;

use crate::error::YeoshinError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, YeoshinError> {
    Ok(serde_json::to_string_pretty(value)?)
}
