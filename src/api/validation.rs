use thiserror::Error;

use super::models::{DispatchRequest, SettingUpdate};

pub const MAX_SETTING_KEY_LEN: usize = 100;
pub const MAX_TASK_ID_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum RequestValidationError {
    #[error("setting key must not be empty")]
    EmptyKey,
    #[error("setting key exceeds {MAX_SETTING_KEY_LEN} characters")]
    KeyTooLong,
    #[error("setting key must not contain whitespace or control characters")]
    InvalidKeyCharacters,
    #[error("task_id must be between 1 and {MAX_TASK_ID_LEN} characters")]
    InvalidTaskId,
    #[error("payload must be a JSON object")]
    InvalidTaskPayload,
}

pub fn validate_setting(key: &str, _update: &SettingUpdate) -> Result<(), RequestValidationError> {
    if key.is_empty() {
        return Err(RequestValidationError::EmptyKey);
    }
    if key.chars().count() > MAX_SETTING_KEY_LEN {
        return Err(RequestValidationError::KeyTooLong);
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RequestValidationError::InvalidKeyCharacters);
    }
    Ok(())
}

pub fn validate_dispatch(request: &DispatchRequest) -> Result<(), RequestValidationError> {
    if request.task_id.is_empty() || request.task_id.chars().count() > MAX_TASK_ID_LEN {
        return Err(RequestValidationError::InvalidTaskId);
    }
    if !request.payload.is_object() {
        return Err(RequestValidationError::InvalidTaskPayload);
    }
    Ok(())
}
