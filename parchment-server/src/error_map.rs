//! Maps the core [`parchment_core::error::DocError`] taxonomy onto
//! [`r2e::prelude::AppError`] so every controller can answer with the
//! uniform `{status, error_code, message, recovery_strategy, details}`
//! body at the error's own status code.

use parchment_core::error::DocError;
use r2e::prelude::{AppError, StatusCode};

pub fn to_app_error(err: DocError) -> AppError {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    AppError::Custom { status, body: err.to_response_body() }
}
