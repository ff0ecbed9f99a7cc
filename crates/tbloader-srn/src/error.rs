//! Errors from serial number allocation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SrnError {
    #[error("no identity selected; call prepare() first")]
    NoIdentity,

    #[error("no serial numbers available")]
    Exhausted,

    #[error("reservation refused: {0}")]
    Reservation(String),

    #[error("invalid reservation: {0}")]
    InvalidReservation(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SrnError {
    pub fn reservation(msg: impl Into<String>) -> Self {
        Self::Reservation(msg.into())
    }

    pub fn invalid_reservation(msg: impl Into<String>) -> Self {
        Self::InvalidReservation(msg.into())
    }
}

pub type SrnResult<T> = Result<T, SrnError>;
