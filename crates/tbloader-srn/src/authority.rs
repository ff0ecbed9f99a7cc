//! The remote service that grants blocks of serial numbers.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::allocation::Reservation;
use crate::error::{SrnError, SrnResult};

#[async_trait]
pub trait ReservationAuthority: Send + Sync {
    /// Ask for `count` consecutive numbers.
    async fn reserve(&self, count: u32) -> SrnResult<Reservation>;
}

#[derive(Debug, Deserialize)]
struct ReserveResponse {
    result: Option<ReserveResult>,
}

#[derive(Debug, Deserialize)]
struct ReserveResult {
    status: String,
    id: Option<u32>,
    hexid: Option<String>,
    begin: Option<u32>,
    end: Option<u32>,
}

impl ReserveResponse {
    fn into_reservation(self) -> SrnResult<Reservation> {
        let result = self
            .result
            .ok_or_else(|| SrnError::reservation("response has no result"))?;
        if result.status != "ok" {
            return Err(SrnError::reservation(format!("status {}", result.status)));
        }
        match (result.id, result.hexid, result.begin, result.end) {
            (Some(id), Some(hexid), Some(begin), Some(end)) => Ok(Reservation { id, hexid, begin, end }),
            _ => Err(SrnError::invalid_reservation("incomplete reservation")),
        }
    }
}

/// `GET {endpoint}/reserve?n=N`, authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpReservationAuthority {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpReservationAuthority {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReservationAuthority for HttpReservationAuthority {
    async fn reserve(&self, count: u32) -> SrnResult<Reservation> {
        let url = format!("{}/reserve", self.endpoint);
        let mut request = self.client.get(&url);
        if count > 0 {
            request = request.query(&[("n", count)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(url = %url, count, "requesting serial number block");
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SrnError::reservation(format!("http status {}", response.status())));
        }
        let body: ReserveResponse = serde_json::from_slice(&response.bytes().await?)?;
        let reservation = body.into_reservation()?;
        tracing::info!(
            id = reservation.id,
            begin = reservation.begin,
            end = reservation.end,
            "reserved serial number block"
        );
        Ok(reservation)
    }
}
