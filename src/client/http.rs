use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::api::rest::identity::DRIVER_ID_HEADER;
use crate::client::ClaimClient;
use crate::error::AppError;
use crate::models::rpc::{ClaimOrderResponse, OrderRequest, RejectOrderResponse};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Talks to the `/claimOrder` and `/rejectOrder` callables over HTTP.
pub struct HttpClaimClient {
    http: reqwest::Client,
    base_url: String,
    driver_id: Uuid,
}

impl HttpClaimClient {
    pub fn new(base_url: &str, driver_id: Uuid, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            driver_id,
        })
    }

    async fn call<T: DeserializeOwned>(&self, callable: &str, order_id: Uuid) -> Result<T, AppError> {
        let url = format!("{}/{callable}", self.base_url);
        debug!(url = %url, order_id = %order_id, "calling");

        let response = self
            .http
            .post(&url)
            .header(DRIVER_ID_HEADER, self.driver_id.to_string())
            .json(&OrderRequest {
                order_id: Some(order_id.to_string()),
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| AppError::Internal(format!("malformed {callable} response: {err}")));
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => Err(AppError::from_code(&body.code, body.error)),
            Err(_) => Err(status_error(status)),
        }
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::DeadlineExceeded(format!("request timed out: {err}"))
    } else if err.is_connect() {
        AppError::Unavailable(format!("service unreachable: {err}"))
    } else {
        AppError::Internal(format!("request failed: {err}"))
    }
}

fn status_error(status: StatusCode) -> AppError {
    match status {
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
            AppError::DeadlineExceeded(format!("server answered {status}"))
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
            AppError::Unavailable(format!("server answered {status}"))
        }
        StatusCode::UNAUTHORIZED => AppError::Unauthenticated(format!("server answered {status}")),
        StatusCode::FORBIDDEN => AppError::PermissionDenied(format!("server answered {status}")),
        StatusCode::NOT_FOUND => AppError::NotFound(format!("server answered {status}")),
        _ => AppError::Internal(format!("server answered {status}")),
    }
}

#[async_trait]
impl ClaimClient for HttpClaimClient {
    async fn claim_order(&self, order_id: Uuid) -> Result<ClaimOrderResponse, AppError> {
        self.call("claimOrder", order_id).await
    }

    async fn reject_order(&self, order_id: Uuid) -> Result<RejectOrderResponse, AppError> {
        self.call("rejectOrder", order_id).await
    }
}
