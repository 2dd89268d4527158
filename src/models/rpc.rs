//! Request and response bodies of the driver-facing callables.

use serde::{Deserialize, Serialize};

use crate::engine::claim::ClaimOutcome;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOrderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_taken: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectOrderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ClaimOutcome> for ClaimOrderResponse {
    fn from(outcome: ClaimOutcome) -> Self {
        match outcome {
            ClaimOutcome::Success => Self {
                success: true,
                already_taken: None,
                message: Some("order claimed".to_string()),
            },
            ClaimOutcome::AlreadyTaken => Self {
                success: false,
                already_taken: Some(true),
                message: Some("order already taken by another driver".to_string()),
            },
        }
    }
}

impl RejectOrderResponse {
    pub fn rejected() -> Self {
        Self {
            success: true,
            message: Some("order rejected".to_string()),
        }
    }
}
