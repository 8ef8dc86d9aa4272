//! Outbound message model handed to the messaging collaborator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::user::DeliveryMethod;

/// Template selecting the rendered message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTemplate {
    OtpSignup,
    OtpLogin,
    OtpResend,
}

/// A message queued for delivery over SMS or email. Delivery is
/// at-least-once with eventual backoff; losses are recoverable because
/// OTP codes can be re-requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub template: MessageTemplate,
    pub delivery: DeliveryMethod,
    pub address: String,
    /// Template variables, e.g. the OTP code.
    pub vars: HashMap<String, String>,
}
