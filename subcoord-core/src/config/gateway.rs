//! Payment processor settings.

use std::time::Duration;
use subcoord_sdk::signature::DEFAULT_SIGNATURE_TOLERANCE;
use url::Url;

/// How to reach the payment processor and authenticate its callbacks.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Processor API root. `None` selects the in-process sandbox.
    pub base_url: Option<Url>,
    /// Bearer token for outbound processor calls.
    pub api_key: String,
    /// HMAC key for inbound callback signatures.
    pub callback_secret: Box<[u8]>,
    /// Upper bound on the initiating charge request.
    pub initiate_timeout: Duration,
    /// Accepted clock skew for callback signatures, in seconds.
    pub signature_tolerance_secs: i64,
}

impl GatewayConfig {
    pub const DEFAULT_INITIATE_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base_url: Option<Url>, api_key: String, callback_secret: impl Into<Box<[u8]>>) -> Self {
        Self {
            base_url,
            api_key,
            callback_secret: callback_secret.into(),
            initiate_timeout: Self::DEFAULT_INITIATE_TIMEOUT,
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE,
        }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.callback_secret
    }
}
