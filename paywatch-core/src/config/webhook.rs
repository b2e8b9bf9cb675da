/// Merchant webhook delivery settings.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// HMAC key for the signature header. Unsigned when absent.
    pub secret: Option<String>,
    /// Delivery attempts per status change, at least 1.
    pub max_attempts: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            max_attempts: 8,
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
