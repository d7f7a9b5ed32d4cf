//! PIN and token gate for device registration.
//!
//! Both secrets are process-wide and live only in memory. Changing the PIN
//! always mints a new token, so links handed out earlier stop working.

use crate::error::{DropError, Result};
use rand::Rng;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Number of digits in a PIN
pub const PIN_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub pin: String,
    pub token: String,
}

pub struct AuthGate {
    credentials: RwLock<Credentials>,
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthGate {
    /// Gate with a random PIN and a fresh token
    pub fn new() -> Self {
        Self::with_credentials(Credentials {
            pin: generate_pin(),
            token: generate_token(),
        })
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
        }
    }

    /// True when either the token or the PIN matches the current secrets.
    pub async fn authenticate(&self, token: Option<&str>, pin: Option<&str>) -> bool {
        let current = self.credentials.read().await;
        let token_ok = token.is_some_and(|t| t == current.token);
        let pin_ok = pin.is_some_and(|p| p == current.pin);
        token_ok || pin_ok
    }

    pub async fn pin(&self) -> String {
        self.credentials.read().await.pin.clone()
    }

    pub async fn token(&self) -> String {
        self.credentials.read().await.token.clone()
    }

    /// Replace the PIN and rotate the token in a single step.
    ///
    /// A malformed PIN leaves both secrets untouched.
    pub async fn change_pin(&self, new_pin: &str) -> Result<Credentials> {
        validate_pin(new_pin)?;

        let mut current = self.credentials.write().await;
        current.pin = new_pin.to_string();
        current.token = generate_token();
        tracing::info!("Connection PIN changed, security token rotated");
        Ok(current.clone())
    }
}

pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.len() == PIN_LEN && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(DropError::validation("PIN must be 4 digits."))
    }
}

/// Random PIN in 1000..=9999
pub fn generate_pin() -> String {
    rand::rng().random_range(1000..=9999u32).to_string()
}

/// Full UUID entropy (128 bits), hex without dashes
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}
