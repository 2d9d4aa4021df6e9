use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Token lifetime in minutes.
/// Platform-issued tokens expire after ~30 minutes of inactivity.
const TOKEN_EXPIRY_MINUTES: i64 = 30;

/// Buffer before expiry at which a refresh should be requested (5
/// minutes), so in-flight requests never race the cutoff.
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// An authenticated session as issued by the auth provider.
///
/// The sync layer never inspects the token; it only forwards it to the
/// RPC client and tracks when a refresh is due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    /// Realm address of the signed-in account.
    pub address: String,
    #[serde(rename = "issuedAt")]
    pub issued_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn new(token: String, address: String) -> Self {
        Self {
            token,
            address,
            issued_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        let expiry = self.issued_at + Duration::minutes(TOKEN_EXPIRY_MINUTES);
        Utc::now() > expiry
    }

    /// Whether the session is close enough to expiry that a refresh
    /// should happen now.
    pub fn needs_refresh(&self) -> bool {
        let refresh_at = self.issued_at
            + Duration::minutes(TOKEN_EXPIRY_MINUTES - TOKEN_REFRESH_BUFFER_MINUTES);
        Utc::now() > refresh_at
    }

    /// Minutes remaining until expiry, clamped at zero (for display).
    pub fn minutes_until_expiry(&self) -> i64 {
        let expiry = self.issued_at + Duration::minutes(TOKEN_EXPIRY_MINUTES);
        (expiry - Utc::now()).num_minutes().max(0)
    }
}

// ============================================================================
// Tests
// ============================================================================
