use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Issued access token, optionally paired with a refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub expires_in: i64,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.expires_in)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Whole seconds left before expiry, never negative.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_relative_to_creation() {
        let created_at = Utc::now();
        let token = AccessToken {
            access_token: "a".repeat(43),
            refresh_token: None,
            client_id: "ops-console".to_string(),
            expires_in: 60,
            scopes: vec!["users".to_string()],
            created_at,
        };

        assert!(!token.is_expired(created_at + Duration::seconds(59)));
        assert!(token.is_expired(created_at + Duration::seconds(60)));
        assert_eq!(token.remaining_seconds(created_at + Duration::seconds(15)), 45);
        assert_eq!(token.remaining_seconds(created_at + Duration::seconds(600)), 0);
    }
}
