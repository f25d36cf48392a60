use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Short-lived, single-use grant handed out after a successful login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    #[serde(default)]
    pub state: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
}

impl AuthorizationCode {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.expires_in)
    }
}
