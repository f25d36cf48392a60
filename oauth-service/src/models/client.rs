use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    AuthorizationCode,
    Implicit,
    RefreshToken,
    Password,
}

impl GrantType {
    pub const ALL: [&'static str; 5] = [
        "client_credentials",
        "authorization_code",
        "implicit",
        "refresh_token",
        "password",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::Implicit => "implicit",
            GrantType::RefreshToken => "refresh_token",
            GrantType::Password => "password",
        }
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "implicit" => Ok(GrantType::Implicit),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "password" => Ok(GrantType::Password),
            _ => Err(format!("unknown grant type: {}", s)),
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
}

impl ResponseType {
    pub const ALL: [&'static str; 2] = ["code", "token"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::Token => "token",
        }
    }
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(ResponseType::Code),
            "token" => Ok(ResponseType::Token),
            _ => Err(format!("unknown response type: {}", s)),
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered OAuth2 client. `secret` holds the Argon2 hash and is empty for
/// public clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: String,
    #[serde(default)]
    pub secret: String,
    pub name: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<GrantType>,
    #[serde(default)]
    pub response_types: Vec<ResponseType>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Client ids derive from the name: lowercase, spaces replaced with `-`.
    pub fn id_from_name(name: &str) -> String {
        name.trim().to_lowercase().replace(' ', "-")
    }

    /// An empty list means every grant type is allowed.
    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.is_empty() || self.grant_types.contains(&grant)
    }

    /// An empty list means every response type is allowed.
    pub fn allows_response(&self, response: ResponseType) -> bool {
        self.response_types.is_empty() || self.response_types.contains(&response)
    }

    pub fn sanitize(&self) -> SanitizedClient {
        SanitizedClient {
            id: self.id.clone(),
            name: self.name.clone(),
            redirect_uris: self.redirect_uris.clone(),
            grant_types: self.grant_types.clone(),
            response_types: self.response_types.clone(),
            scopes: self.scopes.clone(),
            public: self.public,
            created_at: self.created_at,
        }
    }
}

/// Client view without the secret hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SanitizedClient {
    pub id: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<GrantType>,
    pub response_types: Vec<ResponseType>,
    pub scopes: Vec<String>,
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_derived_from_name() {
        assert_eq!(Client::id_from_name("Ops Console"), "ops-console");
        assert_eq!(Client::id_from_name("CLI"), "cli");
    }

    #[test]
    fn grant_type_round_trips_through_str() {
        for name in GrantType::ALL {
            let grant: GrantType = name.parse().unwrap();
            assert_eq!(grant.as_str(), name);
        }
        assert!("device_code".parse::<GrantType>().is_err());
    }
}
