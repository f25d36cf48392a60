use std::sync::Arc;

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use service_core::error::{AppError, ErrorKind};

use super::error::{redirect_url, OAuthError, OAuthErrorCode, RedirectTarget};
use super::pkce::{self, CodeChallengeMethod};
use super::scope;
use super::storage::{AccessData, AuthorizeData, OAuthStorage};
use crate::config::ProtocolConfig;
use crate::models::{Client, GrantType, ResponseType};
use crate::services::ClientRegistry;
use crate::utils::{generate_token, SharedClock};

pub const TOKEN_TYPE: &str = "Bearer";

/// Lifetime of tokens issued by the implicit grant.
const IMPLICIT_EXPIRATION_SECONDS: i64 = i32::MAX as i64;

/// Query or form parameters of `/oauth2/authorize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizeParams {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// A validated authorize request. `authorized` is flipped by the caller once
/// the resource owner has approved it.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub client: Client,
    pub response_type: ResponseType,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub authorized: bool,
}

impl AuthorizeRequest {
    fn redirect_target(&self) -> RedirectTarget {
        RedirectTarget {
            uri: self.redirect_uri.clone(),
            state: self.state.clone(),
            fragment: self.response_type == ResponseType::Token,
        }
    }
}

/// Form parameters of `/oauth2/token`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenParams {
    pub grant_type: String,
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: String,
    pub refresh_token: String,
    pub scope: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Form parameters of `/oauth2/revoke`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RevokeParams {
    pub token: String,
    pub token_type_hint: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Client identity presented on the token and revoke endpoints.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl ClientCredentials {
    /// HTTP Basic credentials take precedence over the form fields.
    pub fn from_request(
        headers: &HeaderMap,
        form_id: &str,
        form_secret: &str,
    ) -> Result<Self, OAuthError> {
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            let value = value
                .to_str()
                .map_err(|_| OAuthError::invalid_request("malformed Authorization header"))?;
            if let Some(encoded) = value.strip_prefix("Basic ") {
                return Self::from_basic(encoded.trim());
            }
        }

        if form_id.is_empty() {
            return Err(OAuthError::invalid_client("client authentication required"));
        }
        Ok(Self {
            client_id: form_id.to_string(),
            client_secret: form_secret.to_string(),
        })
    }

    fn from_basic(encoded: &str) -> Result<Self, OAuthError> {
        let malformed = || OAuthError::invalid_client("malformed basic credentials");

        let decoded = STANDARD.decode(encoded).map_err(|_| malformed())?;
        let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
        let (id, secret) = decoded.split_once(':').ok_or_else(malformed)?;

        let client_id = urlencoding::decode(id).map_err(|_| malformed())?;
        let client_secret = urlencoding::decode(secret).map_err(|_| malformed())?;
        if client_id.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            client_id: client_id.into_owned(),
            client_secret: client_secret.into_owned(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum AccessGrant {
    AuthorizationCode(AuthorizeData),
    RefreshToken(AccessData),
    ClientCredentials,
}

/// A validated token request, finished once `authorized` is set.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub client: Client,
    pub grant: AccessGrant,
    pub scopes: Vec<String>,
    pub authorized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub client_id: String,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

/// Maps a storage error: missing or malformed keys become the given protocol
/// error, everything else is a server error.
fn lookup_failure(err: AppError, missing: impl FnOnce() -> OAuthError) -> OAuthError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::ValidationError => missing(),
        _ => OAuthError::server_error(err),
    }
}

/// A record the store refuses as malformed came from the caller's input.
fn save_failure(err: AppError) -> OAuthError {
    match err.kind() {
        ErrorKind::ValidationError => OAuthError::invalid_request(err.to_string()),
        _ => OAuthError::server_error(err),
    }
}

/// RFC 6749 request validation and code/token minting on top of [`OAuthStorage`].
#[derive(Clone)]
pub struct ProtocolEngine {
    storage: Arc<dyn OAuthStorage>,
    config: ProtocolConfig,
    clock: SharedClock,
}

impl ProtocolEngine {
    pub fn new(storage: Arc<dyn OAuthStorage>, config: ProtocolConfig, clock: SharedClock) -> Self {
        Self {
            storage,
            config,
            clock,
        }
    }

    pub fn storage(&self) -> &Arc<dyn OAuthStorage> {
        &self.storage
    }

    /// Validates an authorize request. Until the redirect URI is known to be
    /// registered, errors are rendered to the user agent instead of redirected.
    pub async fn handle_authorize_request(
        &self,
        params: &AuthorizeParams,
    ) -> Result<AuthorizeRequest, OAuthError> {
        if params.client_id.is_empty() {
            return Err(OAuthError::invalid_request("client_id is required"));
        }

        let client = self.storage.get_client(&params.client_id).await.map_err(|e| {
            lookup_failure(e, || OAuthError::unauthorized_client("unknown client"))
        })?;

        let redirect_uri = if params.redirect_uri.is_empty() {
            client
                .redirect_uris
                .first()
                .cloned()
                .ok_or_else(|| OAuthError::invalid_request("client has no redirect_uri"))?
        } else if client.redirect_uris.iter().any(|u| u == &params.redirect_uri) {
            params.redirect_uri.clone()
        } else {
            return Err(OAuthError::invalid_request(
                "redirect_uri does not match a registered URI",
            ));
        };

        let response_type = params.response_type.parse::<ResponseType>();
        let target = RedirectTarget {
            uri: redirect_uri.clone(),
            state: params.state.clone(),
            fragment: response_type == Ok(ResponseType::Token),
        };
        let reject = |code: OAuthErrorCode, description: &str| {
            OAuthError::new(code, description).with_redirect(target.clone())
        };

        let response_type = response_type.map_err(|_| {
            reject(
                OAuthErrorCode::UnsupportedResponseType,
                "response_type must be code or token",
            )
        })?;
        if !client.allows_response(response_type) {
            return Err(reject(
                OAuthErrorCode::UnauthorizedClient,
                "client may not use this response_type",
            ));
        }

        let scopes = self
            .resolve_scopes(&client.scopes, &params.scope)
            .map_err(|e| e.with_redirect(target.clone()))?;

        let (code_challenge, code_challenge_method) = if params.code_challenge.is_empty() {
            if self.config.require_pkce_for_public_clients
                && client.public
                && response_type == ResponseType::Code
            {
                return Err(reject(
                    OAuthErrorCode::InvalidRequest,
                    "code_challenge is required for public clients",
                ));
            }
            (None, None)
        } else {
            let method = if params.code_challenge_method.is_empty() {
                CodeChallengeMethod::default()
            } else {
                params
                    .code_challenge_method
                    .parse::<CodeChallengeMethod>()
                    .map_err(|e| reject(OAuthErrorCode::InvalidRequest, &e.to_string()))?
            };
            pkce::validate_challenge(&params.code_challenge)
                .map_err(|e| reject(OAuthErrorCode::InvalidRequest, &e.to_string()))?;
            (Some(params.code_challenge.clone()), Some(method))
        };

        Ok(AuthorizeRequest {
            client,
            response_type,
            redirect_uri,
            scopes,
            state: params.state.clone(),
            code_challenge,
            code_challenge_method,
            authorized: false,
        })
    }

    /// Mints a code or, for implicit requests, an access token, and returns
    /// the redirect location carrying it.
    pub async fn finish_authorize_request(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<String, OAuthError> {
        if !request.authorized {
            return Err(OAuthError::new(
                OAuthErrorCode::AccessDenied,
                "the resource owner denied the request",
            )
            .with_redirect(request.redirect_target()));
        }

        let now = self.clock.now();
        match request.response_type {
            ResponseType::Code => {
                let data = AuthorizeData {
                    client: request.client.clone(),
                    code: generate_token(),
                    expires_in: self.config.authorization_expiration_seconds,
                    scopes: request.scopes.clone(),
                    redirect_uri: request.redirect_uri.clone(),
                    state: request.state.clone(),
                    created_at: now,
                    code_challenge: request.code_challenge.clone(),
                    code_challenge_method: request
                        .code_challenge_method
                        .map(|m| m.as_str().to_string()),
                };
                self.storage
                    .save_authorize(&data)
                    .await
                    .map_err(|e| save_failure(e).with_redirect(request.redirect_target()))?;

                tracing::info!(client_id = %data.client.id, "Authorization code issued");

                let mut params = vec![("code", data.code.as_str())];
                if !data.state.is_empty() {
                    params.push(("state", data.state.as_str()));
                }
                Ok(redirect_url(&data.redirect_uri, &params, false))
            }
            ResponseType::Token => {
                let data = AccessData {
                    client: request.client.clone(),
                    access_token: generate_token(),
                    refresh_token: None,
                    expires_in: IMPLICIT_EXPIRATION_SECONDS,
                    scopes: request.scopes.clone(),
                    created_at: now,
                };
                self.storage
                    .save_access(&data)
                    .await
                    .map_err(|e| save_failure(e).with_redirect(request.redirect_target()))?;

                tracing::info!(client_id = %data.client.id, "Implicit access token issued");

                let expires_in = data.expires_in.to_string();
                let scope = scope::join(&data.scopes);
                let mut params = vec![
                    ("access_token", data.access_token.as_str()),
                    ("token_type", TOKEN_TYPE),
                    ("expires_in", expires_in.as_str()),
                    ("scope", scope.as_str()),
                ];
                if !request.state.is_empty() {
                    params.push(("state", request.state.as_str()));
                }
                Ok(redirect_url(&request.redirect_uri, &params, true))
            }
        }
    }

    /// Authenticates the client and checks the grant's preconditions.
    pub async fn handle_access_request(
        &self,
        credentials: &ClientCredentials,
        params: &TokenParams,
    ) -> Result<AccessRequest, OAuthError> {
        if params.grant_type.is_empty() {
            return Err(OAuthError::invalid_request("grant_type is required"));
        }
        let grant = match params.grant_type.parse::<GrantType>() {
            Ok(
                grant @ (GrantType::AuthorizationCode
                | GrantType::RefreshToken
                | GrantType::ClientCredentials),
            ) => grant,
            _ => {
                return Err(OAuthError::new(
                    OAuthErrorCode::UnsupportedGrantType,
                    format!("grant_type {:?} is not supported", params.grant_type),
                ))
            }
        };

        let client = self.authenticate(credentials).await?;
        if !client.allows_grant(grant) {
            return Err(OAuthError::unauthorized_client(format!(
                "client may not use the {} grant",
                grant
            )));
        }

        let (grant, scopes) = match grant {
            GrantType::AuthorizationCode => self.check_code_grant(&client, params).await?,
            GrantType::RefreshToken => self.check_refresh_grant(&client, params).await?,
            _ => {
                if client.public {
                    return Err(OAuthError::unauthorized_client(
                        "public clients may not use client_credentials",
                    ));
                }
                let scopes = self.resolve_scopes(&client.scopes, &params.scope)?;
                (AccessGrant::ClientCredentials, scopes)
            }
        };

        Ok(AccessRequest {
            client,
            grant,
            scopes,
            authorized: false,
        })
    }

    async fn check_code_grant(
        &self,
        client: &Client,
        params: &TokenParams,
    ) -> Result<(AccessGrant, Vec<String>), OAuthError> {
        if params.code.is_empty() {
            return Err(OAuthError::invalid_request("code is required"));
        }

        let data = self
            .storage
            .load_authorize(&params.code)
            .await
            .map_err(|e| {
                lookup_failure(e, || OAuthError::invalid_grant("authorization code not found"))
            })?;

        if data.client.id != client.id {
            return Err(OAuthError::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        if data.is_expired(self.clock.now()) {
            return Err(OAuthError::invalid_grant("authorization code expired"));
        }
        if !params.redirect_uri.is_empty() && params.redirect_uri != data.redirect_uri {
            return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
        }

        if let Some(challenge) = &data.code_challenge {
            if params.code_verifier.is_empty() {
                return Err(OAuthError::invalid_grant("code_verifier is required"));
            }
            let method = match data.code_challenge_method.as_deref() {
                Some(method) => method
                    .parse::<CodeChallengeMethod>()
                    .map_err(|e| OAuthError::invalid_grant(e.to_string()))?,
                None => CodeChallengeMethod::default(),
            };
            pkce::verify(&params.code_verifier, challenge, method)
                .map_err(|e| OAuthError::invalid_grant(e.to_string()))?;
        }

        let scopes = data.scopes.clone();
        Ok((AccessGrant::AuthorizationCode(data), scopes))
    }

    async fn check_refresh_grant(
        &self,
        client: &Client,
        params: &TokenParams,
    ) -> Result<(AccessGrant, Vec<String>), OAuthError> {
        if params.refresh_token.is_empty() {
            return Err(OAuthError::invalid_request("refresh_token is required"));
        }

        let previous = self
            .storage
            .load_refresh(&params.refresh_token)
            .await
            .map_err(|e| {
                lookup_failure(e, || OAuthError::invalid_grant("refresh token not found"))
            })?;

        if previous.client.id != client.id {
            return Err(OAuthError::invalid_grant(
                "refresh token was issued to another client",
            ));
        }

        // refresh can only narrow the original grant
        let scopes = self.resolve_scopes(&previous.scopes, &params.scope)?;
        Ok((AccessGrant::RefreshToken(previous), scopes))
    }

    /// Issues the token pair for an authorized access request.
    pub async fn finish_access_request(
        &self,
        request: &AccessRequest,
    ) -> Result<TokenResponse, OAuthError> {
        if !request.authorized {
            return Err(OAuthError::new(
                OAuthErrorCode::AccessDenied,
                "the access request was not authorized",
            ));
        }

        let refreshable = !matches!(request.grant, AccessGrant::ClientCredentials);
        let data = AccessData {
            client: request.client.clone(),
            access_token: generate_token(),
            refresh_token: refreshable.then(generate_token),
            expires_in: self.config.access_expiration_seconds,
            scopes: request.scopes.clone(),
            created_at: self.clock.now(),
        };

        // the grant is consumed before the new token exists; of two
        // concurrent exchanges only the one whose removal succeeds proceeds
        let consumed = match &request.grant {
            AccessGrant::AuthorizationCode(code) => self
                .storage
                .remove_authorize(&code.code)
                .await
                .map_err(OAuthError::server_error)?,
            AccessGrant::RefreshToken(previous) => match &previous.refresh_token {
                Some(old) => self
                    .storage
                    .remove_refresh(old)
                    .await
                    .map_err(OAuthError::server_error)?,
                None => false,
            },
            AccessGrant::ClientCredentials => true,
        };
        if !consumed {
            tracing::warn!(client_id = %data.client.id, "Grant was consumed by another exchange");
            return Err(match request.grant {
                AccessGrant::AuthorizationCode(_) => {
                    OAuthError::invalid_grant("authorization code was already used")
                }
                _ => OAuthError::invalid_grant("refresh token was already used"),
            });
        }

        self.storage.save_access(&data).await.map_err(save_failure)?;

        tracing::info!(
            client_id = %data.client.id,
            refreshable,
            scopes = ?data.scopes,
            "Access token issued"
        );

        Ok(TokenResponse {
            access_token: data.access_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: data.expires_in,
            refresh_token: data.refresh_token,
            scope: scope::join(&data.scopes),
        })
    }

    /// Reports the state of a live access token.
    pub async fn handle_info_request(&self, token: &str) -> Result<InfoResponse, OAuthError> {
        if token.is_empty() {
            return Err(OAuthError::invalid_request("access token is required"));
        }

        let data = self
            .storage
            .load_access(token)
            .await
            .map_err(|e| {
                lookup_failure(e, || OAuthError::invalid_grant("access token not found"))
            })?;

        let now = self.clock.now();
        if data.is_expired(now) {
            return Err(OAuthError::invalid_grant("access token expired"));
        }

        Ok(InfoResponse {
            client_id: data.client.id.clone(),
            expires_in: data.remaining_seconds(now),
            access_token: data.access_token,
            token_type: TOKEN_TYPE.to_string(),
            refresh_token: data.refresh_token,
            scope: scope::join(&data.scopes),
        })
    }

    /// Revokes an access or refresh token owned by the calling client.
    /// Unknown tokens are not an error.
    pub async fn handle_revoke_request(
        &self,
        credentials: &ClientCredentials,
        params: &RevokeParams,
    ) -> Result<(), OAuthError> {
        let client = self.authenticate(credentials).await?;
        if params.token.is_empty() {
            return Err(OAuthError::invalid_request("token is required"));
        }

        let refresh_first = params.token_type_hint == "refresh_token";
        for as_refresh in [refresh_first, !refresh_first] {
            let found = if as_refresh {
                self.storage.load_refresh(&params.token).await
            } else {
                self.storage.load_access(&params.token).await
            };

            let data = match found {
                Ok(data) => data,
                Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ValidationError) => {
                    continue
                }
                Err(e) => return Err(OAuthError::server_error(e)),
            };

            if data.client.id != client.id {
                return Err(OAuthError::unauthorized_client(
                    "token was issued to another client",
                ));
            }

            let removed = if as_refresh {
                self.storage.remove_refresh(&params.token).await
            } else {
                self.storage.remove_access(&params.token).await
            };
            removed.map_err(OAuthError::server_error)?;

            tracing::info!(client_id = %client.id, refresh = as_refresh, "Token revoked");
            return Ok(());
        }

        tracing::debug!(client_id = %client.id, "Revocation of an unknown token");
        Ok(())
    }

    async fn authenticate(&self, credentials: &ClientCredentials) -> Result<Client, OAuthError> {
        let client = self
            .storage
            .get_client(&credentials.client_id)
            .await
            .map_err(|e| lookup_failure(e, || OAuthError::invalid_client("unknown client")))?;

        if !client.public && !ClientRegistry::verify_secret(&client, &credentials.client_secret) {
            tracing::warn!(client_id = %client.id, "Client authentication failed");
            return Err(OAuthError::invalid_client("client authentication failed"));
        }
        Ok(client)
    }

    /// Requested scopes (or all of `allowed` when none are requested), each of
    /// which must be covered by `allowed`.
    fn resolve_scopes(
        &self,
        allowed: &[String],
        requested: &str,
    ) -> Result<Vec<String>, OAuthError> {
        let requested = scope::parse(requested);
        if requested.len() > scope::MAX_COUNT {
            return Err(OAuthError::invalid_scope(format!(
                "at most {} scopes may be requested",
                scope::MAX_COUNT
            )));
        }
        if let Some(bad) = scope::out_of_bounds(&requested) {
            return Err(OAuthError::invalid_scope(format!(
                "scope {:?} must be {} to {} characters",
                bad,
                scope::LENGTH.0,
                scope::LENGTH.1
            )));
        }
        let scopes = if requested.is_empty() {
            allowed.to_vec()
        } else {
            if let Some(denied) = requested.iter().find(|s| !scope::grants(allowed, s)) {
                return Err(OAuthError::invalid_scope(format!(
                    "scope {:?} is not allowed",
                    denied
                )));
            }
            requested
        };

        if scopes.is_empty() {
            return Err(OAuthError::invalid_scope("no scope was requested or granted"));
        }
        Ok(scopes)
    }
}
