mod common;

use axum::http::{header, StatusCode};
use chrono::Duration;
use common::{query_param, TestApp, ADMIN_PASSWORD, ADMIN_USERNAME, REDIRECT_URI};

#[tokio::test]
async fn login_form_is_rendered_for_a_valid_request() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;

    let response = app
        .get(
            &format!(
                "/oauth2/authorize?response_type=code&client_id={}&scope=users.read&state=abc",
                client.id
            ),
            None,
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    let html = response.text();
    assert!(html.contains("Sign in to Ops Console"));
    assert!(html.contains("name=\"state\" value=\"abc\""));
    assert!(html.contains("<li>users.read</li>"));
}

#[tokio::test]
async fn wrong_password_shows_the_form_again() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;

    let response = app
        .post_form(
            "/oauth2/authorize",
            None,
            &[
                ("response_type", "code"),
                ("client_id", &client.id),
                ("username", ADMIN_USERNAME),
                ("password", "not-the-password"),
            ],
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("Invalid username or password"));
    assert!(response.headers.get(header::LOCATION).is_none());
}

#[tokio::test]
async fn unregistered_redirect_uri_is_answered_in_json() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;

    let response = app
        .get(
            &format!(
                "/oauth2/authorize?response_type=code&client_id={}&redirect_uri=https%3A%2F%2Fevil.example.com%2F",
                client.id
            ),
            None,
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_request");
}

#[tokio::test]
async fn unsupported_response_type_is_redirected() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;

    let response = app
        .get(
            &format!(
                "/oauth2/authorize?response_type=id_token&client_id={}&state=s1",
                client.id
            ),
            None,
        )
        .await;

    assert_eq!(response.status, StatusCode::FOUND);
    let location = response.location();
    assert!(location.starts_with(REDIRECT_URI));
    assert_eq!(
        query_param(&location, "error").as_deref(),
        Some("unsupported_response_type")
    );
    assert_eq!(query_param(&location, "state").as_deref(), Some("s1"));
}

#[tokio::test]
async fn code_flow_end_to_end_with_introspection() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;

    let code = app.authorize(&client, "users.read clients", "xyz").await;

    let response = app.exchange_code(&client, &code).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    assert_eq!(response.headers[header::CACHE_CONTROL], "no-store");

    let token = response.json();
    let access_token = token["access_token"].as_str().unwrap().to_string();
    assert!(!access_token.is_empty());
    assert!(!token["refresh_token"].as_str().unwrap().is_empty());
    assert_eq!(token["token_type"], "Bearer");
    assert_eq!(token["expires_in"], 3600);
    assert_eq!(token["scope"], "users.read clients");

    let response = app
        .get(&format!("/oauth2/info?code={}", access_token), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let info = response.json();
    assert_eq!(info["client_id"], client.id.as_str());
    assert_eq!(info["scope"], "users.read clients");
    assert_eq!(info["access_token"], access_token.as_str());

    // the bearer header works as well
    let response = app
        .get("/oauth2/info", Some(&format!("Bearer {}", access_token)))
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn code_cannot_be_exchanged_twice() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;
    let code = app.authorize(&client, "users", "").await;

    assert_eq!(app.exchange_code(&client, &code).await.status, StatusCode::OK);

    let second = app.exchange_code(&client, &code).await;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
    assert_eq!(second.json()["error"], "invalid_grant");
}

#[tokio::test]
async fn expired_code_is_rejected() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;
    let code = app.authorize(&client, "users", "").await;

    app.clock.advance(Duration::seconds(300));

    let response = app.exchange_code(&client, &code).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_grant");
}

#[tokio::test]
async fn bad_client_secret_is_invalid_client() {
    let app = TestApp::new().await;
    let mut client = app.register_client("Ops Console", false).await;
    let code = app.authorize(&client, "users", "").await;

    client.secret = "wrong-secret".to_string();
    let response = app.exchange_code(&client, &code).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(response.headers.contains_key(header::WWW_AUTHENTICATE));
    assert_eq!(response.json()["error"], "invalid_client");
}

#[tokio::test]
async fn refresh_replaces_the_token_pair() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;
    let code = app.authorize(&client, "users", "").await;
    let first = app.exchange_code(&client, &code).await.json();
    let first_access = first["access_token"].as_str().unwrap().to_string();
    let first_refresh = first["refresh_token"].as_str().unwrap().to_string();

    let response = app
        .post_form(
            "/oauth2/token",
            None,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &first_refresh),
                ("scope", "users.read"),
                ("client_id", &client.id),
                ("client_secret", &client.secret),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    let second = response.json();
    let second_access = second["access_token"].as_str().unwrap().to_string();
    assert_ne!(second_access, first_access);
    assert_eq!(second["scope"], "users.read");

    // the old pair is gone
    let response = app
        .get(&format!("/oauth2/info?access_token={}", first_access), None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let response = app
        .post_form(
            "/oauth2/token",
            Some(&client.basic_auth()),
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &first_refresh),
            ],
        )
        .await;
    assert_eq!(response.json()["error"], "invalid_grant");

    // the new one works
    let response = app
        .get(&format!("/oauth2/info?access_token={}", second_access), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn client_credentials_grant() {
    let app = TestApp::new().await;
    let client = app.register_client("Batch Worker", false).await;

    let response = app
        .post_form(
            "/oauth2/token",
            Some(&client.basic_auth()),
            &[("grant_type", "client_credentials"), ("scope", "clients.read")],
        )
        .await;

    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
    let token = response.json();
    assert_eq!(token["scope"], "clients.read");
    assert!(token.get("refresh_token").is_none());
}

#[tokio::test]
async fn unknown_grant_type_is_unsupported() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;

    let response = app
        .post_form(
            "/oauth2/token",
            Some(&client.basic_auth()),
            &[
                ("grant_type", "password"),
                ("username", ADMIN_USERNAME),
                ("password", ADMIN_PASSWORD),
            ],
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn implicit_flow_returns_the_token_in_the_fragment() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;

    let response = app
        .post_form(
            "/oauth2/authorize",
            None,
            &[
                ("response_type", "token"),
                ("client_id", &client.id),
                ("scope", "users.read"),
                ("state", "st"),
                ("username", ADMIN_USERNAME),
                ("password", ADMIN_PASSWORD),
            ],
        )
        .await;

    assert_eq!(response.status, StatusCode::FOUND);
    let location = response.location();
    assert!(location.starts_with(&format!("{}#", REDIRECT_URI)));
    assert_eq!(
        query_param(&location, "expires_in"),
        Some(i32::MAX.to_string())
    );
    assert_eq!(query_param(&location, "state").as_deref(), Some("st"));
    assert!(query_param(&location, "refresh_token").is_none());

    let access_token = query_param(&location, "access_token").unwrap();
    let response = app
        .get(&format!("/oauth2/info?access_token={}", access_token), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["scope"], "users.read");
}

#[tokio::test]
async fn public_client_with_pkce() {
    let app = TestApp::new().await;
    let client = app.register_client("Mobile App", true).await;
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    let response = app
        .post_form(
            "/oauth2/authorize",
            None,
            &[
                ("response_type", "code"),
                ("client_id", &client.id),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
                ("username", ADMIN_USERNAME),
                ("password", ADMIN_PASSWORD),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::FOUND);
    let code = query_param(&response.location(), "code").unwrap();

    let missing_verifier = app
        .post_form(
            "/oauth2/token",
            None,
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("client_id", &client.id),
            ],
        )
        .await;
    assert_eq!(missing_verifier.json()["error"], "invalid_grant");

    let response = app
        .post_form(
            "/oauth2/token",
            None,
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("client_id", &client.id),
                ("code_verifier", verifier),
            ],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
}

#[tokio::test]
async fn revoked_refresh_token_takes_its_access_token_along() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;
    let code = app.authorize(&client, "users", "").await;
    let token = app.exchange_code(&client, &code).await.json();
    let access_token = token["access_token"].as_str().unwrap();
    let refresh_token = token["refresh_token"].as_str().unwrap();

    let response = app
        .post_form(
            "/oauth2/revoke",
            Some(&client.basic_auth()),
            &[("token", refresh_token), ("token_type_hint", "refresh_token")],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app
        .get(&format!("/oauth2/info?access_token={}", access_token), None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // unknown tokens still answer 200
    let response = app
        .post_form(
            "/oauth2/revoke",
            Some(&client.basic_auth()),
            &[("token", "never-issued-token")],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn login_attempts_are_rate_limited_per_ip() {
    let app = TestApp::new().await;
    let client = app.register_client("Ops Console", false).await;

    let mut statuses = Vec::new();
    for _ in 0..6 {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/oauth2/authorize")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("x-forwarded-for", "203.0.113.7")
            .body(axum::body::Body::from(
                serde_urlencoded::to_string([
                    ("response_type", "code"),
                    ("client_id", client.id.as_str()),
                    ("username", ADMIN_USERNAME),
                    ("password", "wrong-password"),
                ])
                .unwrap(),
            ))
            .unwrap();
        statuses.push(app.send(request).await.status);
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::BAD_REQUEST));
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
}
