use axum::{extract::Request, http::header, middleware::Next, response::IntoResponse};

/// Paths that answer with an HTML page instead of JSON.
const HTML_PATHS: &[&str] = &["/oauth2/authorize"];

pub async fn security_headers_middleware(req: Request, next: Next) -> impl IntoResponse {
    let serves_html = HTML_PATHS.contains(&req.uri().path());

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        header::HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        header::HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        header::HeaderValue::from_static("DENY"),
    );

    // The login page posts back to itself
    let csp = if serves_html {
        "default-src 'none'; form-action 'self'; frame-ancestors 'none'"
    } else {
        "default-src 'none'; frame-ancestors 'none'"
    };
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        header::HeaderValue::from_static(csp),
    );

    response
}
