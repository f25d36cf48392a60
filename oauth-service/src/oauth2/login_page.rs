use askama::Template;
use service_core::error::AppError;

use super::engine::AuthorizeParams;

/// Everything the login form needs to resubmit the authorize request.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginView {
    pub params: AuthorizeParams,
    pub client_name: String,
    pub scopes: Vec<String>,
    pub username: String,
    pub error: Option<String>,
}

pub trait LoginPageRenderer: Send + Sync {
    fn render(&self, view: &LoginView) -> Result<String, AppError>;
}

/// Plain HTML form posting back to `/oauth2/authorize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLoginPage;

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate<'a> {
    view: &'a LoginView,
    fields: [(&'static str, &'a str); 7],
}

impl LoginPageRenderer for DefaultLoginPage {
    fn render(&self, view: &LoginView) -> Result<String, AppError> {
        let params = &view.params;
        let template = LoginTemplate {
            view,
            fields: [
                ("response_type", params.response_type.as_str()),
                ("client_id", params.client_id.as_str()),
                ("redirect_uri", params.redirect_uri.as_str()),
                ("scope", params.scope.as_str()),
                ("state", params.state.as_str()),
                ("code_challenge", params.code_challenge.as_str()),
                ("code_challenge_method", params.code_challenge_method.as_str()),
            ],
        };
        template.render().map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("failed to render the login page: {}", e))
        })
    }
}
