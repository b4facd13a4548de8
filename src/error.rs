#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum YeoshinError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    #[error("API error from {api}: {message}")]
    Api { api: String, message: String },

    #[error("API JSON error from {api}: {source}")]
    ApiJson {
        api: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "Not logged in to {site}: {reason}\n\nSet the session cookies (_kau, _kahai, _karmt, _kawlt, ACCESS_TOKEN) in the environment or a .env file.\nCheck with: yeoshin login-check"
    )]
    NotLoggedIn { site: String, reason: String },

    #[error("No events found for '{keyword}'.\n\nTry a different keyword, e.g. yeoshin search 보톡스")]
    NoResults { keyword: String },

    #[error(
        "API key required: {api} requires {env_var} environment variable.\n\nTo set:\n  export {env_var}=your-key\n\nOr skip the analysis with --skip-analysis"
    )]
    ApiKeyRequired { api: String, env_var: String },

    #[error("Browser error: {0}\n\nFetch pages without a browser with: yeoshin --fetch http ...")]
    Browser(String),

    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
