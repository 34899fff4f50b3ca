use serde::Deserialize;

pub(crate) const DEFAULT_CONTEXT_FIELD: &str = "context";
pub(crate) const DEFAULT_ERROR_FIELD: &str = "err";

/// Options recognized by the scoped-logging subsystem.
///
/// All fields have defaults, so a `Config` can come from application
/// code or be deserialized as one section of a larger settings file:
///
/// ```rust
/// use actix_web_scoped_logger::Config;
///
/// let config: Config = serde_json::from_str(
///     r#"{ "exclude": ["/health"], "error_field": "error" }"#,
/// ).unwrap();
/// assert_eq!(config.context_field, "context");
/// assert_eq!(config.error_field, "error");
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Field name the trailing context value is recorded under.
    pub context_field: String,
    /// Field name errors are recorded under; align this with the
    /// backend's error serialization key.
    pub error_field: String,
    /// Use the first logger an upstream integration attached to the
    /// request instead of picking the most recent one.
    pub reuse_existing_logger: bool,
    /// Track a response-side logger and propagate field additions to
    /// it.
    pub assign_response_logger: bool,
    /// Paths the binding middleware skips entirely.
    pub exclude: Vec<String>,
    /// Regex patterns for paths the binding middleware skips.
    pub exclude_regex: Vec<String>,
    /// Log target of the root handle; defaults to this crate's path.
    pub log_target: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            context_field: DEFAULT_CONTEXT_FIELD.to_string(),
            error_field: DEFAULT_ERROR_FIELD.to_string(),
            reuse_existing_logger: false,
            assign_response_logger: false,
            exclude: Vec::new(),
            exclude_regex: Vec::new(),
            log_target: None,
        }
    }
}
