//! Request-scoped structured logging for actix-web.
//! Every log statement emitted anywhere while a request is being
//! handled resolves to that request's own logger, with no logger or
//! request id threaded through function signatures.
//!
//! # Examples:
//! ## Scope every request and log from a handler.
//! ```bash
//! cargo add actix-web-scoped-logger
//! ```
//! Example usage with the standard `log` crate and the
//! `structured_logger` crate as backend:
//! ```rust
//! use actix_web::{web, App, HttpServer};
//! use actix_web_scoped_logger::{AppLogger, RequestScope};
//! use serde_json::json;
//! use structured_logger::{async_json::new_writer, Builder};
//! use tokio;
//!
//! async fn login(log: web::Data<AppLogger>) -> &'static str {
//!     // resolves to the current request's logger
//!     log.info("user %s logged in", [json!("alice"), json!("AuthService")]);
//!     "ok"
//! }
//!
//! #[actix_web::main] // or #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     Builder::new()
//!         .with_target_writer("*", new_writer(tokio::io::stdout()))
//!         .init();
//!
//!     HttpServer::new(|| {
//!         App::new()
//!             .app_data(web::Data::new(AppLogger::new()))
//!             .wrap(RequestScope::default().exclude("/health"))
//!             .route("/login", web::post().to(login))
//!     })
//!     .bind("127.0.0.1:0")?;
//!     Ok(())
//! }
//! ```
//! ## Labeled loggers per subsystem.
//! A [`ScopedLogger`] carries a fixed label that is merged into every
//! record it emits; [`LoggerRegistry`] hands out one labeled logger per
//! registered label:
//! ```rust
//! use actix_web_scoped_logger::{Config, LoggerRegistry, ScopedLogger};
//! use serde_json::json;
//!
//! let registry = LoggerRegistry::new();
//! registry.register_label("OrderService");
//!
//! let config = Config::default();
//! let loggers: Vec<ScopedLogger> = registry
//!     .build_bindings()
//!     .iter()
//!     .map(|binding| binding.resolve(&config))
//!     .collect();
//! loggers[0].info(json!({"order_id": 7}), [json!("order placed")]);
//! ```
//! ## Completion-log error capture.
//! [`ErrorCapture`] records errors escaping a handler on the request,
//! where an access-log integration can pick them up:
//! ```rust
//! use actix_web::{web, App};
//! use actix_web_scoped_logger::{ErrorCapture, RequestScope};
//!
//! let app = App::new()
//!     .wrap(RequestScope::default())
//!     .wrap(ErrorCapture::default())
//!     .route("/", web::get().to(|| async { "Hello world!" }));
//! ```
//! # Features
//! - One implicit logger per request, correct across await points and
//!   under many interleaved in-flight requests per worker
//! - Message normalization: printf-style interpolation (`%s %d %j %o`),
//!   structured-object merging, trailing context extraction, error
//!   capture into a configurable error field
//! - Labeled per-subsystem loggers sharing one transport
//! - Mid-request field binding via [`ScopedLogger::with_fields`]
//! - Reuse of loggers attached by upstream access-log integrations
//! - Pattern-based path exclusion
//! - Request ID generation (UUID v4 or v7)
//!
//! # Configuration
//!
//! All options are builder methods on [`RequestScope`] or fields of the
//! deserializable [`Config`]:
//!
//! ```rust
//! use actix_web_scoped_logger::{Config, RequestScope};
//!
//! let config: Config = serde_json::from_str(
//!     r#"{
//!         "reuse_existing_logger": false,
//!         "assign_response_logger": true,
//!         "exclude": ["/health"],
//!         "exclude_regex": ["^/assets/.*"],
//!         "error_field": "error"
//!     }"#,
//! ).unwrap();
//! let middleware = RequestScope::from_config(&config);
//! ```
//!
//! # Feature Flags
//!
//! - `uuid_v4` (default) - UUIDv4 request IDs
//! - `uuid_v7` - Use UUIDv7 instead of UUIDv4 for request IDs

mod capture;
mod config;
mod handle;
mod logger;
mod middleware;
mod normalize;
mod registry;
mod scope;

pub use crate::capture::{CapturedFailure, ErrorCapture};
pub use crate::config::Config;
pub use crate::handle::{
    CanonicalRecord, FieldMap, Handle, KvLogHandle, LoggerHandle, Severity, fallback,
    set_fallback,
};
pub use crate::logger::{AppLogger, ScopedLogger};
pub use crate::middleware::{
    AttachedLoggers, AttachedResponseLoggers, RequestId, RequestScope, attach_logger,
    attach_response_logger,
};
pub use crate::normalize::{CapturedError, LogMessage, Normalizer};
pub use crate::registry::{LoggerBinding, LoggerRegistry};
pub use crate::scope::{ScopeError, ScopeFuture, SharedStore, Store, active, scope, with_active};
