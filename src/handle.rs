use std::borrow::Cow;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::normalize::render_message;

/// Structured fields attached to a log record.
pub type FieldMap = Map<String, Value>;

/// Shared, type-erased logger capability.
///
/// Handles are cheap to clone and may be held across await points; the
/// per-request `Store` and the process-wide fallback both own one.
pub type Handle = Arc<dyn LoggerHandle + Send + Sync>;

/// Log severities understood by the scoped loggers.
///
/// `Fatal` has no `log::Level` counterpart; it is emitted at `Error`
/// level with a `fatal` marker field so structured backends can still
/// tell the two apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_log_level(self) -> log::Level {
        match self {
            Severity::Trace => log::Level::Trace,
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warn => log::Level::Warn,
            Severity::Error | Severity::Fatal => log::Level::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

/// One normalized log record: structured fields, an optional message
/// and the positional values its placeholders consume.
///
/// The message text is never duplicated into `fields`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CanonicalRecord {
    pub fields: FieldMap,
    pub message: Option<String>,
    pub args: Vec<Value>,
}

/// Minimal structured-logging capability the scoped loggers write to.
///
/// Two derivation styles are supported: [`with_fields`] produces a new
/// child handle with extra permanently-bound fields, while
/// [`bind_fields`] adds fields to the receiving handle in place.
/// Request loggers are replaced through derivation; response loggers
/// must keep their identity and are extended in place.
///
/// [`with_fields`]: LoggerHandle::with_fields
/// [`bind_fields`]: LoggerHandle::bind_fields
pub trait LoggerHandle {
    fn emit(&self, severity: Severity, record: &CanonicalRecord);

    fn with_fields(&self, fields: FieldMap) -> Handle;

    fn bind_fields(&self, fields: FieldMap);
}

/// [`LoggerHandle`] backed by the `log` crate's key-value machinery.
///
/// Every emitted record becomes a single `log::Record` whose key-values
/// are the handle's bound fields merged with the record's own; whatever
/// `log::Log` backend the application installed decides serialization
/// and transport.
pub struct KvLogHandle {
    target: Cow<'static, str>,
    bound: RwLock<FieldMap>,
}

impl KvLogHandle {
    pub fn new(target: impl Into<Cow<'static, str>>) -> Self {
        KvLogHandle {
            target: target.into(),
            bound: RwLock::new(FieldMap::new()),
        }
    }

    pub fn with_initial_fields(target: impl Into<Cow<'static, str>>, fields: FieldMap) -> Self {
        KvLogHandle {
            target: target.into(),
            bound: RwLock::new(fields),
        }
    }
}

impl LoggerHandle for KvLogHandle {
    fn emit(&self, severity: Severity, record: &CanonicalRecord) {
        let mut merged = self
            .bound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (key, value) in &record.fields {
            merged.insert(key.clone(), value.clone());
        }
        if severity == Severity::Fatal {
            merged.insert("fatal".to_string(), Value::Bool(true));
        }

        let pairs: Vec<(&str, log::kv::Value)> = merged
            .iter()
            .map(|(key, value)| (key.as_str(), log::kv::Value::from_serde(value)))
            .collect();
        let kvs = pairs.as_slice();

        let message = render_message(record.message.as_deref(), &record.args);

        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{message}"))
                .level(severity.as_log_level())
                .target(self.target.as_ref())
                .module_path_static(Some(module_path!()))
                .key_values(&kvs)
                .build(),
        );
    }

    fn with_fields(&self, fields: FieldMap) -> Handle {
        let mut bound = self
            .bound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (key, value) in fields {
            bound.insert(key, value);
        }
        Arc::new(KvLogHandle {
            target: self.target.clone(),
            bound: RwLock::new(bound),
        })
    }

    fn bind_fields(&self, fields: FieldMap) {
        let mut bound = self.bound.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in fields {
            bound.insert(key, value);
        }
    }
}

static FALLBACK: OnceLock<Handle> = OnceLock::new();

/// Installs the process-wide fallback handle. First writer wins; later
/// calls are no-ops and return `false`.
pub fn set_fallback(handle: Handle) -> bool {
    FALLBACK.set(handle).is_ok()
}

/// The handle used whenever no request scope is active.
///
/// Reading before anything installed a fallback is legal and yields a
/// default [`KvLogHandle`] targeting this crate.
pub fn fallback() -> Handle {
    FALLBACK
        .get_or_init(|| Arc::new(KvLogHandle::new("actix_web_scoped_logger")))
        .clone()
}
