use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use crate::config::{Config, DEFAULT_CONTEXT_FIELD, DEFAULT_ERROR_FIELD};
use crate::handle::{CanonicalRecord, FieldMap, Handle, Severity};
use crate::normalize::{LogMessage, Normalizer, merge_into};
use crate::scope::{self, ScopeError};

/// The logger a call site resolves to right now: the active request's
/// logger when a scope is established, the process-wide fallback
/// otherwise.
fn resolve_handle() -> Handle {
    scope::with_active(|store| store.borrow().logger.clone())
        .unwrap_or_else(crate::handle::fallback)
}

/// Application-facing logger running the full normalization engine.
///
/// Each severity method takes a message (string, structured value or
/// [`CapturedError`]) plus positional values; the last positional value
/// is always recorded as the call's context. Calls never fail and
/// never require an active request scope.
///
/// ```rust
/// use actix_web_scoped_logger::AppLogger;
/// use serde_json::json;
///
/// let log = AppLogger::new();
/// log.info("user %s logged in", [json!("alice"), json!("AuthService")]);
/// log.warn("slow query", [json!({"elapsed_ms": 93}), json!("Db")]);
/// ```
///
/// [`CapturedError`]: crate::CapturedError
pub struct AppLogger {
    normalizer: Normalizer,
}

impl AppLogger {
    pub fn new() -> Self {
        AppLogger {
            normalizer: Normalizer::new(DEFAULT_CONTEXT_FIELD, DEFAULT_ERROR_FIELD),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        AppLogger {
            normalizer: Normalizer::new(&config.context_field, &config.error_field),
        }
    }

    pub fn trace(&self, message: impl Into<LogMessage>, params: impl IntoIterator<Item = Value>) {
        self.call(Severity::Trace, message.into(), params);
    }

    pub fn debug(&self, message: impl Into<LogMessage>, params: impl IntoIterator<Item = Value>) {
        self.call(Severity::Debug, message.into(), params);
    }

    pub fn info(&self, message: impl Into<LogMessage>, params: impl IntoIterator<Item = Value>) {
        self.call(Severity::Info, message.into(), params);
    }

    pub fn warn(&self, message: impl Into<LogMessage>, params: impl IntoIterator<Item = Value>) {
        self.call(Severity::Warn, message.into(), params);
    }

    pub fn error(&self, message: impl Into<LogMessage>, params: impl IntoIterator<Item = Value>) {
        self.call(Severity::Error, message.into(), params);
    }

    pub fn fatal(&self, message: impl Into<LogMessage>, params: impl IntoIterator<Item = Value>) {
        self.call(Severity::Fatal, message.into(), params);
    }

    fn call(
        &self,
        severity: Severity,
        message: LogMessage,
        params: impl IntoIterator<Item = Value>,
    ) {
        let record = self
            .normalizer
            .normalize(severity, message, params.into_iter().collect());
        resolve_handle().emit(severity, &record);
    }
}

impl Default for AppLogger {
    fn default() -> Self {
        AppLogger::new()
    }
}

/// A labeled logger for one injection site or subsystem.
///
/// The label is merged into every emitted record under the context
/// field. Overload handling is simpler than [`AppLogger`]'s: the first
/// argument is either a message string followed by positional values,
/// or a structured value optionally followed by a message string.
///
/// ```rust
/// use actix_web_scoped_logger::ScopedLogger;
/// use serde_json::json;
///
/// let log = ScopedLogger::with_label("OrderService");
/// log.info("order placed", []);
/// log.info(json!({"order_id": 7}), [json!("order placed")]);
/// ```
pub struct ScopedLogger {
    label: RwLock<String>,
    context_field: String,
    error_field: String,
    assign_response: bool,
}

impl ScopedLogger {
    pub fn new() -> Self {
        ScopedLogger {
            label: RwLock::new(String::new()),
            context_field: DEFAULT_CONTEXT_FIELD.to_string(),
            error_field: DEFAULT_ERROR_FIELD.to_string(),
            assign_response: false,
        }
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        let logger = ScopedLogger::new();
        logger.set_label(label);
        logger
    }

    pub fn from_config(config: &Config) -> Self {
        ScopedLogger {
            label: RwLock::new(String::new()),
            context_field: config.context_field.clone(),
            error_field: config.error_field.clone(),
            assign_response: config.assign_response_logger,
        }
    }

    /// Rebinds the label used by every subsequent call.
    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.write().unwrap_or_else(PoisonError::into_inner) = label.into();
    }

    pub fn label(&self) -> String {
        self.label
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn trace(&self, message: impl Into<LogMessage>, args: impl IntoIterator<Item = Value>) {
        self.call(Severity::Trace, message.into(), args);
    }

    pub fn debug(&self, message: impl Into<LogMessage>, args: impl IntoIterator<Item = Value>) {
        self.call(Severity::Debug, message.into(), args);
    }

    pub fn info(&self, message: impl Into<LogMessage>, args: impl IntoIterator<Item = Value>) {
        self.call(Severity::Info, message.into(), args);
    }

    pub fn warn(&self, message: impl Into<LogMessage>, args: impl IntoIterator<Item = Value>) {
        self.call(Severity::Warn, message.into(), args);
    }

    pub fn error(&self, message: impl Into<LogMessage>, args: impl IntoIterator<Item = Value>) {
        self.call(Severity::Error, message.into(), args);
    }

    pub fn fatal(&self, message: impl Into<LogMessage>, args: impl IntoIterator<Item = Value>) {
        self.call(Severity::Fatal, message.into(), args);
    }

    /// Permanently binds `fields` to the active request's logger.
    ///
    /// The request logger is replaced by a derived child carrying the
    /// fields; a response-side logger, when tracked and propagation is
    /// enabled, gains the same fields in place.
    ///
    /// Fails with [`ScopeError::NoActiveScope`] outside a request
    /// scope: silently dropping field bindings would corrupt log
    /// correlation downstream.
    pub fn with_fields(&self, fields: FieldMap) -> Result<(), ScopeError> {
        let store = scope::active().ok_or(ScopeError::NoActiveScope)?;
        let mut store = store.borrow_mut();
        store.logger = store.logger.with_fields(fields.clone());
        if self.assign_response {
            if let Some(response_logger) = &store.response_logger {
                response_logger.bind_fields(fields);
            }
        }
        Ok(())
    }

    fn call(
        &self,
        severity: Severity,
        message: LogMessage,
        args: impl IntoIterator<Item = Value>,
    ) {
        let mut args: Vec<Value> = args.into_iter().collect();
        let mut fields = FieldMap::new();
        let label = self.label();

        let record = match message {
            LogMessage::Failure(err) => {
                // the label joins the error instead of clobbering it
                if !label.is_empty() {
                    fields.insert(self.context_field.clone(), Value::String(label));
                }
                let text = err.message_or_default();
                fields.insert(self.error_field.clone(), err.to_value());
                CanonicalRecord {
                    fields,
                    message: Some(text),
                    args,
                }
            }
            LogMessage::Fields(value) => {
                // label first, so an explicit field wins on collision
                if !label.is_empty() {
                    fields.insert(self.context_field.clone(), Value::String(label));
                }
                merge_into(&mut fields, value);
                let message = if args.first().is_some_and(Value::is_string) {
                    match args.remove(0) {
                        Value::String(text) => Some(text),
                        _ => None,
                    }
                } else {
                    None
                };
                CanonicalRecord {
                    fields,
                    message,
                    args,
                }
            }
            LogMessage::Text(text) => {
                if !label.is_empty() {
                    fields.insert(self.context_field.clone(), Value::String(label));
                }
                CanonicalRecord {
                    fields,
                    message: Some(text),
                    args,
                }
            }
        };

        resolve_handle().emit(severity, &record);
    }
}

impl Default for ScopedLogger {
    fn default() -> Self {
        ScopedLogger::new()
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::task::{Context, Poll, Waker};

    use serde_json::json;

    use super::*;
    use crate::handle::test_support::{CaptureHandle, Records, capture, records};
    use crate::normalize::CapturedError;
    use crate::scope::{Store, scope};

    fn scoped_emit(handle: Handle, f: impl FnOnce()) {
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut fut = Box::pin(scope(Store::new(handle), async move { f() }));
        assert!(fut.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn label_is_merged_into_every_record() {
        let records = records();
        let log = ScopedLogger::with_label("AuthService");
        scoped_emit(capture(&records), || {
            log.info("login ok", []);
        });
        let emitted = records.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        let (severity, record, _) = &emitted[0];
        assert_eq!(*severity, Severity::Info);
        assert_eq!(record.fields["context"], json!("AuthService"));
        assert_eq!(record.message.as_deref(), Some("login ok"));
    }

    #[test]
    fn distinct_labels_never_cross_contaminate() {
        let records = records();
        let first = ScopedLogger::with_label("Billing");
        let second = ScopedLogger::with_label("Shipping");
        scoped_emit(capture(&records), || {
            first.info("charged", []);
            second.info("dispatched", []);
        });
        let emitted = records.lock().unwrap();
        assert_eq!(emitted[0].1.fields["context"], json!("Billing"));
        assert_eq!(emitted[1].1.fields["context"], json!("Shipping"));
    }

    #[test]
    fn error_and_label_are_merged_together() {
        let records = records();
        let log = ScopedLogger::with_label("Worker");
        scoped_emit(capture(&records), || {
            log.error(CapturedError::new("boom").with_stack("trace"), []);
        });
        let emitted = records.lock().unwrap();
        let record = &emitted[0].1;
        assert_eq!(record.fields["context"], json!("Worker"));
        assert_eq!(
            record.fields["err"],
            json!({"message": "boom", "stack": "trace"}),
        );
        assert_eq!(record.message.as_deref(), Some("boom"));
    }

    #[test]
    fn explicit_fields_take_precedence_over_the_label() {
        let records = records();
        let log = ScopedLogger::with_label("Implicit");
        scoped_emit(capture(&records), || {
            log.info(json!({"context": "Explicit", "n": 1}), []);
        });
        let emitted = records.lock().unwrap();
        assert_eq!(emitted[0].1.fields["context"], json!("Explicit"));
        assert_eq!(emitted[0].1.fields["n"], json!(1));
    }

    #[test]
    fn object_first_argument_takes_an_optional_message() {
        let records = records();
        let log = ScopedLogger::new();
        scoped_emit(capture(&records), || {
            log.info(json!({"n": 1}), [json!("created"), json!("rest")]);
        });
        let emitted = records.lock().unwrap();
        let record = &emitted[0].1;
        assert_eq!(record.message.as_deref(), Some("created"));
        assert_eq!(record.args, vec![json!("rest")]);
        assert!(!record.fields.contains_key("context"));
    }

    #[test]
    fn set_label_applies_to_subsequent_calls() {
        let records = records();
        let log = ScopedLogger::new();
        scoped_emit(capture(&records), || {
            log.info("before", []);
            log.set_label("Renamed");
            log.info("after", []);
        });
        let emitted = records.lock().unwrap();
        assert!(!emitted[0].1.fields.contains_key("context"));
        assert_eq!(emitted[1].1.fields["context"], json!("Renamed"));
    }

    #[test]
    fn with_fields_requires_an_active_scope() {
        let log = ScopedLogger::new();
        let result = log.with_fields(FieldMap::from_iter([("k".to_string(), json!(1))]));
        assert!(matches!(result, Err(ScopeError::NoActiveScope)));
    }

    #[test]
    fn with_fields_rebinds_the_request_logger() {
        let records = records();
        let log = ScopedLogger::new();
        scoped_emit(capture(&records), || {
            log.info("before", []);
            log.with_fields(FieldMap::from_iter([("user".to_string(), json!("alice"))]))
                .expect("scope is active");
            log.info("after", []);
        });
        let emitted = records.lock().unwrap();
        // bound-field snapshots: nothing before, the binding after
        assert!(emitted[0].2.is_empty());
        assert_eq!(emitted[1].2["user"], json!("alice"));
    }

    #[test]
    fn with_fields_extends_the_response_logger_in_place() {
        let records = records();
        let response_handle = Arc::new(CaptureHandle::with_records(Arc::clone(&records)));
        let response: Handle = response_handle.clone();

        let config = Config {
            assign_response_logger: true,
            ..Config::default()
        };
        let log = ScopedLogger::from_config(&config);

        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        let store = Store::with_response_logger(capture(&records), response);
        let mut fut = Box::pin(scope(store, async move {
            log.with_fields(FieldMap::from_iter([("user".to_string(), json!("alice"))]))
                .expect("scope is active");
        }));
        assert!(fut.as_mut().poll(&mut cx).is_ready());

        assert_eq!(response_handle.bound_fields()["user"], json!("alice"));
    }

    #[test]
    fn falls_back_to_the_process_handle_without_a_scope() {
        // must not fail, and must resolve to the fallback handle
        let resolved = resolve_handle();
        assert!(Arc::ptr_eq(&resolved, &crate::handle::fallback()));
        AppLogger::new().info("outside any request", []);
    }

    #[test]
    fn app_logger_runs_the_full_normalization() {
        let records = records();
        let log = AppLogger::new();
        scoped_emit(capture(&records), || {
            log.info("user %s logged in", [json!("alice"), json!("AuthService")]);
        });
        let emitted = records.lock().unwrap();
        let record = &emitted[0].1;
        assert_eq!(record.fields["context"], json!("AuthService"));
        assert_eq!(record.message.as_deref(), Some("user %s logged in"));
        assert_eq!(record.args, vec![json!("alice")]);
    }

    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                Poll::Pending
            }
        }
    }

    #[test]
    fn interleaved_requests_never_share_augmentations() {
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);

        let records_a: Records = records();
        let records_b: Records = records();
        let log = Rc::new(ScopedLogger::new());

        let request = |records: &Records, key: &'static str| {
            let log = Rc::clone(&log);
            let handle = capture(records);
            scope(Store::new(handle), async move {
                log.with_fields(FieldMap::from_iter([(key.to_string(), json!(true))]))
                    .expect("scope is active");
                log.info("first", []);
                YieldOnce(false).await;
                log.info("second", []);
            })
        };

        let mut fut_a = Box::pin(request(&records_a, "from_a"));
        let mut fut_b = Box::pin(request(&records_b, "from_b"));

        assert!(fut_a.as_mut().poll(&mut cx).is_pending());
        assert!(fut_b.as_mut().poll(&mut cx).is_pending());
        assert!(fut_a.as_mut().poll(&mut cx).is_ready());
        assert!(fut_b.as_mut().poll(&mut cx).is_ready());

        let emitted_a = records_a.lock().unwrap();
        let emitted_b = records_b.lock().unwrap();
        assert_eq!(emitted_a.len(), 2);
        assert_eq!(emitted_b.len(), 2);
        for (_, _, bound) in emitted_a.iter() {
            assert!(bound.contains_key("from_a"));
            assert!(!bound.contains_key("from_b"));
        }
        for (_, _, bound) in emitted_b.iter() {
            assert!(bound.contains_key("from_b"));
            assert!(!bound.contains_key("from_a"));
        }
    }
}
