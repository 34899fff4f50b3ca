use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::HttpMessage;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::{Error, Result};

use crate::config::Config;
use crate::handle::{FieldMap, Handle, KvLogHandle};
use crate::scope::{SharedStore, Store};

/// Middleware that gives every request its own logger scope.
///
/// For each non-excluded request it selects or creates a request
/// logger, optionally a response logger, and establishes both for the
/// rest of the request pipeline. Everything downstream, from handlers
/// to the services they call, then resolves the request's logger
/// implicitly. The middleware emits no records of its own.
///
/// Wrap the whole `App` to cover every route, or an individual
/// `web::scope` to cover a subset; `exclude` and `exclude_regex` skip
/// paths within the wrapped set.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_scoped_logger::RequestScope;
///
/// let app = App::new()
///     .wrap(RequestScope::default().exclude("/health"));
/// ```
pub struct RequestScope(Rc<Inner>);

struct Inner {
    root: Handle,
    exclude: HashSet<String>,
    exclude_regex: Vec<Regex>,
    reuse_existing: bool,
    assign_response: bool,
}

impl RequestScope {
    pub fn new() -> RequestScope {
        RequestScope(Rc::new(Inner {
            root: Arc::new(KvLogHandle::new(module_path!())),
            exclude: HashSet::new(),
            exclude_regex: Vec::new(),
            reuse_existing: false,
            assign_response: false,
        }))
    }

    /// Builds the middleware from a deserialized [`Config`].
    ///
    /// Malformed exclusion patterns panic here, at startup, rather than
    /// failing requests later.
    pub fn from_config(config: &Config) -> RequestScope {
        let root: Handle = match &config.log_target {
            Some(target) => Arc::new(KvLogHandle::new(target.clone())),
            None => Arc::new(KvLogHandle::new(module_path!())),
        };
        RequestScope(Rc::new(Inner {
            root,
            exclude: config.exclude.iter().cloned().collect(),
            exclude_regex: config
                .exclude_regex
                .iter()
                .map(|pattern| Regex::new(pattern).unwrap())
                .collect(),
            reuse_existing: config.reuse_existing_logger,
            assign_response: config.assign_response_logger,
        }))
    }

    /// Do not establish a scope for the specified path.
    pub fn exclude<T: Into<String>>(mut self, path: T) -> Self {
        Rc::get_mut(&mut self.0)
            .unwrap()
            .exclude
            .insert(path.into());
        self
    }

    /// Do not establish a scope for paths that match regex.
    pub fn exclude_regex<T: Into<String>>(mut self, path: T) -> Self {
        let inner = Rc::get_mut(&mut self.0).unwrap();
        inner.exclude_regex.push(Regex::new(&path.into()).unwrap());
        self
    }

    /// Keep the first logger an upstream integration attached instead
    /// of picking the most recently attached one.
    pub fn reuse_existing_logger(mut self, reuse: bool) -> Self {
        Rc::get_mut(&mut self.0).unwrap().reuse_existing = reuse;
        self
    }

    /// Track a response-side logger alongside the request logger.
    pub fn assign_response_logger(mut self, assign: bool) -> Self {
        Rc::get_mut(&mut self.0).unwrap().assign_response = assign;
        self
    }

    /// Replaces the root handle fresh request loggers derive from.
    pub fn root(mut self, handle: Handle) -> Self {
        Rc::get_mut(&mut self.0).unwrap().root = handle;
        self
    }

    /// Sets the log target of the root handle.
    pub fn log_target(mut self, target: impl Into<String>) -> Self {
        Rc::get_mut(&mut self.0).unwrap().root = Arc::new(KvLogHandle::new(target.into()));
        self
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        RequestScope::new()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestScope
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestScopeService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        // first transform to be built installs its root as the
        // process-wide fallback; later ones are no-ops
        crate::handle::set_fallback(self.0.root.clone());
        ready(Ok(RequestScopeService {
            service,
            inner: Rc::clone(&self.0),
        }))
    }
}

/// The sequence of loggers upstream integrations attached to a
/// request, oldest first. See [`attach_logger`].
#[derive(Default)]
pub struct AttachedLoggers(Vec<Handle>);

/// Response-side counterpart of [`AttachedLoggers`]. See
/// [`attach_response_logger`].
#[derive(Default)]
pub struct AttachedResponseLoggers(Vec<Handle>);

/// Appends `handle` to the request's logger sequence.
///
/// Access-log layers and per-route middleware chains call this as they
/// create loggers; [`RequestScope`] then picks the most recent one (or
/// the first, in reuse mode) when it establishes the request scope.
pub fn attach_logger(msg: &impl HttpMessage, handle: Handle) {
    let mut extensions = msg.extensions_mut();
    match extensions.get_mut::<AttachedLoggers>() {
        Some(attached) => attached.0.push(handle),
        None => {
            extensions.insert(AttachedLoggers(vec![handle]));
        }
    }
}

/// Appends `handle` to the request's response-logger sequence.
pub fn attach_response_logger(msg: &impl HttpMessage, handle: Handle) {
    let mut extensions = msg.extensions_mut();
    match extensions.get_mut::<AttachedResponseLoggers>() {
        Some(attached) => attached.0.push(handle),
        None => {
            extensions.insert(AttachedResponseLoggers(vec![handle]));
        }
    }
}

/// Request ID generated for requests that arrive with no attached
/// logger. Readable from the request extensions.
#[derive(Clone, Copy, Debug)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        #[cfg(not(feature = "uuid_v7"))]
        {
            Self(Uuid::new_v4())
        }
        #[cfg(feature = "uuid_v7")]
        {
            Self(Uuid::now_v7())
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

fn pick(handles: &[Handle], reuse_existing: bool) -> Option<Handle> {
    if reuse_existing {
        handles.first().cloned()
    } else {
        handles.last().cloned()
    }
}

/// Request-scope middleware service.
pub struct RequestScopeService<S> {
    inner: Rc<Inner>,
    service: S,
}

impl<S> RequestScopeService<S> {
    fn select_logger(&self, req: &ServiceRequest) -> Handle {
        let attached = req
            .extensions()
            .get::<AttachedLoggers>()
            .and_then(|attached| pick(&attached.0, self.inner.reuse_existing));
        if let Some(handle) = attached {
            return handle;
        }

        // reuse mode never constructs a logger of its own
        if self.inner.reuse_existing {
            return self.inner.root.clone();
        }

        let id = RequestId::new();
        req.extensions_mut().insert(id);
        let mut fields = FieldMap::new();
        fields.insert("request_id".to_string(), Value::String(id.to_string()));
        self.inner.root.with_fields(fields)
    }

    fn select_response_logger(&self, req: &ServiceRequest) -> Option<Handle> {
        req.extensions()
            .get::<AttachedResponseLoggers>()
            .and_then(|attached| pick(&attached.0, self.inner.reuse_existing))
    }
}

impl<S, B> Service<ServiceRequest> for RequestScopeService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = ScopedResponse<S>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let excluded = self.inner.exclude.contains(req.path())
            || self
                .inner
                .exclude_regex
                .iter()
                .any(|r| r.is_match(req.path()));

        if excluded {
            ScopedResponse {
                fut: self.service.call(req),
                store: None,
            }
        } else {
            let logger = self.select_logger(&req);
            let response_logger = if self.inner.assign_response {
                self.select_response_logger(&req)
            } else {
                None
            };
            let store = Store {
                logger,
                response_logger,
            };
            ScopedResponse {
                fut: self.service.call(req),
                store: Some(Rc::new(RefCell::new(store))),
            }
        }
    }
}

pin_project! {
    /// Polls the wrapped pipeline with the request's store established;
    /// the association is visible for exactly the duration of each
    /// poll, so overlapping requests on one worker stay isolated.
    pub struct ScopedResponse<S>
    where
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        store: Option<SharedStore>,
    }
}

impl<S, B> Future for ScopedResponse<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<B>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.store {
            Some(store) => {
                let _scope = crate::scope::enter(store);
                this.fut.poll(cx)
            }
            None => this.fut.poll(cx),
        }
    }
}
