use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;

use crate::handle::Handle;

/// Per-request logger state. Created once by the binding middleware and
/// owned by the scope for the request's duration.
///
/// `logger` is reassigned (never mutated in place) when fields are
/// added mid-request; the response logger keeps its identity and is
/// extended in place instead.
pub struct Store {
    pub logger: Handle,
    pub response_logger: Option<Handle>,
}

impl Store {
    pub fn new(logger: Handle) -> Self {
        Store {
            logger,
            response_logger: None,
        }
    }

    pub fn with_response_logger(logger: Handle, response_logger: Handle) -> Self {
        Store {
            logger,
            response_logger: Some(response_logger),
        }
    }
}

/// A store as held by the scope stack.
pub type SharedStore = Rc<RefCell<Store>>;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<SharedStore>> = const { RefCell::new(Vec::new()) };
}

/// Raised when an operation needs an active request scope and none is.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("no request scope is active")]
    NoActiveScope,
}

/// The store governing the calling code, if any.
///
/// Outside every request scope this returns `None`; callers then fall
/// back to the process-wide handle.
pub fn active() -> Option<SharedStore> {
    SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Runs `f` against the active store, or returns `None` without one.
pub fn with_active<R>(f: impl FnOnce(&SharedStore) -> R) -> Option<R> {
    active().map(|store| f(&store))
}

/// Establishes `store` for the full execution of `fut`.
///
/// The association holds across every await point inside `fut` and is
/// invisible to any other future interleaved on the same thread: the
/// store is pushed when `fut` is polled and popped when that poll
/// returns, so concurrently in-flight requests on one worker never
/// observe each other's store.
pub fn scope<F: Future>(store: Store, fut: F) -> ScopeFuture<F> {
    ScopeFuture {
        inner: fut,
        store: Rc::new(RefCell::new(store)),
    }
}

pub(crate) struct ScopeGuard;

/// Pushes `store` until the returned guard drops. The pop runs on
/// unwind as well, keeping the stack balanced if a poll panics.
pub(crate) fn enter(store: &SharedStore) -> ScopeGuard {
    SCOPE_STACK.with(|stack| stack.borrow_mut().push(Rc::clone(store)));
    ScopeGuard
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

pin_project! {
    /// Future returned by [`scope`].
    pub struct ScopeFuture<F> {
        #[pin]
        inner: F,
        store: SharedStore,
    }
}

impl<F: Future> Future for ScopeFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _scope = enter(this.store);
        this.inner.poll(cx)
    }
}
