use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::ready;
use pin_project_lite::pin_project;

use actix_service::{Service, Transform};
use actix_utils::future::{Ready, ready};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::{Error, HttpMessage, HttpRequest, Result};

use crate::normalize::CapturedError;

/// Middleware that makes escaped handler errors visible to completion
/// logging.
///
/// An error leaving the handler, whether it escapes the service call
/// outright or actix already folded it into an error response, is
/// recorded as a [`CapturedFailure`] request extension and then passed
/// on unchanged, so the registered error handlers stay authoritative.
/// Access-log layers read the extension when they build their
/// completion record.
///
/// # Examples
/// ```rust
/// use actix_web::App;
/// use actix_web_scoped_logger::{ErrorCapture, RequestScope};
///
/// let app = App::new()
///     .wrap(RequestScope::default())
///     .wrap(ErrorCapture::default());
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorCapture;

/// The error a request's handler escaped with, as recorded by
/// [`ErrorCapture`].
#[derive(Clone, Debug)]
pub struct CapturedFailure {
    error: CapturedError,
}

impl CapturedFailure {
    pub fn error(&self) -> &CapturedError {
        &self.error
    }
}

impl<S, B> Transform<S, ServiceRequest> for ErrorCapture
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ErrorCaptureService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ErrorCaptureService { service }))
    }
}

/// Error-capture middleware service.
pub struct ErrorCaptureService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for ErrorCaptureService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = CaptureResponse<S>;

    actix_service::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // keep a request handle: when the downstream future errors the
        // ServiceRequest is gone, but the extension must still land
        let request = req.request().clone();
        CaptureResponse {
            fut: self.service.call(req),
            request,
        }
    }
}

pin_project! {
    pub struct CaptureResponse<S>
    where
        S: Service<ServiceRequest>,
    {
        #[pin]
        fut: S::Future,
        request: HttpRequest,
    }
}

impl<S, B> Future for CaptureResponse<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
{
    type Output = Result<ServiceResponse<B>, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match ready!(this.fut.poll(cx)) {
            Ok(res) => {
                // actix may have turned the handler error into a
                // response already; the response still carries it
                if let Some(err) = res.response().error() {
                    log::debug!("capturing handler error from response: {err:?}");
                    res.request().extensions_mut().insert(CapturedFailure {
                        error: CapturedError::new(err.to_string()),
                    });
                }
                Poll::Ready(Ok(res))
            }
            Err(err) => {
                log::debug!("capturing escaped handler error: {err:?}");
                this.request.extensions_mut().insert(CapturedFailure {
                    error: CapturedError::new(err.to_string()),
                });
                Poll::Ready(Err(err))
            }
        }
    }
}
