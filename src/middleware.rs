use crate::authz::{Admission, AuthContext, Authorizer, Rejection};
use crate::errors::StoreError;
use crate::metrics::STORE_ERRORS;
use crate::rate_limit::{RateDecision, RateLimiter};
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, FromRequest, HttpMessage, HttpRequest, ResponseError,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error};

fn short_circuit<B>(req: ServiceRequest, rejection: Rejection) -> ServiceResponse<EitherBody<B>> {
    let response = rejection.error_response();
    req.into_response(response).map_into_right_body()
}

/// Fixed-window rate limiting keyed by the peer IP. Runs before authorization.
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let Some(client) = req.peer_addr().map(|addr| addr.ip().to_string()) else {
                error!(path = %req.path(), "request has no peer address");
                let rejection = Rejection::Backend(StoreError::Protocol("peer address unavailable".to_string()));
                return Ok(short_circuit(req, rejection));
            };

            match limiter.admit(&client).await {
                Ok(RateDecision::Admitted) => svc.call(req).await.map(ServiceResponse::map_into_left_body),
                Ok(RateDecision::Rejected) => {
                    debug!(client = %client, path = %req.path(), "rate limit exceeded");
                    Ok(short_circuit(req, Rejection::RateLimited))
                }
                Err(e) => {
                    STORE_ERRORS.with_label_values(&["rate_limit"]).inc();
                    error!(store = "rate_limit", client = %client, error = %e, "rate limit check failed");
                    Ok(short_circuit(req, Rejection::Backend(e)))
                }
            }
        })
    }
}

/// Token, revocation and role checks. Granted requests carry an
/// [`AuthContext`] in their extensions.
pub struct Authorize {
    authorizer: Arc<Authorizer>,
}

impl Authorize {
    pub fn new(authorizer: Arc<Authorizer>) -> Self {
        Self { authorizer }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authorize
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthorizeMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthorizeMiddleware {
            service: Rc::new(service),
            authorizer: self.authorizer.clone(),
        }))
    }
}

pub struct AuthorizeMiddleware<S> {
    service: Rc<S>,
    authorizer: Arc<Authorizer>,
}

impl<S, B> Service<ServiceRequest> for AuthorizeMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let authorizer = self.authorizer.clone();

        Box::pin(async move {
            let auth_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);

            let admission = authorizer
                .authorize(req.method(), req.path(), auth_header.as_deref())
                .await;

            match admission {
                Ok(Admission::Exempt) => {}
                Ok(Admission::Granted(ctx)) => {
                    req.extensions_mut().insert(ctx);
                }
                Err(rejection) => return Ok(short_circuit(req, rejection)),
            }

            svc.call(req).await.map(ServiceResponse::map_into_left_body)
        })
    }
}

/// Extractor for the verified caller. Fails with 401 on routes the
/// authorization middleware let through without a token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthContext);

impl FromRequest for Authenticated {
    type Error = Rejection;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let ctx = req.extensions().get::<AuthContext>().cloned();
        ready(ctx.map(Authenticated).ok_or(Rejection::MissingToken))
    }
}
