/// Authentication gate.
///
/// Runs exactly once per request, before any handler. Extracts the bearer
/// access token, validates it through the codec (no storage I/O), attaches
/// the resolved claims to the request, and then enforces the static
/// authorization table. A present-but-invalid token is rejected outright,
/// whatever the route; an absent token leaves the request anonymous and the
/// table decides whether that is acceptable.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::{AccessTokenCodec, Claims};
use crate::authorization::{Access, AccessPolicy};

pub struct AuthGate {
    codec: AccessTokenCodec,
    policy: AccessPolicy,
}

impl AuthGate {
    pub fn new(codec: AccessTokenCodec, policy: AccessPolicy) -> Self {
        Self { codec, policy }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthGateService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthGateService {
            service: Rc::new(service),
            codec: self.codec.clone(),
            policy: self.policy.clone(),
        }))
    }
}

pub struct AuthGateService<S> {
    service: Rc<S>,
    codec: AccessTokenCodec,
    policy: AccessPolicy,
}

impl<S> AuthGateService<S> {
    fn resolve_identity(&self, req: &ServiceRequest) -> Result<Option<Claims>, Rejection> {
        let bearer = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::to_string);

        match bearer {
            None => Ok(None),
            Some(token) => match self.codec.validate(&token) {
                Ok(claims) => Ok(Some(claims)),
                Err(e) => {
                    tracing::warn!("Access token rejected: {}", e);
                    Err(Rejection::invalid_token())
                }
            },
        }
    }
}

struct Rejection {
    reason: &'static str,
    response: HttpResponse,
}

impl Rejection {
    fn invalid_token() -> Self {
        Self {
            reason: "Invalid token",
            response: HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Invalid or expired token",
                "code": "TOKEN_INVALID"
            })),
        }
    }

    fn missing_token() -> Self {
        Self {
            reason: "Unauthorized",
            response: HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Missing authentication token",
                "code": "UNAUTHORIZED"
            })),
        }
    }

    fn forbidden() -> Self {
        Self {
            reason: "Forbidden",
            response: HttpResponse::Forbidden().json(serde_json::json!({
                "error": "Insufficient permissions",
                "code": "FORBIDDEN"
            })),
        }
    }
}

impl<S, B> Service<ServiceRequest> for AuthGateService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let identity = match self.resolve_identity(&req) {
            Ok(identity) => identity,
            Err(rejection) => return reject(rejection),
        };

        let verdict = match (self.policy.access_for(req.path()), &identity) {
            (Access::Public, _) => Ok(()),
            (Access::Authenticated, Some(_)) => Ok(()),
            (Access::Role(required), Some(claims)) if claims.role == *required => Ok(()),
            (Access::Role(_), Some(_)) => Err(Rejection::forbidden()),
            (_, None) => Err(Rejection::missing_token()),
        };

        if let Err(rejection) = verdict {
            tracing::warn!(path = %req.path(), "Request rejected by authorization table");
            return reject(rejection);
        }

        if let Some(claims) = identity {
            tracing::debug!(user_id = %claims.uid, email = %claims.sub, "Caller authenticated");
            req.extensions_mut().insert(claims);
        }

        let service = self.service.clone();
        Box::pin(async move { service.call(req).await })
    }
}

fn reject<R: 'static>(rejection: Rejection) -> LocalBoxFuture<'static, Result<R, Error>> {
    Box::pin(async move {
        Err(actix_web::error::InternalError::from_response(rejection.reason, rejection.response)
            .into())
    })
}
