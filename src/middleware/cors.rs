/// Cross-origin resource sharing layer.
///
/// Credentialed CORS against a fixed allowlist of origins loaded from
/// configuration. Preflight requests from an allowed origin are answered
/// directly; actual requests get the response headers appended. Origins
/// outside the allowlist receive no CORS headers at all, which makes the
/// browser refuse the response.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{self, HeaderValue},
    Error, HttpResponse,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS, PATCH";
const ALLOWED_HEADERS: &str = "Authorization, Content-Type";
const PREFLIGHT_MAX_AGE: &str = "3600";

pub struct CorsLayer {
    allowed_origins: Rc<Vec<String>>,
}

impl CorsLayer {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self {
            allowed_origins: Rc::new(allowed_origins),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CorsLayer
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = CorsLayerService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(CorsLayerService {
            service: Rc::new(service),
            allowed_origins: self.allowed_origins.clone(),
        }))
    }
}

pub struct CorsLayerService<S> {
    service: Rc<S>,
    allowed_origins: Rc<Vec<String>>,
}

impl<S, B> Service<ServiceRequest> for CorsLayerService<S>
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
        let origin = req
            .headers()
            .get(header::ORIGIN)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let allowed_origin =
            origin.filter(|origin| self.allowed_origins.iter().any(|o| o == origin));

        let is_preflight = req.method() == actix_web::http::Method::OPTIONS
            && req
                .headers()
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

        if is_preflight {
            if let Some(origin) = allowed_origin.clone() {
                let response = HttpResponse::NoContent()
                    .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin))
                    .insert_header((header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"))
                    .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS))
                    .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS))
                    .insert_header((header::ACCESS_CONTROL_MAX_AGE, PREFLIGHT_MAX_AGE))
                    .insert_header((header::VARY, "Origin"))
                    .finish();

                let (req, _) = req.into_parts();
                return Box::pin(async move {
                    Ok(ServiceResponse::new(req, response).map_into_right_body())
                });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let mut res = fut.await?;

            if let Some(origin) = allowed_origin {
                if let Ok(value) = HeaderValue::from_str(&origin) {
                    let headers = res.headers_mut();
                    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                    headers.insert(
                        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                        HeaderValue::from_static("true"),
                    );
                    headers.insert(
                        header::ACCESS_CONTROL_EXPOSE_HEADERS,
                        HeaderValue::from_static(ALLOWED_HEADERS),
                    );
                    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
                }
            }

            Ok(res.map_into_left_body())
        })
    }
}
