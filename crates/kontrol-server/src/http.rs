//! HTTP API of the registry.
//!
//! - `GET /heartbeat?id=<kite id>` answers `pong` while the kite holds a
//!   lease and `registeragain` once it does not (plain text)
//! - `POST /register` takes a `RegisterRequest`
//! - `POST /kites` and `POST /token` take a `QueryRequest`; the caller's
//!   kite key names the user the token is issued to
//! - `POST /machine` takes a `MachineRequest` and returns a kite key
//!
//! JSON bodies in and out. Failures come back as `{"error": "..."}`.
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use kontrol::{
    KiteKeyResult, Kontrol, KontrolError, MachineRequest, QueryRequest, RegisterRequest,
    TokenResult,
};
use serde::Serialize;
use tokio::net::TcpListener;

pub const HEARTBEAT_PATH: &str = "/heartbeat";
pub const REGISTER_PATH: &str = "/register";
pub const KITES_PATH: &str = "/kites";
pub const TOKEN_PATH: &str = "/token";
pub const MACHINE_PATH: &str = "/machine";

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Accept connections on `listener` until `shutdown` resolves.
/// Connections already accepted are left to finish on their own.
pub async fn serve<F>(listener: TcpListener, kontrol: Arc<Kontrol>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    continue;
                }
            },
        };

        let kontrol = Arc::clone(&kontrol);
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let kontrol = Arc::clone(&kontrol);
                async move { Ok::<_, Infallible>(route(&kontrol, req).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("connection from {peer} ended with error: {e}");
            }
        });
    }
    tracing::info!("http api stopped");
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("request body too large")]
    TooLarge,

    #[error("cannot read request body")]
    Body,

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Kontrol(#[from] KontrolError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Body | ApiError::Json(_) => StatusCode::BAD_REQUEST,
            ApiError::Kontrol(e) => match e {
                KontrolError::Validation { .. } | KontrolError::InvalidQuery { .. } => {
                    StatusCode::BAD_REQUEST
                }
                KontrolError::Auth { .. } => StatusCode::UNAUTHORIZED,
                KontrolError::AmbiguousQuery { .. } => StatusCode::CONFLICT,
                KontrolError::Internal { .. } | KontrolError::Token(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Message safe to send back. Signer details stay in the log.
    fn message(&self) -> String {
        match self {
            ApiError::Kontrol(KontrolError::Token(e)) => {
                tracing::error!("token signing failed: {e}");
                "internal error - token".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Dispatch a single request.
pub async fn route<B>(kontrol: &Kontrol, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (method, allow) = match req.uri().path() {
        HEARTBEAT_PATH => (Method::GET, "GET"),
        REGISTER_PATH | KITES_PATH | TOKEN_PATH | MACHINE_PATH => (Method::POST, "POST"),
        _ => return text(StatusCode::NOT_FOUND, "not found"),
    };
    if req.method() != method {
        let mut resp = text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        resp.headers_mut().insert(ALLOW, HeaderValue::from_static(allow));
        return resp;
    }

    if req.uri().path() == HEARTBEAT_PATH {
        return heartbeat(kontrol, req.uri().query());
    }

    let path = req.uri().path().to_owned();
    let body = match read_body(req.into_body()).await {
        Ok(body) => body,
        Err(e) => return error(&e),
    };
    match path.as_str() {
        REGISTER_PATH => reply(register(kontrol, &body).await),
        KITES_PATH => reply(get_kites(kontrol, &body).await),
        TOKEN_PATH => reply(get_token(kontrol, &body).await),
        _ => reply(machine(kontrol, &body).await),
    }
}

fn heartbeat(kontrol: &Kontrol, query: Option<&str>) -> Response<Full<Bytes>> {
    let Some(id) = query_param(query, "id") else {
        return text(StatusCode::BAD_REQUEST, "query must contain id");
    };
    let reply = kontrol.heartbeat(&id);
    tracing::trace!("heartbeat {id}: {}", reply.as_str());
    text(StatusCode::OK, reply.as_str())
}

async fn register(kontrol: &Kontrol, body: &[u8]) -> Result<impl Serialize, ApiError> {
    let request: RegisterRequest = serde_json::from_slice(body)?;
    Ok(kontrol.register(request).await?)
}

async fn get_kites(kontrol: &Kontrol, body: &[u8]) -> Result<impl Serialize, ApiError> {
    let request: QueryRequest = serde_json::from_slice(body)?;
    let requester = kontrol.authenticate(&request.auth)?;
    Ok(kontrol.get_kites(&request.query, &requester).await?)
}

async fn get_token(kontrol: &Kontrol, body: &[u8]) -> Result<impl Serialize, ApiError> {
    let request: QueryRequest = serde_json::from_slice(body)?;
    let requester = kontrol.authenticate(&request.auth)?;
    let token = kontrol.get_token(&request.query, &requester).await?;
    Ok(TokenResult { token })
}

async fn machine(kontrol: &Kontrol, body: &[u8]) -> Result<impl Serialize, ApiError> {
    let request: MachineRequest = serde_json::from_slice(body)?;
    let kite_key = kontrol.machine(request).await?;
    Ok(KiteKeyResult { kite_key })
}

async fn read_body<B>(body: B) -> Result<Bytes, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ApiError::TooLarge),
        Err(e) => {
            tracing::debug!("reading request body failed: {e}");
            Err(ApiError::Body)
        }
    }
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn reply<T: Serialize>(result: Result<T, ApiError>) -> Response<Full<Bytes>> {
    let value = match result {
        Ok(value) => value,
        Err(e) => return error(&e),
    };
    match serde_json::to_vec(&value) {
        Ok(body) => json(StatusCode::OK, body),
        Err(e) => {
            tracing::error!("encoding response failed: {e}");
            text(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn error(err: &ApiError) -> Response<Full<Bytes>> {
    let status = err.status();
    let body = serde_json::json!({ "error": err.message() });
    json(status, body.to_string().into_bytes())
}

fn json(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
