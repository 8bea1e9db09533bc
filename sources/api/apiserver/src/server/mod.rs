//! The server module owns the API surface.  It resolves request paths and hands the resulting
//! resource contexts to the server::controller module.

mod controller;

use actix_web::error::ResponseError;
use actix_web::http::header::{self, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use datastore::Value;
use log::{debug, info};
use snafu::ResultExt;
use std::sync::Arc;

use crate::codec::{self, YANG_DATA_JSON, YANG_PATCH_JSON};
use crate::config::Config;
use crate::error::{self, Error, Result};
use crate::params::parse_query;
use crate::resolver::{ResourceContext, Resolver, Scope};

/// Root of the data resource.
pub const DATA_ROOT: &str = "/rests/data";
/// Root of the operations resource.
pub const OPERATIONS_ROOT: &str = "/rests/operations";

/// Shared by all handlers: the root scope, which leads to every backend and mount point.
pub struct AppState {
    pub scope: Arc<Scope>,
}

// Router

/// This is the primary interface of the module.  It builds the services the configuration
/// describes and serves RESTCONF requests against them until the server is stopped.
pub async fn serve(config: Config) -> Result<()> {
    let scope = config.build_scope().await?;
    let state = web::Data::new(AppState { scope });

    let http_server = HttpServer::new(move || App::new().configure(routes(state.clone())))
        .workers(config.threads)
        .bind(config.listen.as_str())
        .context(error::BindServerSnafu {
            addr: config.listen.as_str(),
        })?;

    info!("Serving RESTCONF at {}", config.listen);
    http_server.run().await.context(error::ServerStartSnafu)
}

/// Registers the RESTCONF routes and makes the shared state available to them.  Tests use this to
/// build an app without binding a socket.
pub fn routes(state: web::Data<AppState>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(state).service(
            web::scope("/rests")
                .service(
                    web::scope("/data")
                        .route("", web::get().to(get_data))
                        .route("", web::put().to(put_data))
                        .route("", web::post().to(post_data))
                        .route("", web::patch().to(patch_data))
                        .route("/{tail:.*}", web::get().to(get_data))
                        .route("/{tail:.*}", web::put().to(put_data))
                        .route("/{tail:.*}", web::post().to(post_data))
                        .route("/{tail:.*}", web::patch().to(patch_data))
                        .route("/{tail:.*}", web::delete().to(delete_data)),
                )
                .route("/operations/{tail:.*}", web::post().to(post_operation)),
        );
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Handler methods called by the router

/// Returns the target, merged from configuration and operational data.
async fn get_data(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let context = resolve_data(&req, &state)?;
    let query = parse_query(req.query_string());
    let body = controller::read(&context, &query).await?;
    json_response(StatusCode::OK, YANG_DATA_JSON, &body)
}

/// Replaces the target with the body; 201 if it didn't exist, 204 if it did.
async fn put_data(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let context = resolve_data(&req, &state)?;
    let query = parse_query(req.query_string());
    let body = codec::parse_body(&body)?;
    let created = controller::replace(&context, &query, &body).await?;
    Ok(if created {
        HttpResponse::Created().finish()
    } else {
        HttpResponse::NoContent().finish()
    })
}

/// Creates a child of the target and points to it in the Location header, or invokes the target
/// if it's an action.
async fn post_data(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let context = resolve_data(&req, &state)?;
    let query = parse_query(req.query_string());
    if context.node.is_operation() {
        return operation_response(controller::invoke(&context, &query, &body).await?);
    }

    let body = codec::parse_body(&body)?;
    let uri = controller::create(&context, &query, &body).await?;
    Ok(HttpResponse::Created()
        .insert_header((header::LOCATION, format!("{}{}", DATA_ROOT, uri)))
        .finish())
}

/// Merges the body into the target, or runs it as a yang-patch if it's sent as one.
async fn patch_data(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let context = resolve_data(&req, &state)?;
    let query = parse_query(req.query_string());
    let body = codec::parse_body(&body)?;

    if is_yang_patch(req.headers().get(header::CONTENT_TYPE)) {
        let status = controller::patch(&context, &query, &body).await?;
        let document = codec::encode_patch_status(&status)?;
        return json_response(status.status_code(), YANG_PATCH_JSON, &document);
    }

    controller::merge(&context, &query, &body).await?;
    Ok(HttpResponse::Ok().finish())
}

/// Deletes the target, which must exist.
async fn delete_data(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let context = resolve_data(&req, &state)?;
    let query = parse_query(req.query_string());
    controller::delete(&context, &query).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Invokes an rpc, or an action when the path leads into the data tree.
async fn post_operation(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let path = req
        .uri()
        .path()
        .strip_prefix(OPERATIONS_ROOT)
        .unwrap_or_default();
    let context = Resolver::new(Arc::clone(&state.scope)).resolve_operation(path)?;
    let query = parse_query(req.query_string());
    operation_response(controller::invoke(&context, &query, &body).await?)
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Resolves the data resource path of a request.  The raw path is used so percent-encoded key
/// values are decoded once, by the resolver.
fn resolve_data(req: &HttpRequest, state: &AppState) -> Result<ResourceContext> {
    let path = match req.uri().path().strip_prefix(DATA_ROOT) {
        Some("") | None => "/",
        Some(path) => path,
    };
    debug!("{} {}", req.method(), path);
    Resolver::new(Arc::clone(&state.scope)).resolve(path)
}

fn is_yang_patch(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.trim_start().starts_with(YANG_PATCH_JSON))
}

fn operation_response(output: Option<Value>) -> Result<HttpResponse> {
    match output {
        Some(output) => json_response(StatusCode::OK, YANG_DATA_JSON, &output),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

fn json_response(status: StatusCode, content_type: &str, body: &Value) -> Result<HttpResponse> {
    let body = serde_json::to_string(body).context(error::ResponseSerializationSnafu)?;
    Ok(HttpResponse::build(status)
        .content_type(content_type)
        .body(body))
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        Error::status_code(self)
    }

    /// Reports the error as a RESTCONF error document.  Errors from remote devices keep the
    /// details the device gave.
    fn error_response(&self) -> HttpResponse {
        let status = Error::status_code(self);
        debug!("Responding {} to error: {}", status, self);
        match codec::encode_errors(&self.to_entries()).and_then(|body| {
            serde_json::to_string(&body).context(error::ResponseSerializationSnafu)
        }) {
            Ok(body) => HttpResponse::build(status)
                .content_type(YANG_DATA_JSON)
                .body(body),
            Err(e) => HttpResponse::build(status).body(format!("{}: {}", self, e)),
        }
    }
}
