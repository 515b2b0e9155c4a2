//! Bridge between `http` request/response pairs and contexts.
//!
//! [`HttpApp`] is what [`App::build_http`](crate::App::build_http) returns
//! and what [`Server::serve`](crate::Server::serve) runs. For every request
//! it:
//!
//! 1. collects the body and fills a fresh context from the request parts,
//! 2. runs the pipeline inside [`Context::using`],
//! 3. lifts status, headers and body out of the response sub-context,
//! 4. lets `using` dispose the context.
//!
//! Handler errors become `500 Internal Server Error`. A pipeline that
//! finishes without setting a status or writing a byte yields
//! `404 Not Found`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::HOST;
use http::{StatusCode, Version};
use http_body_util::{BodyExt, Full};
use tracing::{error, warn};

use crate::app::Pipeline;
use crate::context::Context;
use crate::error::Result;
use crate::factory::Factory;

/// A built pipeline paired with the factory that creates its contexts.
pub struct HttpApp<T = ()> {
    pipeline: Pipeline<T>,
    factory: Arc<Factory>,
}

impl<T> Clone for HttpApp<T> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T: Default + Send + 'static> HttpApp<T> {
    pub(crate) fn new(pipeline: Pipeline<T>) -> Self {
        Self { pipeline, factory: Arc::new(Factory::new()) }
    }

    /// Replaces the context factory, e.g. to change context defaults.
    pub fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    pub fn pipeline(&self) -> &Pipeline<T> {
        &self.pipeline
    }

    /// Runs one request through the pipeline.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("failed to read request body: {e}");
                return status_only(StatusCode::BAD_REQUEST);
            }
        };

        let ctx = self.factory.create_context();
        if let Err(e) = populate(&ctx, parts, body) {
            error!(error = %e, "failed to populate context");
            ctx.dispose();
            return status_only(StatusCode::INTERNAL_SERVER_ERROR);
        }

        let pipeline = self.pipeline.clone();
        let (outcome, untouched, (status, headers, body)) = ctx
            .using(|ctx: Context| async move {
                let outcome = pipeline.call(ctx.clone()).await;
                let response = ctx.response();
                (outcome, response.is_untouched(), response.take_parts())
            })
            .await;

        if let Err(e) = outcome {
            error!(error = %e, "pipeline failed");
            return status_only(StatusCode::INTERNAL_SERVER_ERROR);
        }

        let status = status.unwrap_or(if untouched { StatusCode::NOT_FOUND } else { StatusCode::OK });
        let mut response = http::Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn populate(ctx: &Context, parts: http::request::Parts, body: Bytes) -> Result<()> {
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()));
    let scheme = parts.uri.scheme_str().map(str::to_owned);

    ctx.update(|f| {
        f.method = parts.method.as_str().to_owned();
        f.path = parts.uri.path().to_owned();
        f.query_string = parts.uri.query().unwrap_or_default().to_owned();
        f.protocol = protocol_name(parts.version).to_owned();
        if let Some(host) = host {
            f.host = host;
        }
        if let Some(scheme) = scheme {
            f.scheme = scheme;
        }
        f.headers = parts.headers;
        f.body = body;
    })
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2  => "HTTP/2",
        Version::HTTP_3  => "HTTP/3",
        _                => "HTTP/1.1",
    }
}

fn status_only(status: StatusCode) -> http::Response<Full<Bytes>> {
    let mut response = http::Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
