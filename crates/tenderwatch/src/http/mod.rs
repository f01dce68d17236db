//! HTTP API.
//!
//! | method            | path                    |                                 |
//! |-------------------|-------------------------|---------------------------------|
//! | `GET`             | `/api/v1/data`          | page through record ids         |
//! | `PUT`, `POST`     | `/api/v1/data`          | submit a record                 |
//! | `GET`             | `/api/v1/data/{ids}`    | fetch up to 100 records         |
//! | `PUT`, `POST`     | `/api/v1/data/{id}`     | submit a record under its id    |

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use tenderwatch_store::Shutdown;

use crate::error::{Result, ServiceError};
use crate::service::Service;

pub use error::ApiError;

/// Prefix of every API route.
pub const API_PREFIX: &str = "/api/v1";
/// The record collection.
pub const DATA_PATH: &str = "/api/v1/data";

/// Build the router over a shared service.
pub fn router(service: Arc<Service>) -> Router {
    Router::new()
        .route(
            DATA_PATH,
            get(handlers::list)
                .put(handlers::put_collection)
                .post(handlers::put_collection)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            &format!("{DATA_PATH}/:id"),
            get(handlers::get_items)
                .put(handlers::put_item)
                .post(handlers::put_item)
                .fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve until `shutdown` fires, then drain in-flight requests.
pub async fn serve(service: Arc<Service>, addr: SocketAddr, mut shutdown: Shutdown) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::io(addr.to_string(), e))?;
    tracing::info!(%addr, readonly = service.is_readonly(), "listening");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await
        .map_err(|e| ServiceError::io(addr.to_string(), e))
}
