//! HTTP layer for the georeport pipeline.
//!
//! - `POST /webhook/minio`: storage notifications, queued or forwarded to an action
//! - `POST /init`, `POST /run`: a pipeline stage hosted as an on-demand action
//! - `GET /health*`: health checks

pub mod invoker;
pub mod response;
pub mod routes;
pub mod state;

pub use invoker::{ActionInvoker, InvokerConfig};
pub use routes::router;
pub use state::{ActionStage, ActionStageKind, AppState, IngressMode};
