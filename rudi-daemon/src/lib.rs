//! Node daemon: metadata watcher, send processor, waiting-room sweep,
//! control socket and Portal report callback.

pub mod callback;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_purge, request_send, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse, ResponseError,
};
pub use runtime::{init_tracing, run, run_with_engine, start_blocking, SendStats, SendSummary};
