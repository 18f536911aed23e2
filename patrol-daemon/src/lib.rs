//! Patrol daemon runtime: poll-timer sync loop, collector timer, and
//! Unix-socket control server.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_gc, request_pending, request_status, request_stop, request_sync, send_request,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking};
