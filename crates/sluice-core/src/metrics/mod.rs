//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and the `/metrics` + `/health` endpoint

pub mod events;
pub mod server;

pub use server::{MetricsController, init_global, init_test};

/// Emit an internal event, recording its Prometheus metric.
///
/// ```ignore
/// use sluice_core::emit;
/// use sluice_core::metrics::events::RowsRead;
///
/// emit!(RowsRead { count: 100, target: "hits".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
