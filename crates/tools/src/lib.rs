//! Tool control plane for the gateway: tool descriptors plus the
//! recovery/retry/timeout/concurrency wrapping stages around their
//! execution, and a rolling metrics collector over completed invocations.
//!
//! # Usage
//! ```rust,ignore
//! use ax_tools::{ControlPlane, ExecutionContext};
//! use ax_tools::timeout::CancelSignal;
//!
//! let plane = ControlPlane::default();
//! plane.register(ax_tools::builtin::echo_tool());
//! let ctx = ExecutionContext { session_id: "s1".into(), cancel: CancelSignal::new() };
//! let result = plane.execute("echo", serde_json::json!({"message": "hi"}), ctx).await?;
//! ```

pub mod builtin;
pub mod concurrency;
pub mod control_plane;
pub mod descriptor;
pub mod metrics;
pub mod recovery;
pub mod retry;
pub mod timeout;

pub use concurrency::{ConcurrencyManager, SlotGuard};
pub use control_plane::ControlPlane;
pub use descriptor::{ExecutionContext, ToolDescriptor, ToolError, ToolExecuteFn, ToolInitFn};
pub use metrics::{MetricsCollector, ToolMetrics};
pub use recovery::{ErrorRecovery, RecoveryStrategy};
pub use retry::{RetryManager, RetryPolicy};
pub use timeout::{CancelSignal, TimeoutManager};

impl Default for ControlPlane {
    fn default() -> Self {
        ControlPlane::new(
            TimeoutManager::new(timeout::DEFAULT_TIMEOUT_MS),
            RetryManager::new(RetryPolicy::default()),
            ConcurrencyManager::default(),
            ErrorRecovery::default(),
            MetricsCollector::default(),
        )
    }
}
