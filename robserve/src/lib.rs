//! Observability hooks for model fallback attempts and chat turns.
//!
//! ```rust
//! use robserve::{MetricsObservabilityHooks, SafeFallbackHooks, TracingObservabilityHooks};
//!
//! let _fallback_hooks = SafeFallbackHooks::new(TracingObservabilityHooks);
//! let _metrics = MetricsObservabilityHooks;
//! ```

mod combined;
mod metrics_hooks;
mod safe_hooks;
mod tracing_hooks;

pub use combined::CombinedObservabilityHooks;
pub use metrics_hooks::MetricsObservabilityHooks;
pub use safe_hooks::{SafeFallbackHooks, SafeTurnHooks};
pub use tracing_hooks::TracingObservabilityHooks;

pub mod prelude {
    pub use crate::{
        CombinedObservabilityHooks, MetricsObservabilityHooks, SafeFallbackHooks, SafeTurnHooks,
        TracingObservabilityHooks,
    };
}
