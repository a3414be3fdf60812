//! Provider contracts, streaming events, and the model fallback invoker.
//!
//! ```rust
//! use rprovider::{ConversationContext, InvocationStrategy, Role};
//!
//! let context = ConversationContext::new("Be helpful.", "Do you ship to Canada?");
//! let request = context.to_request(InvocationStrategy::Stateless, "gemini-1.5-flash", Default::default());
//!
//! assert_eq!(request.messages.len(), 1);
//! assert_eq!(request.messages[0].role, Role::User);
//! ```

mod context;
mod credentials;
mod error;
mod fallback;
mod model;
mod provider;
mod registry;
mod stream;

pub mod adapters;
pub mod prelude;

pub use context::{ConversationContext, InvocationStrategy};
pub use credentials::{SecretString, SecureCredentialManager};
pub use error::{ProviderError, ProviderErrorKind};
pub use fallback::{
    FallbackHooks, FallbackInvoker, FallbackPlan, Invocation, ModelCandidate, NoopFallbackHooks,
};
pub use model::{
    Message, ModelRequest, ModelRequestBuilder, ModelResponse, ProviderId, Role, StopReason,
    TokenUsage,
};
pub use provider::{ModelProvider, ProviderFuture};
pub use registry::ProviderRegistry;
pub use stream::{BoxedEventStream, ModelEventStream, StreamEvent, VecEventStream};

pub use rcommon::{BoxFuture, GenerationOptions, MetadataMap};
