//! Common `rprovider` imports for downstream crates.

pub use crate::{
    BoxedEventStream, ConversationContext, FallbackHooks, FallbackInvoker, FallbackPlan,
    Invocation, InvocationStrategy, Message, ModelCandidate, ModelEventStream, ModelProvider,
    ModelRequest, ModelResponse, NoopFallbackHooks, ProviderError, ProviderErrorKind, ProviderId,
    ProviderRegistry, Role, StopReason, StreamEvent, TokenUsage,
};
pub use rcommon::{BoxFuture, GenerationOptions, MetadataMap};
