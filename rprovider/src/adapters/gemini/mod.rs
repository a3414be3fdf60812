mod auth;
mod provider;
mod serde_api;
mod transport;
mod types;

pub use provider::GeminiProvider;
pub use transport::{GeminiChunkStream, GeminiHttpTransport, GeminiTransport};
pub use types::{
    GeminiAuth, GeminiContent, GeminiFinishReason, GeminiRequest, GeminiResponse, GeminiRole,
    GeminiStreamChunk, GeminiUsage,
};
