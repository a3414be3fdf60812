#[cfg(any(feature = "provider-gemini", feature = "provider-openai"))]
pub(crate) mod sse;

#[cfg(feature = "provider-gemini")]
pub mod gemini;

#[cfg(feature = "provider-openai")]
pub mod openai;
