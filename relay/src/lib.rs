//! Support-chat relay server.
//!
//! Wires the store, cache, provider fallback plan and chat engine together and
//! serves them over HTTP (`POST /chat`, `POST /chat/ws`, `GET /chat/{sessionId}`)
//! and WebSocket (`/chat/ws`).

pub mod config;
pub mod gateway;
pub mod http;
pub mod membership;
pub mod providers;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use rchat::ChatService;
use robserve::{CombinedObservabilityHooks, SafeFallbackHooks, SafeTurnHooks};
use rstore::VolatileCache;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub use config::RelayConfig;
pub use gateway::{Connection, GatewayFrame};
pub use http::ApiError;
pub use membership::{ClientId, Membership};

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub cache: Arc<dyn VolatileCache>,
    pub membership: Membership,
}

impl AppState {
    pub fn new(chat: ChatService, cache: Arc<dyn VolatileCache>) -> Self {
        Self {
            chat,
            cache,
            membership: Membership::new(),
        }
    }
}

/// Opens the store and builds the chat service described by `config`.
pub async fn build_state(config: &RelayConfig) -> anyhow::Result<AppState> {
    let repository = rstore::create_repository(config.store.clone()).await?;
    let cache = rstore::create_cache(config.cache.clone()).await;
    let hooks = CombinedObservabilityHooks::new(config.metrics_enabled);

    let registry = providers::build_registry(config)?;
    let invoker = providers::build_invoker(
        config,
        registry,
        Arc::new(SafeFallbackHooks::new(hooks)),
    )?;

    let chat = ChatService::builder(repository, Arc::new(invoker))
        .cache(cache.clone())
        .policy(config.policy.clone())
        .hooks(Arc::new(SafeTurnHooks::new(hooks)))
        .build();

    Ok(AppState::new(chat, cache))
}

pub fn router(state: AppState, config: &RelayConfig) -> Router {
    Router::new()
        .merge(http::routes())
        .merge(gateway::routes())
        .layer(cors_layer(config))
        .with_state(state)
}

pub fn cors_layer(config: &RelayConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(http::SESSION_ID_HEADER)]);

    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(phase = "startup", event = "invalid_cors_origin", origin = %origin);
                None
            }
        })
        .collect::<Vec<_>>();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
