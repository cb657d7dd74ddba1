//! Axum-based HTTP surface of the gateway

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use axum::{Json, Router};
use keyrelay_core::{
    AdapterRegistry, ChatRequest, DispatchConfig, Dispatcher, ProviderRecord, ProviderRegistry,
    UnifiedSecretIssuer,
};
use keyrelay_store::CredentialStore;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::auth;
use crate::error::ApiError;
use crate::protocol::{
    AdminRequest, AuthResponse, HealthResponse, KeysAction, ManageResponse, PROVIDER_INDEX_HEADER,
    UnifiedKeyResponse,
};

/// Shared state for every request
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub providers: ProviderRegistry,
    pub issuer: UnifiedSecretIssuer,
    pub admin_password: Arc<str>,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        adapters: AdapterRegistry,
        dispatch: DispatchConfig,
        admin_password: impl Into<String>,
    ) -> Self {
        let providers = ProviderRegistry::new(store.clone());
        Self {
            dispatcher: Dispatcher::new(providers.clone(), adapters, dispatch),
            providers,
            issuer: UnifiedSecretIssuer::new(store),
            admin_password: Arc::from(admin_password.into()),
            start_time: Instant::now(),
        }
    }

    fn check_admin(&self, password: Option<&str>) -> Result<(), ApiError> {
        if self.admin_password.is_empty() {
            return Err(ApiError::AdminNotConfigured);
        }
        match password {
            Some(p) if auth::verify_secret(&self.admin_password, p) => Ok(()),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, state: GatewayState) -> Self {
        Self { state, bind }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn routes() -> Router<GatewayState> {
    Router::new()
        .route("/health", get(health_handler).fallback(method_not_allowed))
        .route("/auth", post_only(auth_handler))
        .route("/keys", post_only(keys_handler))
        .route("/manage", post_only(manage_handler))
        .route("/proxy", post_only(proxy_handler))
        .route("/v1/chat/completions", post_only(proxy_handler))
}

fn post_only<H, T>(handler: H) -> MethodRouter<GatewayState>
where
    H: axum::handler::Handler<T, GatewayState>,
    T: 'static,
{
    post(handler).fallback(method_not_allowed)
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
}

// ── HTTP Handlers ──

async fn health_handler(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn auth_handler(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: AdminRequest = parse_json(&body)?;
    match state.check_admin(req.password.as_deref()) {
        Ok(()) => Ok(Json(AuthResponse {
            authenticated: true,
        })
        .into_response()),
        Err(ApiError::Unauthorized) => {
            warn!("Admin login rejected");
            let mut body = ApiError::Unauthorized.body();
            body["authenticated"] = json!(false);
            Ok((StatusCode::UNAUTHORIZED, Json(body)).into_response())
        }
        Err(e) => Err(e),
    }
}

async fn keys_handler(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let req: AdminRequest = parse_json(&body)?;
    state.check_admin(req.password.as_deref())?;

    let action = KeysAction::parse(req.action.as_deref()).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "unknown action '{}'",
            req.action.as_deref().unwrap_or_default()
        ))
    })?;

    let response = match action {
        KeysAction::List => Json(state.providers.list().await?).into_response(),
        KeysAction::GetUnifiedKey => Json(UnifiedKeyResponse {
            unified_key: state.issuer.get_or_create().await?,
        })
        .into_response(),
        KeysAction::ResetUnifiedKey => Json(UnifiedKeyResponse {
            unified_key: state.issuer.reset().await?,
        })
        .into_response(),
    };
    Ok(response)
}

async fn manage_handler(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<ManageResponse>, ApiError> {
    let req: AdminRequest = parse_json(&body)?;
    state.check_admin(req.password.as_deref())?;

    let raw = req
        .keys
        .ok_or_else(|| ApiError::BadRequest("'keys' is required".to_string()))?;
    let records: Vec<ProviderRecord> = serde_json::from_value(raw).map_err(|e| {
        ApiError::BadRequest(format!("'keys' must be an array of provider records: {}", e))
    })?;

    state.providers.replace(&records).await?;
    Ok(Json(ManageResponse {
        message: "API keys updated successfully.".to_string(),
        count: records.len(),
    }))
}

async fn proxy_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let expected = state.issuer.current().await?;
    let authorized = expected
        .as_deref()
        .zip(auth::bearer_from_headers(&headers))
        .is_some_and(|(expected, token)| auth::verify_secret(expected, token));
    if !authorized {
        return Err(ApiError::Unauthorized);
    }

    let request: ChatRequest = parse_json(&body)?;
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("'messages' must not be empty".to_string()));
    }
    if request.stream == Some(true) {
        debug!("Streaming requested; answering with a single response");
    }

    let dispatched = state.dispatcher.dispatch(&request).await?;
    info!(
        "Proxy request served by provider {} ({})",
        dispatched.provider_index, dispatched.response.provider
    );

    let mut response = Json(dispatched.response).into_response();
    response.headers_mut().insert(
        PROVIDER_INDEX_HEADER,
        HeaderValue::from(dispatched.provider_index),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use keyrelay_core::{
        ChatChoice, ChatResponse, Platform, ProviderAdapter, ProviderError, RelayError,
    };
    use keyrelay_store::MemoryStore;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const PASSWORD: &str = "correct horse";

    /// Succeeds for secrets starting with "ok", fails otherwise
    struct SpyAdapter {
        platform: Platform,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProviderAdapter for SpyAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn invoke(
            &self,
            record: &ProviderRecord,
            _request: &ChatRequest,
        ) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if record.secret_key.starts_with("ok") {
                Ok(ChatResponse::new(
                    self.platform.as_str(),
                    None,
                    "spy-model",
                    vec![ChatChoice::assistant(0, "hello from spy", Some("stop".into()))],
                ))
            } else {
                Err(ProviderError::Call(anyhow::anyhow!(
                    "{} exploded",
                    record.secret_key
                )))
            }
        }
    }

    struct TestApp {
        router: Router,
        state: GatewayState,
        calls: Arc<AtomicUsize>,
    }

    fn app(admin_password: &str) -> TestApp {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut adapters = AdapterRegistry::empty();
        for platform in [Platform::Openai, Platform::Kimi] {
            adapters.register(Arc::new(SpyAdapter {
                platform,
                calls: calls.clone(),
            }));
        }
        let state = GatewayState::new(
            Arc::new(MemoryStore::new()),
            adapters,
            DispatchConfig::default(),
            admin_password,
        );
        TestApp {
            router: build_router(state.clone()),
            state,
            calls,
        }
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: &str,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, value)
    }

    async fn seed(app: &TestApp, records: &[ProviderRecord]) {
        app.state.providers.replace(records).await.unwrap();
    }

    fn chat_body() -> String {
        json!({"messages": [{"role": "user", "content": "hi"}]}).to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(PASSWORD);
        for uri in ["/health", "/api/health"] {
            let (status, _, body) = send(&app.router, "GET", uri, None, "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
        }
    }

    #[tokio::test]
    async fn test_wrong_method_is_405_json() {
        let app = app(PASSWORD);
        for uri in ["/proxy", "/api/keys", "/auth", "/manage"] {
            let (status, _, body) = send(&app.router, "GET", uri, None, "").await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{uri}");
            assert_eq!(body["error"]["code"], "method_not_allowed");
        }
    }

    #[tokio::test]
    async fn test_auth_endpoint() {
        let app = app(PASSWORD);
        let ok = json!({"password": PASSWORD}).to_string();
        let (status, _, body) = send(&app.router, "POST", "/api/auth", None, &ok).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["authenticated"], true);

        let bad = json!({"password": "nope"}).to_string();
        let (status, _, body) = send(&app.router, "POST", "/auth", None, &bad).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["authenticated"], false);
        assert_eq!(body["error"]["code"], "unauthorized");

        let (status, _, body) = send(&app.router, "POST", "/auth", None, "{}").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["authenticated"], false);

        let (status, _, body) = send(&app.router, "POST", "/auth", None, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_admin_password_not_configured() {
        let app = app("");
        let body = json!({"password": ""}).to_string();
        for uri in ["/auth", "/keys", "/manage"] {
            let (status, _, resp) = send(&app.router, "POST", uri, None, &body).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(resp["error"]["code"], "admin_not_configured");
        }
    }

    #[tokio::test]
    async fn test_manage_then_keys_round_trip() {
        let app = app(PASSWORD);
        let keys = json!([
            {"platform": "kimi", "secretKey": "sk-kimi", "model": "moonshot-v1-8k"},
            {"platform": "openai", "secretKey": "sk-openai", "model": "gpt-4o-mini"},
            {"platform": "llama", "secretKey": "-", "baseURL": "http://localhost:11434", "model": "llama3"}
        ]);
        let manage = json!({"password": PASSWORD, "keys": keys}).to_string();
        let (status, _, body) = send(&app.router, "POST", "/api/manage", None, &manage).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);

        let read = json!({"password": PASSWORD}).to_string();
        let (status, _, body) = send(&app.router, "POST", "/keys", None, &read).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, keys);
    }

    #[tokio::test]
    async fn test_keys_empty_list() {
        let app = app(PASSWORD);
        let read = json!({"password": PASSWORD}).to_string();
        let (status, _, body) = send(&app.router, "POST", "/keys", None, &read).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_manage_rejects_bad_payloads() {
        let app = app(PASSWORD);
        let cases = [
            json!({"password": PASSWORD}),
            json!({"password": PASSWORD, "keys": ["sk-1", "sk-2"]}),
            json!({"password": PASSWORD, "keys": [{"platform": "mistral", "secretKey": "k"}]}),
            json!({"password": PASSWORD, "keys": [{"platform": "openai-compatible", "secretKey": "k"}]}),
        ];
        for case in cases {
            let (status, _, body) =
                send(&app.router, "POST", "/manage", None, &case.to_string()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{case}");
            assert_eq!(body["error"]["code"], "bad_request");
        }

        let wrong_pw = json!({"password": "x", "keys": []}).to_string();
        let (status, _, _) = send(&app.router, "POST", "/manage", None, &wrong_pw).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unified_key_get_and_reset() {
        let app = app(PASSWORD);
        let get = json!({"password": PASSWORD, "action": "get_unified_key"}).to_string();
        let (_, _, first) = send(&app.router, "POST", "/keys", None, &get).await;
        let (_, _, second) = send(&app.router, "POST", "/api/keys", None, &get).await;
        assert_eq!(first["unifiedKey"], second["unifiedKey"]);

        let reset = json!({"password": PASSWORD, "action": "reset_unified_key"}).to_string();
        let (status, _, fresh) = send(&app.router, "POST", "/keys", None, &reset).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(fresh["unifiedKey"], first["unifiedKey"]);

        let (_, _, after) = send(&app.router, "POST", "/keys", None, &get).await;
        assert_eq!(after["unifiedKey"], fresh["unifiedKey"]);

        let unknown = json!({"password": PASSWORD, "action": "nuke"}).to_string();
        let (status, _, _) = send(&app.router, "POST", "/keys", None, &unknown).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_proxy_rejects_missing_or_wrong_secret() {
        let app = app(PASSWORD);
        seed(&app, &[ProviderRecord::new(Platform::Openai, "ok-1").with_model("m")]).await;

        let (status, _, body) = send(&app.router, "POST", "/proxy", None, &chat_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");

        let (status, _, _) =
            send(&app.router, "POST", "/proxy", Some("sk-relay-guess"), &chat_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Old secret stops working after reset
        let old = app.state.issuer.get_or_create().await.unwrap();
        app.state.issuer.reset().await.unwrap();
        let (status, _, _) = send(&app.router, "POST", "/proxy", Some(old.as_str()), &chat_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(app.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_proxy_leaves_secret_unset() {
        let app = app(PASSWORD);
        seed(&app, &[ProviderRecord::new(Platform::Openai, "ok-1").with_model("m")]).await;

        let (status, _, _) = send(&app.router, "POST", "/proxy", None, &chat_body()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _, _) =
            send(&app.router, "POST", "/v1/chat/completions", Some("sk-relay-guess"), &chat_body())
                .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(app.state.issuer.current().await.unwrap(), None);
        assert_eq!(app.calls.load(Ordering::SeqCst), 0);

        // Minted on the admin path, then accepted
        let secret = app.state.issuer.get_or_create().await.unwrap();
        let (status, _, _) =
            send(&app.router, "POST", "/proxy", Some(secret.as_str()), &chat_body()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_proxy_without_providers_is_503() {
        let app = app(PASSWORD);
        let secret = app.state.issuer.get_or_create().await.unwrap();
        let (status, _, body) =
            send(&app.router, "POST", "/proxy", Some(secret.as_str()), &chat_body()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "no_providers_configured");
        assert_eq!(app.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_proxy_fails_over() {
        let app = app(PASSWORD);
        seed(
            &app,
            &[
                ProviderRecord::new(Platform::Openai, "bad-1").with_model("m"),
                ProviderRecord::new(Platform::Kimi, "ok-2").with_model("m"),
                ProviderRecord::new(Platform::Openai, "ok-3").with_model("m"),
            ],
        )
        .await;
        let secret = app.state.issuer.get_or_create().await.unwrap();

        let (status, headers, body) =
            send(&app.router, "POST", "/api/proxy", Some(secret.as_str()), &chat_body()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[PROVIDER_INDEX_HEADER], "1");
        assert_eq!(body["provider"], "kimi");
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "hello from spy");
        assert_eq!(app.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_proxy_all_failed_reports_last_error() {
        let app = app(PASSWORD);
        seed(
            &app,
            &[
                ProviderRecord::new(Platform::Openai, "bad-1").with_model("m"),
                ProviderRecord::new(Platform::Kimi, "bad-2").with_model("m"),
            ],
        )
        .await;
        let secret = app.state.issuer.get_or_create().await.unwrap();

        let (status, _, body) =
            send(&app.router, "POST", "/v1/chat/completions", Some(secret.as_str()), &chat_body()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "all_providers_failed");
        assert_eq!(body["error"]["detail"], "bad-2 exploded");
    }

    #[tokio::test]
    async fn test_proxy_rejects_malformed_requests() {
        let app = app(PASSWORD);
        seed(&app, &[ProviderRecord::new(Platform::Openai, "ok-1").with_model("m")]).await;
        let secret = app.state.issuer.get_or_create().await.unwrap();

        let (status, _, _) = send(&app.router, "POST", "/proxy", Some(secret.as_str()), "{oops").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let empty = json!({"messages": []}).to_string();
        let (status, _, _) = send(&app.router, "POST", "/proxy", Some(secret.as_str()), &empty).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(app.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_proxy_accepts_stream_flag() {
        let app = app(PASSWORD);
        seed(&app, &[ProviderRecord::new(Platform::Openai, "ok-1").with_model("m")]).await;
        let secret = app.state.issuer.get_or_create().await.unwrap();

        let body = json!({
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })
        .to_string();
        let (status, _, resp) = send(&app.router, "POST", "/proxy", Some(secret.as_str()), &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["choices"][0]["message"]["content"], "hello from spy");
    }

    #[test]
    fn test_relay_error_into_api_error() {
        let err: ApiError = RelayError::NoProvidersConfigured.into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
