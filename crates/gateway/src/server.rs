use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        body::Bytes,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        http::{HeaderValue, StatusCode},
        middleware::from_fn_with_state,
        response::{IntoResponse, Json, Redirect, Response},
        routing::{get, post},
    },
    homegw_broker::{BrokerConfig, CorrelationBroker, MemoryBus},
    homegw_channels::ChannelNormalizer,
    homegw_config::{CatalogWatcher, HomegwConfig, ProcessorCatalog},
    homegw_protocol::{
        API_PREFIX, HealthResponse, ProcessorListResponse, ProcessorSummary, ReloadResponse,
        TRACE_ID_HEADER,
    },
    homegw_providers::{LlmTransport, OpenAiCompatClient},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use crate::{
    auth_middleware::{ip_gate, require_auth},
    outcome::CommandOutcome,
    pipeline::Orchestrator,
    request_throttle::{RequestThrottle, throttle_gate},
    state::{GatewayState, SecurityPolicy, TelegramChannel},
    webhooks::{telegram_webhook, wechat_work_webhook},
    workers::handle_worker,
    ws::handle_client,
};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
    pub request_throttle: Option<RequestThrottle>,
}

// ── Router ───────────────────────────────────────────────────────────────────

fn api(path: &str) -> String {
    format!("{API_PREFIX}{path}")
}

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app_state = AppState {
        request_throttle: RequestThrottle::per_minute(state.security.rate_limit_per_minute),
        gateway: state,
    };

    // Protected API routes: require the bearer token when one is configured.
    let protected = Router::new()
        .route(&api("/processors"), get(processors_handler))
        .route(&api("/command"), post(command_handler))
        .route(&api("/config/reload"), post(reload_handler))
        .route(&api("/ws"), get(command_ws_handler))
        .route(&api("/workers/ws"), get(worker_ws_handler))
        .layer(from_fn_with_state(app_state.clone(), require_auth));

    Router::new()
        .route("/", get(root_handler))
        .route(&api("/health"), get(health_handler))
        .route(&api("/webhook/telegram"), post(telegram_webhook))
        .route(&api("/webhook/wechat-work"), post(wechat_work_webhook))
        .merge(protected)
        .layer(from_fn_with_state(app_state.clone(), throttle_gate))
        .layer(from_fn_with_state(app_state.clone(), ip_gate))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Assemble the runtime state: LLM client, optional broker, orchestrator
/// and channels.
pub async fn prepare_state(
    config: &HomegwConfig,
    catalog: Arc<ProcessorCatalog>,
    processors_path: Option<PathBuf>,
) -> anyhow::Result<Arc<GatewayState>> {
    let llm: Arc<dyn LlmTransport> =
        Arc::new(OpenAiCompatClient::new(&config.llm).context("failed to build LLM client")?);

    let broker = if config.transport.enabled {
        let broker = CorrelationBroker::start(Arc::new(MemoryBus::new()), BrokerConfig {
            request_topic: config.transport.request_topic.clone(),
            response_topic: config.transport.response_topic.clone(),
            response_timeout: config.transport.response_timeout(),
        })
        .await
        .context("failed to start correlation broker")?;
        Some(Arc::new(broker))
    } else {
        None
    };

    let orchestrator = Arc::new(Orchestrator::new(
        catalog,
        llm,
        broker.clone(),
        config.transport.response_timeout(),
    ));

    let mut state = GatewayState::new(orchestrator, broker, config.llm.model.clone());
    state.processors_path = processors_path;
    state.request_timeout = config.server.request_timeout();
    state.security = SecurityPolicy::from_config(config);
    state.telegram = TelegramChannel::from_config(config)
        .context("failed to set up telegram channel")?
        .map(Arc::new);
    Ok(Arc::new(state))
}

/// Start the gateway HTTP + WebSocket server and run until Ctrl-C.
pub async fn start_gateway(config: HomegwConfig, processors_path: PathBuf) -> anyhow::Result<()> {
    let catalog = Arc::new(
        ProcessorCatalog::load(&processors_path).with_context(|| {
            format!("failed to load processors from {}", processors_path.display())
        })?,
    );

    // Keep the watcher alive for the lifetime of the server.
    let _watcher = if config.processors.watch {
        match CatalogWatcher::start(Arc::clone(&catalog), processors_path.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "processor hot-reload disabled");
                None
            },
        }
    } else {
        None
    };

    let state = prepare_state(&config, Arc::clone(&catalog), Some(processors_path.clone())).await?;
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.server.bind, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Startup banner.
    let transport_line = if config.transport.enabled {
        format!(
            "transport: {} -> {} (timeout {}ms, workers at {})",
            config.transport.request_topic,
            config.transport.response_topic,
            config.transport.response_timeout_ms,
            api("/workers/ws"),
        )
    } else {
        "transport: disabled (commands are resolved, not dispatched)".into()
    };
    let mut lines = vec![
        format!("homegw gateway v{}", state.version),
        format!("listening on http://{addr}{API_PREFIX}"),
        format!("llm: {} @ {}", config.llm.model, config.llm.base_url),
        transport_line,
        format!(
            "processors: {} enabled of {} ({}{})",
            catalog.enabled_count(),
            catalog.len(),
            processors_path.display(),
            if config.processors.watch {
                ", watching"
            } else {
                ""
            }
        ),
        format!(
            "auth: {}",
            if state.security.api_token.is_some() {
                "bearer token required"
            } else {
                "open (no api_token)"
            }
        ),
    ];
    if !state.security.allowlist.is_empty() {
        lines.push(format!("ip allowlist: {} entries", state.security.allowlist.len()));
    }
    if state.telegram.is_some() {
        lines.push(format!("telegram webhook: {}", api("/webhook/telegram")));
    }
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn root_handler() -> Redirect {
    Redirect::temporary(&api("/health"))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let gw = &state.gateway;
    let catalog = gw.catalog();
    let transport = match &gw.broker {
        None => "disabled",
        Some(b) if b.is_healthy() => "ok",
        Some(_) => "subscription_closed",
    };

    let mut components = BTreeMap::new();
    components.insert("llm".to_string(), gw.llm_model.clone());
    components.insert("transport".to_string(), transport.to_string());
    components.insert(
        "catalog".to_string(),
        format!("{} enabled of {}", catalog.enabled_count(), catalog.len()),
    );

    Json(HealthResponse {
        status: if gw.transport_healthy() {
            "ok"
        } else {
            "degraded"
        }
        .to_string(),
        version: gw.version.clone(),
        uptime_secs: gw.uptime().as_secs(),
        components,
    })
}

async fn processors_handler(State(state): State<AppState>) -> Json<ProcessorListResponse> {
    let processors: Vec<ProcessorSummary> = state
        .gateway
        .orchestrator
        .list_enabled()
        .iter()
        .map(ProcessorSummary::from)
        .collect();
    Json(ProcessorListResponse {
        count: processors.len(),
        processors,
    })
}

async fn command_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let gw = &state.gateway;
    let outcome = match ChannelNormalizer::Http.normalize(&body) {
        Ok(message) => {
            let deadline = tokio::time::Instant::now() + gw.request_timeout;
            gw.orchestrator.submit(&message, Some(deadline)).await
        },
        Err(e) => {
            let outcome = CommandOutcome::rejected(e.to_string());
            info!(trace_id = outcome.trace_id(), reason = %e, "command rejected");
            outcome
        },
    };

    let status = match outcome {
        CommandOutcome::Rejected { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    let mut response = (status, Json(outcome.to_response())).into_response();
    if let Ok(value) = HeaderValue::from_str(outcome.trace_id()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

async fn reload_handler(State(state): State<AppState>) -> Response {
    let gw = &state.gateway;
    let Some(path) = gw.processors_path.clone() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ReloadResponse {
                success: false,
                message: "no processors path configured".into(),
                processor_count: gw.catalog().len(),
            }),
        )
            .into_response();
    };

    let catalog = Arc::clone(gw.catalog());
    let result = tokio::task::spawn_blocking(move || catalog.reload_from(&path)).await;
    match result {
        Ok(Ok(count)) => Json(ReloadResponse {
            success: true,
            message: format!("reloaded {count} processors"),
            processor_count: count,
        })
        .into_response(),
        Ok(Err(e)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ReloadResponse {
                success: false,
                message: format!("reload failed, keeping previous catalog: {e}"),
                processor_count: gw.catalog().len(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReloadResponse {
                success: false,
                message: format!("reload task failed: {e}"),
                processor_count: gw.catalog().len(),
            }),
        )
            .into_response(),
    }
}

async fn command_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let gateway = Arc::clone(&state.gateway);
    ws.on_upgrade(move |socket| handle_client(socket, gateway, addr))
}

async fn worker_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let Some(pool) = state.gateway.workers.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "transport is disabled"})),
        )
            .into_response();
    };
    ws.on_upgrade(move |socket| handle_worker(socket, pool, addr))
}
