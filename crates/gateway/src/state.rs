use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    homegw_broker::CorrelationBroker,
    homegw_channels::{ChannelNormalizer, ChannelOutbound, TelegramNormalizer, TelegramOutbound},
    homegw_config::{HomegwConfig, ProcessorCatalog, validate::parse_allowlist_entry},
    ipnet::IpNet,
    secrecy::ExposeSecret,
    tracing::warn,
};

use crate::{pipeline::Orchestrator, workers::WorkerPool};

// ── Security policy ──────────────────────────────────────────────────────────

/// Resolved access rules for the HTTP surface.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    /// Bearer token for protected routes. `None` disables token auth.
    pub api_token: Option<String>,
    /// Allowed client networks. Empty allows everyone.
    pub allowlist: Vec<IpNet>,
    pub behind_proxy: bool,
    /// Requests per client IP per minute. 0 disables throttling.
    pub rate_limit_per_minute: u32,
}

impl SecurityPolicy {
    /// Build from config. Unparsable allowlist entries are skipped with a
    /// warning; `check` reports them as errors beforehand.
    #[must_use]
    pub fn from_config(config: &HomegwConfig) -> Self {
        let allowlist = config
            .security
            .ip_allowlist
            .iter()
            .filter_map(|entry| {
                let net = parse_allowlist_entry(entry);
                if net.is_none() {
                    warn!(entry = %entry, "ignoring invalid ip_allowlist entry");
                }
                net
            })
            .collect();
        Self {
            api_token: config.security.token().map(String::from),
            allowlist,
            behind_proxy: config.security.behind_proxy,
            rate_limit_per_minute: config.security.rate_limit_per_minute,
        }
    }

    #[must_use]
    pub fn allows(&self, ip: std::net::IpAddr) -> bool {
        self.allowlist.is_empty() || self.allowlist.iter().any(|net| net.contains(&ip))
    }
}

// ── Telegram ─────────────────────────────────────────────────────────────────

pub struct TelegramChannel {
    /// Always the `Telegram` variant.
    pub inbound: ChannelNormalizer,
    /// Absent when no bot token is configured; outcomes are then only logged.
    pub outbound: Option<Arc<dyn ChannelOutbound>>,
}

impl TelegramChannel {
    /// `None` when the channel is disabled.
    pub fn from_config(config: &HomegwConfig) -> anyhow::Result<Option<Self>> {
        let tg = &config.channels.telegram;
        if !tg.enabled {
            return Ok(None);
        }
        let inbound = ChannelNormalizer::Telegram(TelegramNormalizer::new(
            tg.webhook_secret
                .as_ref()
                .map(|s| s.expose_secret().clone()),
        ));
        let outbound = match tg.bot_token.clone() {
            Some(token) if !token.expose_secret().is_empty() => {
                let sender = TelegramOutbound::new(
                    tg.api_base_url.clone(),
                    token,
                    Duration::from_secs(tg.reply_timeout_secs),
                )?;
                Some(Arc::new(sender) as Arc<dyn ChannelOutbound>)
            },
            _ => {
                warn!("telegram enabled without bot_token; replies will not be sent");
                None
            },
        };
        Ok(Some(Self {
            inbound,
            outbound,
        }))
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across handlers.
pub struct GatewayState {
    pub version: String,
    pub started_at: Instant,
    pub orchestrator: Arc<Orchestrator>,
    pub broker: Option<Arc<CorrelationBroker>>,
    /// Remote workers sharing the broker's request topic.
    pub workers: Option<Arc<WorkerPool>>,
    /// Model name, for health output.
    pub llm_model: String,
    /// Where processors are reloaded from; `None` disables reload.
    pub processors_path: Option<PathBuf>,
    /// Outer deadline for one submitted command.
    pub request_timeout: Duration,
    pub security: SecurityPolicy,
    pub telegram: Option<Arc<TelegramChannel>>,
}

impl GatewayState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        broker: Option<Arc<CorrelationBroker>>,
        llm_model: impl Into<String>,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            orchestrator,
            workers: broker.clone().map(|b| Arc::new(WorkerPool::new(b))),
            broker,
            llm_model: llm_model.into(),
            processors_path: None,
            request_timeout: Duration::from_secs(30),
            security: SecurityPolicy::default(),
            telegram: None,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<ProcessorCatalog> {
        self.orchestrator.catalog()
    }

    /// `false` once the broker's response subscription has closed.
    #[must_use]
    pub fn transport_healthy(&self) -> bool {
        self.broker.as_ref().is_none_or(|b| b.is_healthy())
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
