use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("APP")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?.add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Self::with_defaults(Config::builder())?
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("APP").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("engine.sweep_interval_secs", default_sweep_interval_secs() as i64)?
            .set_default("engine.max_save_retries", default_max_save_retries() as i64)?
            .set_default("engine.signal_buffer", default_signal_buffer() as i64)
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Approval engine tuning.
///
/// Keep `sweep_interval_secs` at or below a tenth of the smallest stage
/// timeout so escalations land close to their deadline.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_save_retries")]
    pub max_save_retries: u32,
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            max_save_retries: default_max_save_retries(),
            signal_buffer: default_signal_buffer(),
        }
    }

    pub fn with_sweep_interval(mut self, seconds: u64) -> Self {
        self.sweep_interval_secs = seconds;
        self
    }

    pub fn with_max_save_retries(mut self, retries: u32) -> Self {
        self.max_save_retries = retries;
        self
    }

    pub fn with_signal_buffer(mut self, buffer: usize) -> Self {
        self.signal_buffer = buffer;
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_save_retries() -> u32 {
    3
}

fn default_signal_buffer() -> usize {
    1024
}

/// One value band of the tiered router. `max` is exclusive; `None` means unbounded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TierConfig {
    pub level: u8,
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    pub approver_role: String,
    pub sla_hours: u32,
    #[serde(default)]
    pub multi_approval_required: bool,
}

/// A rung of the discount ladder, triggered when the discount exceeds `above_percent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiscountRuleConfig {
    pub above_percent: f64,
    pub level: u8,
    pub approver_role: String,
}

/// Escalation inputs consumed by the tiered router
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,
    #[serde(default = "default_discount_ladder")]
    pub discount_ladder: Vec<DiscountRuleConfig>,
    #[serde(default = "default_minimum_margin_percent")]
    pub minimum_margin_percent: f64,
    #[serde(default = "default_margin_breach_level")]
    pub margin_breach_level: u8,
    #[serde(default = "default_margin_breach_role")]
    pub margin_breach_role: String,
}

impl RoutingConfig {
    pub fn with_tiers(mut self, tiers: Vec<TierConfig>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_discount_ladder(mut self, ladder: Vec<DiscountRuleConfig>) -> Self {
        self.discount_ladder = ladder;
        self
    }

    pub fn with_minimum_margin(mut self, percent: f64, level: u8, role: impl Into<String>) -> Self {
        self.minimum_margin_percent = percent;
        self.margin_breach_level = level;
        self.margin_breach_role = role.into();
        self
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            discount_ladder: default_discount_ladder(),
            minimum_margin_percent: default_minimum_margin_percent(),
            margin_breach_level: default_margin_breach_level(),
            margin_breach_role: default_margin_breach_role(),
        }
    }
}

fn tier(level: u8, min: f64, max: Option<f64>, role: &str, sla_hours: u32, multi: bool) -> TierConfig {
    TierConfig {
        level,
        min,
        max,
        approver_role: role.to_string(),
        sla_hours,
        multi_approval_required: multi,
    }
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        tier(1, 0.0, Some(50_000.0), "department_manager", 24, false),
        tier(2, 50_000.0, Some(100_000.0), "finance_manager", 48, false),
        tier(3, 100_000.0, Some(500_000.0), "director", 72, true),
        tier(4, 500_000.0, None, "cfo", 96, true),
    ]
}

fn default_discount_ladder() -> Vec<DiscountRuleConfig> {
    [
        (10.0, 1, "sales_manager"),
        (20.0, 2, "sales_director"),
        (30.0, 3, "vp_sales"),
    ]
    .into_iter()
    .map(|(above_percent, level, role)| DiscountRuleConfig {
        above_percent,
        level,
        approver_role: role.to_string(),
    })
    .collect()
}

fn default_minimum_margin_percent() -> f64 {
    15.0
}

fn default_margin_breach_level() -> u8 {
    2
}

fn default_margin_breach_role() -> String {
    "finance_controller".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_creation() {
        let config = ServerConfig::new()
            .with_host("127.0.0.1".to_string())
            .with_port(3000);

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.max_save_retries, 3);
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let config = EngineConfig::new().with_sweep_interval(0);
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_tiers_are_contiguous() {
        let routing = RoutingConfig::default();
        assert_eq!(routing.tiers.first().map(|t| t.min), Some(0.0));
        for pair in routing.tiers.windows(2) {
            assert_eq!(pair[0].max, Some(pair[1].min));
            assert!(pair[0].level < pair[1].level);
        }
        assert!(routing.tiers.last().and_then(|t| t.max).is_none());
    }

    #[test]
    fn test_load_from_env_uses_defaults() {
        let config = AppConfig::load_from_env("APPROVAL_CORE_UNSET_PREFIX").unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.engine.sweep_interval_secs, 300);
        assert_eq!(config.routing.tiers.len(), 4);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "approval-core-config-{}.toml",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(
            &path,
            r#"
[server]
port = 9090

[engine]
sweep_interval_secs = 30

[routing]
minimum_margin_percent = 12.5
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.engine.sweep_interval_secs, 30);
        assert_eq!(config.engine.max_save_retries, 3);
        assert_eq!(config.routing.minimum_margin_percent, 12.5);
        assert_eq!(config.routing.discount_ladder.len(), 3);
    }
}
