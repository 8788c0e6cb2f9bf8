/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub work_dir: String,
    pub message_tcp_port: u16,
    pub environment: String,

    /// Admin-feed low stock threshold (units)
    pub low_stock_threshold: i64,
    /// Reconciliation re-broadcast cadence (seconds)
    pub reconcile_interval_secs: u64,
    /// Stale connection sweep cadence (seconds)
    pub sweep_interval_secs: u64,
    /// How long a connection may stay unauthenticated (seconds)
    pub auth_grace_secs: u64,
    /// Inbound frame channel capacity
    pub channel_capacity: usize,
    /// Budget for the checkout reserve + persist section (milliseconds)
    pub checkout_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/market".into()),
            message_tcp_port: std::env::var("MESSAGE_TCP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8081),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            low_stock_threshold: std::env::var("LOW_STOCK_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            reconcile_interval_secs: std::env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            auth_grace_secs: std::env::var("AUTH_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            channel_capacity: std::env::var("CHANNEL_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1024),
            checkout_timeout_ms: std::env::var("CHECKOUT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
        }
    }

    /// Create a config with custom overrides (tests)
    pub fn with_overrides(work_dir: impl Into<String>, message_tcp_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.message_tcp_port = message_tcp_port;
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
