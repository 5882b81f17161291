//! Runtime configuration
//!
//! Every field can be overridden from the environment:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | RETURNS_DB_PATH | returns.db | sled database directory |
//! | COUPON_PREFIX | EXC | prefix of customer-facing coupon codes |
//! | RETURN_WINDOW_DAYS | 30 | days after delivery a return may be opened |
//! | COUPON_VALIDITY_MONTHS | 6 | months a coupon stays redeemable |
//! | COUPON_CODE_ATTEMPTS | 16 | code regenerations before issuance gives up |
//! | LABEL_BASE_URL | https://labels.example.invalid | base of generated shipping label urls |
//! | LOG_LEVEL | info | tracing filter directive |

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub coupon_prefix: String,
    pub return_window_days: i64,
    pub coupon_validity_months: u32,
    pub coupon_code_attempts: u32,
    pub label_base_url: String,
    pub log_level: String,
}

impl Config {
    /// Load from the environment, falling back to defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("RETURNS_DB_PATH").unwrap_or_else(|_| "returns.db".into()),
            coupon_prefix: std::env::var("COUPON_PREFIX").unwrap_or_else(|_| "EXC".into()),
            return_window_days: std::env::var("RETURN_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            coupon_validity_months: std::env::var("COUPON_VALIDITY_MONTHS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6),
            coupon_code_attempts: std::env::var("COUPON_CODE_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(16),
            label_base_url: std::env::var("LABEL_BASE_URL")
                .unwrap_or_else(|_| "https://labels.example.invalid".into()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    /// Environment config pointed at another database. Used by tests and the demo.
    pub fn with_db_path(db_path: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.db_path = db_path.into();
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
