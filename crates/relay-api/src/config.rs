//! Configuration management for the Sintegre webhook relay.

use std::{collections::HashSet, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use relay_pipeline::{
    notify::{AirflowAuth, AirflowRoute, DEFAULT_MIDDLE_PRODUCTS},
    NotifierConfig, RetryPolicy,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The middle Airflow route is optional: it activates only when every
/// `airflow_middle_*` value is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    // Files
    /// Scratch directory downloaded files are staged in.
    ///
    /// Environment variable: `TEMP_DIR`
    #[serde(default = "default_temp_dir", alias = "TEMP_DIR")]
    pub temp_dir: String,
    /// S3 bucket uploaded files land in.
    ///
    /// Environment variable: `S3_BUCKET`
    #[serde(default = "default_s3_bucket", alias = "S3_BUCKET")]
    pub s3_bucket: String,

    // Airflow, default route
    /// Airflow REST API base URL.
    ///
    /// Environment variable: `AIRFLOW_BASE_URL`
    #[serde(default = "default_airflow_base_url", alias = "AIRFLOW_BASE_URL")]
    pub airflow_base_url: String,
    /// DAG triggered for stored files.
    ///
    /// Environment variable: `AIRFLOW_DAG_ID`
    #[serde(default = "default_airflow_dag_id", alias = "AIRFLOW_DAG_ID")]
    pub airflow_dag_id: String,
    /// Airflow basic-auth username.
    ///
    /// Environment variable: `AIRFLOW_USERNAME`
    #[serde(default = "default_airflow_username", alias = "AIRFLOW_USERNAME")]
    pub airflow_username: String,
    /// Airflow basic-auth password.
    ///
    /// Environment variable: `AIRFLOW_PASSWORD`
    #[serde(default, alias = "AIRFLOW_PASSWORD")]
    pub airflow_password: String,

    // Airflow, middle route (optional)
    /// Middle Airflow REST API base URL.
    ///
    /// Environment variable: `AIRFLOW_MIDDLE_BASE_URL`
    #[serde(default, alias = "AIRFLOW_MIDDLE_BASE_URL")]
    pub airflow_middle_base_url: Option<String>,
    /// DAG triggered on the middle deployment.
    ///
    /// Environment variable: `AIRFLOW_MIDDLE_DAG_ID`
    #[serde(default, alias = "AIRFLOW_MIDDLE_DAG_ID")]
    pub airflow_middle_dag_id: Option<String>,
    /// Login endpoint of the middle deployment.
    ///
    /// Environment variable: `AIRFLOW_MIDDLE_AUTH_URL`
    #[serde(default, alias = "AIRFLOW_MIDDLE_AUTH_URL")]
    pub airflow_middle_auth_url: Option<String>,
    /// Middle login username.
    ///
    /// Environment variable: `AIRFLOW_MIDDLE_USERNAME`
    #[serde(default, alias = "AIRFLOW_MIDDLE_USERNAME")]
    pub airflow_middle_username: Option<String>,
    /// Middle login password.
    ///
    /// Environment variable: `AIRFLOW_MIDDLE_PASSWORD`
    #[serde(default, alias = "AIRFLOW_MIDDLE_PASSWORD")]
    pub airflow_middle_password: Option<String>,
    /// Product names routed to the middle deployment. Empty means the
    /// built-in allow list.
    ///
    /// Environment variable: `AIRFLOW_MIDDLE_PRODUCTS` (comma separated in
    /// `config.toml` array form)
    #[serde(default, alias = "AIRFLOW_MIDDLE_PRODUCTS")]
    pub airflow_middle_products: Vec<String>,

    // Retry
    /// Maximum automatic retries per webhook record.
    ///
    /// Environment variable: `MAX_RETRY_ATTEMPTS`
    #[serde(default = "default_retry_attempts", alias = "MAX_RETRY_ATTEMPTS")]
    pub max_retry_attempts: u32,
    /// Delay between a failure and its scheduled retry, in seconds.
    ///
    /// Environment variable: `RETRY_DELAY_SECONDS`
    #[serde(default = "default_retry_delay", alias = "RETRY_DELAY_SECONDS")]
    pub retry_delay_seconds: u64,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the pipeline's retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            delay: Duration::from_secs(self.retry_delay_seconds),
        }
    }

    /// Convert to the notifier routing configuration.
    ///
    /// The middle route is built only when every `airflow_middle_*` value is
    /// present; otherwise all products go to the default route.
    pub fn to_notifier_config(&self) -> NotifierConfig {
        let default_route = AirflowRoute {
            base_url: self.airflow_base_url.clone(),
            dag_id: self.airflow_dag_id.clone(),
            auth: AirflowAuth::Basic {
                username: self.airflow_username.clone(),
                password: self.airflow_password.clone(),
            },
        };

        let middle_route = match (
            &self.airflow_middle_base_url,
            &self.airflow_middle_dag_id,
            &self.airflow_middle_auth_url,
            &self.airflow_middle_username,
            &self.airflow_middle_password,
        ) {
            (Some(base_url), Some(dag_id), Some(auth_url), Some(username), Some(password)) => {
                Some(AirflowRoute {
                    base_url: base_url.clone(),
                    dag_id: dag_id.clone(),
                    auth: AirflowAuth::BearerLogin {
                        auth_url: auth_url.clone(),
                        username: username.clone(),
                        password: password.clone(),
                    },
                })
            },
            _ => None,
        };

        let middle_products: HashSet<String> = if self.airflow_middle_products.is_empty() {
            DEFAULT_MIDDLE_PRODUCTS.iter().map(|s| (*s).to_string()).collect()
        } else {
            self.airflow_middle_products.iter().cloned().collect()
        };

        NotifierConfig { default_route, middle_route, middle_products }
    }

    /// Parse server socket address from host and port configuration.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// HTTP request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.request_timeout == 0 {
            anyhow::bail!("request_timeout must be greater than 0");
        }

        if self.retry_delay_seconds == 0 {
            anyhow::bail!("retry_delay_seconds must be greater than 0");
        }

        if self.s3_bucket.is_empty() {
            anyhow::bail!("s3_bucket must not be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            temp_dir: default_temp_dir(),
            s3_bucket: default_s3_bucket(),
            airflow_base_url: default_airflow_base_url(),
            airflow_dag_id: default_airflow_dag_id(),
            airflow_username: default_airflow_username(),
            airflow_password: String::new(),
            airflow_middle_base_url: None,
            airflow_middle_dag_id: None,
            airflow_middle_auth_url: None,
            airflow_middle_username: None,
            airflow_middle_password: None,
            airflow_middle_products: Vec::new(),
            max_retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay(),
            rust_log: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_temp_dir() -> String {
    "/tmp/sintegre-relay".to_string()
}

fn default_s3_bucket() -> String {
    "sintegre-webhooks".to_string()
}

fn default_airflow_base_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}

fn default_airflow_dag_id() -> String {
    "webhook-sintegre".to_string()
}

fn default_airflow_username() -> String {
    "airflow".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}
