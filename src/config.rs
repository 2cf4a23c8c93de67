use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub acquisition: AcquisitionConfig,
    pub budget: BudgetConfig,
}

/// Budget-evaluation collaborator endpoint; alerts are skipped when unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub alerts_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Hard bounds for the blocking acquisition/persist steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub fetch_timeout_secs: u64,
    pub render_timeout_secs: u64,
    pub persist_timeout_secs: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 12,
            render_timeout_secs: 30,
            persist_timeout_secs: 15,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: std::env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/nfce_scanner".to_string()),
            },
            acquisition: AcquisitionConfig {
                fetch_timeout_secs: env_u64("ACQUIRE_FETCH_TIMEOUT_SECS", 12),
                render_timeout_secs: env_u64("ACQUIRE_RENDER_TIMEOUT_SECS", 30),
                persist_timeout_secs: env_u64("PERSIST_TIMEOUT_SECS", 15),
            },
            budget: BudgetConfig {
                alerts_url: std::env::var("BUDGET_ALERTS_URL").ok(),
            },
        }
    }
}
