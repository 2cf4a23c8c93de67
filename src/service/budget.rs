use async_trait::async_trait;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Budget-evaluation collaborator, notified fire-and-forget after each
/// successful ingestion. Failures are logged by the caller and never affect
/// the ingestion result.
#[async_trait]
pub trait BudgetAlerts: Send + Sync {
    async fn check_and_send_alerts(&self, user_id: i64) -> Result<(), BoxError>;
}

/// Remote collaborator behind a webhook endpoint.
pub struct WebhookBudgetAlerts {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookBudgetAlerts {
    pub fn new(endpoint: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl BudgetAlerts for WebhookBudgetAlerts {
    async fn check_and_send_alerts(&self, user_id: i64) -> Result<(), BoxError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "user_id": user_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(format!("budget endpoint answered {}", response.status()).into());
        }
        Ok(())
    }
}

/// Stand-in when no endpoint is configured; keeps the side effect visible in
/// the logs.
pub struct LoggingBudgetAlerts;

#[async_trait]
impl BudgetAlerts for LoggingBudgetAlerts {
    async fn check_and_send_alerts(&self, user_id: i64) -> Result<(), BoxError> {
        tracing::debug!("No budget endpoint configured, skipping check for user {}", user_id);
        Ok(())
    }
}
