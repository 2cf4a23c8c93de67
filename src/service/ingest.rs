use crate::config::AcquisitionConfig;
use crate::db;
use crate::error::{is_unique_violation, ScanError};
use crate::models::{NewInvoiceItem, ScanOutcome, ScanStatus, ScannedDocument};
use crate::service::access_key::resolve_access_key;
use crate::service::budget::BudgetAlerts;
use crate::service::fetcher::StructuredDocumentFetcher;
use crate::service::products;
use crate::service::reconcile::reconcile_total;
use crate::service::renderer::RenderedPageScraper;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Pipeline orchestrator: one call per submitted QR payload, at most one
/// persisted invoice per access key.
pub struct IngestService {
    pool: PgPool,
    fetcher: StructuredDocumentFetcher,
    renderer: RenderedPageScraper,
    budget: Arc<dyn BudgetAlerts>,
    persist_timeout: Duration,
}

impl IngestService {
    pub fn new(
        pool: PgPool,
        config: &AcquisitionConfig,
        budget: Arc<dyn BudgetAlerts>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            fetcher: StructuredDocumentFetcher::new(Duration::from_secs(
                config.fetch_timeout_secs,
            ))?,
            renderer: RenderedPageScraper::new(Duration::from_secs(config.render_timeout_secs)),
            persist_timeout: Duration::from_secs(config.persist_timeout_secs),
            pool,
            budget,
        })
    }

    /// Full pipeline: key derivation, duplicate pre-check, dual-strategy
    /// acquisition, reconciliation, product resolution, idempotent persist.
    pub async fn scan(&self, user_id: i64, qr_payload: &str) -> Result<ScanOutcome, ScanError> {
        // 1. derive the idempotency token; fatal when absent
        let access_key = resolve_access_key(qr_payload)?;
        tracing::info!("Scan started: user {}, key {}", user_id, access_key);

        // 2. duplicate pre-check: short-circuit with the existing record
        if let Some(existing) =
            db::find_invoice_for_user(&self.pool, user_id, &access_key).await?
        {
            tracing::info!(
                "Key {} already persisted as invoice {}, returning duplicate",
                access_key,
                existing.id
            );
            let invoice = db::load_invoice_with_items(&self.pool, existing).await?;
            return Ok(ScanOutcome {
                status: ScanStatus::Duplicate,
                invoice,
            });
        }

        // 3. acquisition (all network I/O happens before the transaction)
        let document = self.acquire(qr_payload).await?;

        // 4. final reconciliation safety net, regardless of which path ran
        let item_sum = document.item_sum();
        let total = reconcile_total(&document.declared_total, &item_sum);

        // 5. resolve every line to a canonical product
        let categories = db::list_categories(&self.pool).await?;
        let mut new_items = Vec::with_capacity(document.items.len());
        for item in &document.items {
            let product = products::resolve_product(&self.pool, item, &categories).await?;
            new_items.push(NewInvoiceItem {
                product_id: product.id,
                description: item.description.clone(),
                quantity: item.quantity.clone(),
                unit: item.unit.clone(),
                unit_price: item.unit_price.clone(),
                line_total: item.line_total.clone(),
            });
        }

        // 6. optimistic insert, reconcile on conflict: the storage uniqueness
        //    constraint adjudicates concurrent submissions of the same receipt
        let persisted = tokio::time::timeout(
            self.persist_timeout,
            db::persist_invoice(
                &self.pool,
                user_id,
                &access_key,
                &document.issuer.name,
                document.issued_at,
                &total,
                &new_items,
            ),
        )
        .await;

        let invoice = match persisted {
            Ok(Ok(invoice)) => invoice,
            Ok(Err(e)) if is_unique_violation(&e) => {
                tracing::info!("Insert race lost for key {}, re-reading winner", access_key);
                let winner = db::find_invoice_by_key(&self.pool, &access_key)
                    .await?
                    .ok_or(ScanError::Database(sqlx::Error::RowNotFound))?;
                let invoice = db::load_invoice_with_items(&self.pool, winner).await?;
                return Ok(ScanOutcome {
                    status: ScanStatus::Duplicate,
                    invoice,
                });
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::error!("Persist transaction exceeded {:?}", self.persist_timeout);
                return Err(ScanError::PersistTimeout);
            }
        };

        // 7. fire-and-forget budget evaluation; never affects the result
        let budget = Arc::clone(&self.budget);
        tokio::spawn(async move {
            if let Err(e) = budget.check_and_send_alerts(user_id).await {
                tracing::warn!("Budget alert check failed for user {}: {}", user_id, e);
            }
        });

        let invoice = db::load_invoice_with_items(&self.pool, invoice).await?;
        Ok(ScanOutcome {
            status: ScanStatus::Success,
            invoice,
        })
    }

    /// Acquisition only, no persistence: inspect what a URL would yield
    /// before committing it.
    pub async fn preview(&self, url: &str) -> Result<ScannedDocument, ScanError> {
        self.acquire(url).await
    }

    /// Ordered fallback over the document sources: structured first, rendered
    /// page only when the structured path yields nothing. Exhaustion of both
    /// is the only acquisition error the caller ever sees.
    async fn acquire(&self, url: &str) -> Result<ScannedDocument, ScanError> {
        if let Some(doc) = self.fetcher.fetch(url).await {
            return Ok(doc);
        }
        tracing::info!("Structured document absent, rendering page for {}", url);
        self.renderer
            .scrape(url)
            .await
            .map_err(|e| ScanError::AcquisitionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::budget::LoggingBudgetAlerts;
    use sqlx::postgres::PgPoolOptions;

    fn service() -> IngestService {
        // lazy pool: never connects unless a query runs
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unreachable")
            .expect("lazy pool");
        IngestService::new(
            pool,
            &AcquisitionConfig::default(),
            Arc::new(LoggingBudgetAlerts),
        )
        .expect("service")
    }

    #[tokio::test]
    async fn invalid_qr_short_circuits_before_any_io() {
        let err = service().scan(7, "not-a-receipt").await.unwrap_err();
        assert!(matches!(err, ScanError::InvalidQrCode));
    }
}
