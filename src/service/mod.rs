pub mod access_key;
pub mod amounts;
pub mod budget;
pub mod fetcher;
pub mod ingest;
pub mod products;
pub mod reconcile;
pub mod renderer;

pub use access_key::resolve_access_key;
pub use budget::{BudgetAlerts, LoggingBudgetAlerts, WebhookBudgetAlerts};
pub use fetcher::StructuredDocumentFetcher;
pub use ingest::IngestService;
pub use renderer::RenderedPageScraper;
