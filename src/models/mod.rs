pub mod document;
pub mod invoice;
pub mod product;
pub mod result;

pub use document::{DocumentSource, IssuerInfo, ScannedDocument, ScannedItem};
pub use invoice::{Invoice, InvoiceItem, InvoiceWithItems, NewInvoiceItem};
pub use product::{Category, Product};
pub use result::{ScanOutcome, ScanStatus};
