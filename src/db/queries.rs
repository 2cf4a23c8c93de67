use crate::models::{Category, Invoice, InvoiceItem, InvoiceWithItems, NewInvoiceItem, Product};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Look up an invoice by owner and access key (duplicate pre-check)
pub async fn find_invoice_for_user(
    pool: &PgPool,
    user_id: i64,
    access_key: &str,
) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT id, access_key, user_id, issuer, issued_at, total, created_at
        FROM invoices
        WHERE user_id = $1 AND access_key = $2
        "#,
    )
    .bind(user_id)
    .bind(access_key)
    .fetch_optional(pool)
    .await
}

/// Look up an invoice by access key alone (race-loser re-read)
pub async fn find_invoice_by_key(
    pool: &PgPool,
    access_key: &str,
) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(
        r#"
        SELECT id, access_key, user_id, issuer, issued_at, total, created_at
        FROM invoices
        WHERE access_key = $1
        "#,
    )
    .bind(access_key)
    .fetch_optional(pool)
    .await
}

/// Ordered lines of one invoice
pub async fn list_invoice_items(
    pool: &PgPool,
    invoice_id: i64,
) -> Result<Vec<InvoiceItem>, sqlx::Error> {
    sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT id, invoice_id, product_id, description, quantity, unit, unit_price, line_total
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await
}

/// Full record re-read for the response
pub async fn load_invoice_with_items(
    pool: &PgPool,
    invoice: Invoice,
) -> Result<InvoiceWithItems, sqlx::Error> {
    let items = list_invoice_items(pool, invoice.id).await?;
    Ok(InvoiceWithItems { invoice, items })
}

/// Categories in configured order (ties in categorization resolve to the first)
pub async fn list_categories(pool: &PgPool) -> Result<Vec<Category>, sqlx::Error> {
    sqlx::query_as::<_, Category>(
        r#"
        SELECT id, name, color, icon, position, keywords
        FROM categories
        ORDER BY position, id
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Upsert a product by its stable external code; only the category is refreshed
/// on subsequent sightings, the code and description stay as first seen.
pub async fn upsert_product_by_code(
    pool: &PgPool,
    code: &str,
    description: &str,
    category_id: Option<i64>,
) -> Result<Product, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (code, description, category_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (code) DO UPDATE
        SET category_id = COALESCE(EXCLUDED.category_id, products.category_id)
        RETURNING id, code, description, category_id
        "#,
    )
    .bind(code)
    .bind(description)
    .bind(category_id)
    .fetch_one(pool)
    .await
}

/// Exact (non-normalized) description match for codeless items
pub async fn find_product_by_description(
    pool: &PgPool,
    description: &str,
) -> Result<Option<Product>, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        r#"
        SELECT id, code, description, category_id
        FROM products
        WHERE description = $1
        LIMIT 1
        "#,
    )
    .bind(description)
    .fetch_optional(pool)
    .await
}

/// First sighting of a codeless product: create it under a synthetic code
pub async fn insert_product(
    pool: &PgPool,
    code: &str,
    description: &str,
    category_id: Option<i64>,
) -> Result<Product, sqlx::Error> {
    sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (code, description, category_id)
        VALUES ($1, $2, $3)
        RETURNING id, code, description, category_id
        "#,
    )
    .bind(code)
    .bind(description)
    .bind(category_id)
    .fetch_one(pool)
    .await
}

/// Create the invoice row and bulk-insert its lines in one transaction.
/// A unique violation on access_key propagates to the caller, which
/// reinterprets it as a lost duplicate race.
pub async fn persist_invoice(
    pool: &PgPool,
    user_id: i64,
    access_key: &str,
    issuer: &str,
    issued_at: Option<DateTime<Utc>>,
    total: &BigDecimal,
    items: &[NewInvoiceItem],
) -> Result<Invoice, sqlx::Error> {
    let start = std::time::Instant::now();
    let mut tx = pool.begin().await?;

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices (access_key, user_id, issuer, issued_at, total)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, access_key, user_id, issuer, issued_at, total, created_at
        "#,
    )
    .bind(access_key)
    .bind(user_id)
    .bind(issuer)
    .bind(issued_at)
    .bind(total)
    .fetch_one(&mut *tx)
    .await?;

    if !items.is_empty() {
        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO invoice_items (
                invoice_id, product_id, description,
                quantity, unit, unit_price, line_total
            ) ",
        );

        query_builder.push_values(items, |mut b, item| {
            b.push_bind(invoice.id)
                .push_bind(item.product_id)
                .push_bind(&item.description)
                .push_bind(item.quantity.clone())
                .push_bind(&item.unit)
                .push_bind(item.unit_price.clone())
                .push_bind(item.line_total.clone());
        });

        let result = query_builder.build().execute(&mut *tx).await?;
        tracing::debug!(
            "Bulk-inserted {} invoice lines for key {}",
            result.rows_affected(),
            access_key
        );
    }

    tx.commit().await?;
    tracing::info!(
        "Invoice {} persisted ({} items) in {:?}",
        invoice.id,
        items.len(),
        start.elapsed()
    );

    Ok(invoice)
}
