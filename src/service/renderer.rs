use crate::models::{DocumentSource, IssuerInfo, ScannedDocument, ScannedItem};
use crate::service::amounts::parse_amount;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use regex::Regex;
use scraper::{Html, Selector};
use std::ops::Deref;
use std::sync::LazyLock;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

static EMISSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Emiss[ãa]o\D{0,20}(\d{2}/\d{2}/\d{4})[\sT]+(\d{2}:\d{2}:\d{2})")
        .expect("static regex")
});
static ROW_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(C[óo]digo:?\s*(\w+)\s*\)").expect("static regex"));

/// RAII guard for a chromiumoxide page: explicit async close on the success
/// path, Drop-spawned close on every other exit path. Pages hold CDP
/// connections that are not released without an explicit close.
struct PageGuard {
    page: Option<Page>,
    url: String,
    runtime: tokio::runtime::Handle,
}

impl PageGuard {
    fn new(page: Page, url: String) -> Self {
        Self {
            page: Some(page),
            url,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::warn!("Failed to close page for {}: {}", self.url, e);
            }
        }
    }
}

impl Deref for PageGuard {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref().expect("PageGuard: page already consumed")
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            let url = std::mem::take(&mut self.url);
            self.runtime.spawn(async move {
                if let Err(e) = page.close().await {
                    tracing::warn!("PageGuard drop cleanup failed for {}: {}", url, e);
                }
            });
        }
    }
}

/// Fallback acquisition strategy: render the consultation page in a headless
/// browser and probe the one institutional template it serves. Invoked only
/// when the structured path yields nothing.
pub struct RenderedPageScraper {
    timeout: Duration,
}

impl RenderedPageScraper {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Render the QR target and extract the invoice fields. The whole session
    /// runs under one hard timeout; browser resources are released on every
    /// exit path.
    pub async fn scrape(&self, url: &str) -> Result<ScannedDocument, BoxError> {
        let html = match tokio::time::timeout(self.timeout, render_page(url)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(format!("rendering timed out after {:?}", self.timeout).into());
            }
        };

        let doc = extract_from_markup(&html)?;
        tracing::info!(
            "Rendered page extracted: issuer '{}', {} items, total {}",
            doc.issuer.name,
            doc.items.len(),
            doc.declared_total
        );
        Ok(doc)
    }
}

/// One isolated browser session: launch, navigate with a network-settled
/// wait, serialize the rendered markup, tear everything down.
async fn render_page(url: &str) -> Result<String, BoxError> {
    let config = BrowserConfig::builder()
        .build()
        .map_err(BoxError::from)?;
    let (mut browser, mut handler) = Browser::launch(config).await?;
    let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

    let result = navigate_and_serialize(&browser, url).await;

    if let Err(e) = browser.close().await {
        tracing::warn!("Failed to close browser for {}: {}", url, e);
    }
    if let Err(e) = browser.wait().await {
        tracing::warn!("Failed to reap browser process for {}: {}", url, e);
    }
    handler_task.abort();

    result
}

async fn navigate_and_serialize(browser: &Browser, url: &str) -> Result<String, BoxError> {
    let guard = PageGuard::new(browser.new_page("about:blank").await?, url.to_string());
    guard.goto(url).await?;
    guard.wait_for_navigation().await?;
    let html = guard.content().await?;
    guard.close().await;
    Ok(html)
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).map(|el| {
        el.text().collect::<String>().trim().to_string()
    }).find(|t| !t.is_empty())
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Probe the rendered markup of the consultation template. Pure so it can be
/// exercised against fixture markup; template changes only ever touch the
/// selectors in here.
pub fn extract_from_markup(html: &str) -> Result<ScannedDocument, BoxError> {
    let doc = Html::parse_document(html);

    // access key from its well-known label element, validated as 44 digits
    let access_key = select_text(&doc, ".chave")
        .map(|t| digits_only(&t))
        .filter(|d| d.len() == 44)
        .ok_or("no 44-digit access key on rendered page")?;

    let issuer = select_text(&doc, ".txtTopo").ok_or("issuer name not found on rendered page")?;

    // labeled date+time anywhere in the free text
    let full_text = doc.root_element().text().collect::<String>();
    let issued_at = EMISSION_RE.captures(&full_text).and_then(|caps| {
        NaiveDateTime::parse_from_str(
            &format!("{} {}", &caps[1], &caps[2]),
            "%d/%m/%Y %H:%M:%S",
        )
        .ok()
        .map(|ndt| ndt.and_utc())
    });

    let declared_total = extract_total(&doc).ok_or("no total candidates on rendered page")?;
    let items = extract_items(&doc);

    Ok(ScannedDocument {
        access_key: Some(access_key),
        issuer: IssuerInfo {
            name: issuer,
            ..IssuerInfo::default()
        },
        issued_at,
        declared_total,
        items,
        source: DocumentSource::Rendered,
    })
}

/// Several total-like labels co-occur on the template (item counts, partial
/// totals, discounts). The grand total is never smaller than any of them, so
/// the maximum parsable candidate wins; a single highlighted amount node is
/// the last resort.
fn extract_total(doc: &Html) -> Option<BigDecimal> {
    let candidates_sel = Selector::parse("#totalNota .totalNumb").ok()?;
    let best = doc
        .select(&candidates_sel)
        .filter_map(|el| parse_amount(&el.text().collect::<String>()))
        .max();
    if best.is_some() {
        return best;
    }
    select_text(doc, ".txtMax").as_deref().and_then(parse_amount)
}

fn extract_items(doc: &Html) -> Vec<ScannedItem> {
    let row_sel = match Selector::parse(r#"tr[id^="Item"]"#) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut items = Vec::new();
    for (idx, row) in doc.select(&row_sel).enumerate() {
        let row_text = |class: &str| -> Option<String> {
            let sel = Selector::parse(class).ok()?;
            row.select(&sel)
                .map(|el| el.text().collect::<String>().trim().to_string())
                .find(|t| !t.is_empty())
        };

        let description = match row_text(".txtTit") {
            Some(d) => d,
            None => {
                tracing::warn!("Rendered row {} has no description, skipping", idx + 1);
                continue;
            }
        };
        let line_total = match row_text(".valor").as_deref().and_then(parse_amount) {
            Some(v) => v,
            None => {
                tracing::warn!(
                    "Rendered row {} ('{}') has no line total, skipping",
                    idx + 1,
                    description
                );
                continue;
            }
        };

        let code = row_text(".RCod")
            .and_then(|t| ROW_CODE_RE.captures(&t).map(|c| c[1].to_string()));
        let quantity = row_text(".Rqtd")
            .as_deref()
            .and_then(parse_amount)
            .unwrap_or_else(|| BigDecimal::from(1));
        let unit = row_text(".RUN")
            .map(|t| t.rsplit(':').next().unwrap_or("UN").trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "UN".to_string());
        let unit_price = row_text(".RvlUnit")
            .as_deref()
            .and_then(parse_amount)
            .unwrap_or_else(|| line_total.clone());

        items.push(ScannedItem {
            code,
            description,
            quantity,
            unit,
            unit_price,
            line_total,
        });
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    const KEY: &str = "35240114200166000187650010000000046550000046";

    fn page(totals: &str, rows: &str) -> String {
        format!(
            r#"<html><body><div id="conteudo">
              <div class="txtCenter"><div class="txtTopo">Mercearia Central</div></div>
              <table><tbody>{rows}</tbody></table>
              <div id="totalNota">{totals}</div>
              <div class="txtCenter">
                <span class="chave">3524 0114 2001 6600 0187 6500 1000 0000 0465 5000 0046</span>
                <div>Emiss&atilde;o: 15/01/2024 18:32:10 - Via Consumidor</div>
              </div>
            </div></body></html>"#
        )
    }

    fn item_row(id: u32, desc: &str, qty: &str, unit: &str, price: &str, total: &str) -> String {
        format!(
            r#"<tr id="Item{id}">
              <td><span class="txtTit">{desc}</span>
                  <span class="RCod">(C&oacute;digo: 789100{id})</span>
                  <span class="Rqtd">Qtde.:{qty}</span>
                  <span class="RUN">UN: {unit}</span>
                  <span class="RvlUnit">Vl. Unit.:&nbsp;{price}</span></td>
              <td><span class="valor">{total}</span></td>
            </tr>"#
        )
    }

    #[test]
    fn takes_maximum_among_cooccurring_total_labels() {
        let totals = r#"
          <div><label>Qtd. total de itens:</label><span class="totalNumb">2</span></div>
          <div><label>Valor total R$:</label><span class="totalNumb">54,00</span></div>
          <div><label>Descontos R$:</label><span class="totalNumb">4,00</span></div>
          <div><label>Valor a pagar R$:</label><span class="totalNumb">50,00</span></div>"#;
        let rows = item_row(1, "ARROZ BRANCO 5KG", "2", "UN", "27,00", "54,00");
        let doc = extract_from_markup(&page(totals, &rows)).unwrap();
        assert_eq!(doc.declared_total, dec("54.00"));
    }

    #[test]
    fn falls_back_to_highlighted_amount_node() {
        let totals = r#"<div><span class="txtMax">12,50</span></div>"#;
        let rows = item_row(1, "CAFE TORRADO", "1", "UN", "12,50", "12,50");
        let doc = extract_from_markup(&page(totals, &rows)).unwrap();
        assert_eq!(doc.declared_total, dec("12.50"));
    }

    #[test]
    fn extracts_key_issuer_date_and_rows() {
        let totals = r#"<div><span class="totalNumb">20,00</span></div>"#;
        let rows = item_row(1, "LEITE INTEGRAL 1L", "2", "UN", "10,00", "20,00");
        let doc = extract_from_markup(&page(totals, &rows)).unwrap();

        assert_eq!(doc.access_key.as_deref(), Some(KEY));
        assert_eq!(doc.issuer.name, "Mercearia Central");
        assert_eq!(doc.source, DocumentSource::Rendered);
        let issued = doc.issued_at.unwrap();
        assert_eq!(issued.format("%d/%m/%Y %H:%M:%S").to_string(), "15/01/2024 18:32:10");

        assert_eq!(doc.items.len(), 1);
        let item = &doc.items[0];
        assert_eq!(item.description, "LEITE INTEGRAL 1L");
        assert_eq!(item.code.as_deref(), Some("7891001"));
        assert_eq!(item.quantity, dec("2"));
        assert_eq!(item.unit, "UN");
        assert_eq!(item.unit_price, dec("10.00"));
        assert_eq!(item.line_total, dec("20.00"));
    }

    #[test]
    fn malformed_row_is_skipped_not_fatal() {
        let totals = r#"<div><span class="totalNumb">10,00</span></div>"#;
        let rows = format!(
            r#"{}<tr id="Item2"><td><span class="txtTit">SEM VALOR</span></td></tr>"#,
            item_row(1, "SABAO EM PO", "1", "UN", "10,00", "10,00")
        );
        let doc = extract_from_markup(&page(totals, &rows)).unwrap();
        assert_eq!(doc.items.len(), 1);
    }

    #[test]
    fn page_without_valid_key_is_rejected() {
        let html = r#"<html><body>
          <div class="txtTopo">Loja</div>
          <span class="chave">123</span>
          <div id="totalNota"><span class="totalNumb">5,00</span></div>
        </body></html>"#;
        assert!(extract_from_markup(html).is_err());
    }
}
