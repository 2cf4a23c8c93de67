use crate::models::{DocumentSource, IssuerInfo, ScannedDocument, ScannedItem};
use crate::service::amounts::parse_amount;
use crate::service::reconcile::is_plausible;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

/// Candidate root tags for the machine-readable fragment, most specific first.
const ROOT_TAGS: [&str; 3] = ["nfeproc", "procnfe", "nfe"];

/// Primary acquisition strategy: pull the consultation URL directly and parse
/// the embedded machine-readable tax document. Absence of a usable document is
/// a normal outcome (the caller falls back to rendering), never an error.
pub struct StructuredDocumentFetcher {
    client: reqwest::Client,
}

impl StructuredDocumentFetcher {
    /// Build the shared client: hard timeout plus browser-like headers, since
    /// the portals reject obvious non-browser traffic.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            ),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("pt-BR,pt;q=0.9,en;q=0.8"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }

    /// Fetch and parse. `None` covers network failure, timeout, non-2xx,
    /// missing fragment and malformed fragment alike; each is logged.
    pub async fn fetch(&self, url: &str) -> Option<ScannedDocument> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Structured fetch unavailable for {}: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                "Structured fetch for {} answered {}",
                url,
                response.status()
            );
            return None;
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Structured fetch body read failed for {}: {}", url, e);
                return None;
            }
        };

        let fragment = match extract_fragment(&body) {
            Some(f) => f,
            None => {
                tracing::info!("No structured fragment in response from {}", url);
                return None;
            }
        };

        match parse_fragment(fragment) {
            Ok(doc) => {
                tracing::info!(
                    "Structured document parsed: issuer '{}', {} items, total {}",
                    doc.issuer.name,
                    doc.items.len(),
                    doc.declared_total
                );
                Some(doc)
            }
            Err(e) => {
                tracing::warn!("Malformed structured document from {}: {}", url, e);
                None
            }
        }
    }
}

/// Slice the machine-readable fragment out of the raw payload by locating the
/// enclosing element boundaries of the first recognized root tag.
pub fn extract_fragment(payload: &str) -> Option<&str> {
    let lower = payload.to_ascii_lowercase();
    for tag in ROOT_TAGS {
        let open = format!("<{}", tag);
        let close = format!("</{}>", tag);

        let mut search_from = 0usize;
        while let Some(rel) = lower[search_from..].find(&open) {
            let start = search_from + rel;
            // tag boundary check so "nfe" does not match "<nfeproc"
            let after = lower.as_bytes().get(start + open.len());
            if matches!(after, Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n')) {
                if let Some(end_rel) = lower[start..].find(&close) {
                    return Some(&payload[start..start + end_rel + close.len()]);
                }
            }
            search_from = start + open.len();
        }
    }
    None
}

/// Ordered candidate probe inside one element: first selector with non-empty
/// text wins. Field names vary by issuing authority/version.
fn probe(scope: ElementRef<'_>, candidates: &[&str]) -> Option<String> {
    for sel in candidates {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(el) = scope.select(&selector).next() {
            let text = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn probe_doc(doc: &Html, candidates: &[&str]) -> Option<String> {
    probe(doc.root_element(), candidates)
}

fn parse_issued_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // older layout versions carry a bare date
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

/// True for a plausible GTIN: the only code treated as externally stable.
/// Placeholders like "SEM GTIN" fail the digit check on their own.
fn is_stable_code(raw: &str) -> bool {
    (8..=14).contains(&raw.len()) && raw.bytes().all(|b| b.is_ascii_digit())
}

/// Schema-tolerant traversal of the fragment. html5ever folds element-name
/// case, which absorbs the capitalization variants for free; everything else
/// is handled by the ordered candidate lists.
pub fn parse_fragment(fragment: &str) -> Result<ScannedDocument, String> {
    let doc = Html::parse_document(fragment);

    let issuer_name = probe_doc(&doc, &["emit xfant", "emit xnome"])
        .ok_or_else(|| "issuer name missing".to_string())?;
    let legal_name = probe_doc(&doc, &["emit xnome"]);
    let tax_id = probe_doc(&doc, &["emit cnpj", "emit cpf"]);
    let address = {
        let parts: Vec<String> = [
            probe_doc(&doc, &["enderemit xlgr"]),
            probe_doc(&doc, &["enderemit nro"]),
            probe_doc(&doc, &["enderemit xmun"]),
        ]
        .into_iter()
        .flatten()
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    };

    let issued_at = probe_doc(&doc, &["ide dhemi", "ide demi", "dhemi", "demi"])
        .and_then(|raw| parse_issued_at(&raw));

    let items = parse_items(&doc);
    if items.is_empty() {
        return Err("no parsable line items".to_string());
    }
    let item_sum: BigDecimal = items
        .iter()
        .map(|i| &i.line_total)
        .fold(BigDecimal::zero(), |acc, v| acc + v);

    // prefer the primary total, then the gross product total, then the
    // item-sum, skipping any candidate that fails the plausibility check
    let primary = probe_doc(&doc, &["icmstot vnf", "total vnf", "vnf"])
        .as_deref()
        .and_then(parse_amount);
    let secondary = probe_doc(&doc, &["icmstot vprod", "total vprod"])
        .as_deref()
        .and_then(parse_amount);

    let declared_total = match (primary, secondary) {
        (Some(p), _) if is_plausible(&p, &item_sum) => p,
        (_, Some(s)) if is_plausible(&s, &item_sum) => s,
        _ => item_sum,
    };

    Ok(ScannedDocument {
        access_key: None,
        issuer: IssuerInfo {
            name: issuer_name,
            legal_name,
            tax_id,
            address,
        },
        issued_at,
        declared_total,
        items,
        source: DocumentSource::Structured,
    })
}

fn parse_items(doc: &Html) -> Vec<ScannedItem> {
    let det_selector = match Selector::parse("det") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut items = Vec::new();
    for (idx, det) in doc.select(&det_selector).enumerate() {
        let description = match probe(det, &["prod xprod"]) {
            Some(d) => d,
            None => {
                tracing::warn!("Item {} has no description, skipping", idx + 1);
                continue;
            }
        };
        let line_total = match probe(det, &["prod vprod"]).as_deref().and_then(parse_amount) {
            Some(v) => v,
            None => {
                tracing::warn!("Item {} ('{}') has no line total, skipping", idx + 1, description);
                continue;
            }
        };

        let quantity = probe(det, &["prod qcom", "prod qtrib"])
            .as_deref()
            .and_then(parse_amount)
            .unwrap_or_else(|| BigDecimal::from(1));
        let unit = probe(det, &["prod ucom", "prod utrib"]).unwrap_or_else(|| "UN".to_string());
        let unit_price = probe(det, &["prod vuncom", "prod vuntrib"])
            .as_deref()
            .and_then(parse_amount)
            .unwrap_or_else(|| {
                if quantity > BigDecimal::zero() {
                    &line_total / &quantity
                } else {
                    line_total.clone()
                }
            });
        let code = probe(det, &["prod cean", "prod ceantrib"]).filter(|c| is_stable_code(c));

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

    fn fragment(totals: &str, items: &str) -> String {
        format!(
            r#"<nfeProc versao="4.00">
              <NFe><infNFe>
                <ide><dhEmi>2024-01-15T18:32:00-03:00</dhEmi></ide>
                <emit>
                  <CNPJ>14200166000187</CNPJ>
                  <xNome>Supermercado Bom Preco Ltda</xNome>
                  <xFant>Bom Preco</xFant>
                  <enderEmit><xLgr>Rua das Flores</xLgr><nro>100</nro><xMun>Sao Paulo</xMun></enderEmit>
                </emit>
                {items}
                <total><ICMSTot>{totals}</ICMSTot></total>
              </infNFe></NFe>
            </nfeProc>"#
        )
    }

    const ONE_ITEM: &str = r#"<det nItem="1"><prod>
        <cProd>123</cProd><cEAN>7891000100103</cEAN>
        <xProd>LEITE INTEGRAL 1L</xProd>
        <qCom>2.0000</qCom><uCom>UN</uCom>
        <vUnCom>10.00</vUnCom><vProd>20.00</vProd>
      </prod></det>"#;

    #[test]
    fn extracts_fragment_from_surrounding_page() {
        let page = format!(
            "<html><body>ignored<div>{}</div>tail</body></html>",
            fragment("<vNF>20.00</vNF>", ONE_ITEM)
        );
        let frag = extract_fragment(&page).unwrap();
        assert!(frag.starts_with("<nfeProc"));
        assert!(frag.ends_with("</nfeProc>"));
    }

    #[test]
    fn fragment_absent_when_no_root_tag() {
        assert!(extract_fragment("<html><body>consulta indisponivel</body></html>").is_none());
    }

    #[test]
    fn parses_single_item_document_end_to_end() {
        let doc = parse_fragment(&fragment("<vProd>20.00</vProd><vNF>20.00</vNF>", ONE_ITEM))
            .unwrap();
        assert_eq!(doc.issuer.name, "Bom Preco");
        assert_eq!(doc.issuer.legal_name.as_deref(), Some("Supermercado Bom Preco Ltda"));
        assert_eq!(doc.issuer.tax_id.as_deref(), Some("14200166000187"));
        assert_eq!(doc.declared_total, dec("20.00"));
        assert_eq!(doc.items.len(), 1);
        let item = &doc.items[0];
        assert_eq!(item.code.as_deref(), Some("7891000100103"));
        assert_eq!(item.quantity, dec("2.0000"));
        assert_eq!(item.unit_price, dec("10.00"));
        assert_eq!(item.line_total, dec("20.00"));
        assert!(doc.issued_at.is_some());
        assert_eq!(doc.source, DocumentSource::Structured);
    }

    #[test]
    fn falls_back_to_gross_total_when_primary_missing() {
        let doc = parse_fragment(&fragment("<vProd>20.00</vProd>", ONE_ITEM)).unwrap();
        assert_eq!(doc.declared_total, dec("20.00"));
    }

    #[test]
    fn implausible_primary_total_falls_back_to_item_sum() {
        // wrong field mapped into vNF: 0.50 against an item-sum of 20.00
        let doc = parse_fragment(&fragment("<vNF>0.50</vNF>", ONE_ITEM)).unwrap();
        assert_eq!(doc.declared_total, dec("20.00"));
    }

    #[test]
    fn placeholder_gtin_is_not_a_stable_code() {
        let items = r#"<det><prod>
            <cEAN>SEM GTIN</cEAN><xProd>PAO FRANCES</xProd>
            <qCom>1</qCom><uCom>KG</uCom><vUnCom>12.00</vUnCom><vProd>12.00</vProd>
          </prod></det>"#;
        let doc = parse_fragment(&fragment("<vNF>12.00</vNF>", items)).unwrap();
        assert!(doc.items[0].code.is_none());
    }

    #[test]
    fn malformed_item_is_skipped_not_fatal() {
        let items = format!(
            "{}<det nItem=\"2\"><prod><xProd>SEM VALOR</xProd></prod></det>",
            ONE_ITEM
        );
        let doc = parse_fragment(&fragment("<vNF>20.00</vNF>", &items)).unwrap();
        assert_eq!(doc.items.len(), 1);
    }

    #[test]
    fn document_without_items_is_malformed() {
        assert!(parse_fragment(&fragment("<vNF>20.00</vNF>", "")).is_err());
    }
}
