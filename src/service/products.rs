use crate::db;
use crate::models::{Category, Product, ScannedItem};
use regex::Regex;
use sqlx::PgPool;
use std::sync::LazyLock;
use uuid::Uuid;

/// Unit abbreviations and packaging words carried by receipt descriptions;
/// they say nothing about product identity.
const UNIT_TOKENS: &[&str] = &[
    "kg", "g", "mg", "l", "lt", "ml", "un", "und", "unid", "pc", "pct", "cx", "fd", "lata",
    "garrafa", "caixa", "pacote", "frasco", "embalagem", "bandeja", "duzia",
];

// "5kg", "1,5l", "350 ml" and the like
static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d+(?:[.,]\d+)?\s*(?:kg|g|mg|l|lt|ml|un|und)\b").expect("static regex")
});

fn fold_diacritics(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Map a free-text description to its canonical comparison key: lowercase,
/// diacritics folded, punctuation dropped, unit/quantity noise removed,
/// whitespace collapsed.
pub fn normalize_description(description: &str) -> String {
    let folded: String = description
        .to_lowercase()
        .chars()
        .map(fold_diacritics)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let without_quantities = QUANTITY_RE.replace_all(&folded, " ");

    without_quantities
        .split_whitespace()
        .filter(|token| !UNIT_TOKENS.contains(token) && !token.bytes().all(|b| b.is_ascii_digit()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keyword categorization: count substring occurrences per category, highest
/// count wins, ties resolve to the first category in configured order, zero
/// matches means no category.
pub fn categorize(normalized: &str, categories: &[Category]) -> Option<i64> {
    let mut best: Option<(i64, usize)> = None;
    for category in categories {
        let count: usize = category
            .keywords
            .iter()
            .map(|kw| {
                let key: String = kw.to_lowercase().chars().map(fold_diacritics).collect();
                if key.is_empty() {
                    0
                } else {
                    normalized.matches(&key).count()
                }
            })
            .sum();
        if count > 0 && best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((category.id, count));
        }
    }
    best.map(|(id, _)| id)
}

/// Collision-resistant synthetic code for products the source did not name.
/// The prefix keeps the namespace disjoint from external numeric GTINs.
fn synthetic_code() -> String {
    format!("SYS-{}", Uuid::new_v4().simple())
}

/// Resolve the canonical product for one scanned item (write path).
///
/// A stable external code upserts by code, refreshing only the category on
/// subsequent sightings. Codeless items match by exact description; first
/// sighting creates the product under a synthetic code.
pub async fn resolve_product(
    pool: &PgPool,
    item: &ScannedItem,
    categories: &[Category],
) -> Result<Product, sqlx::Error> {
    let normalized = normalize_description(&item.description);
    let category_id = categorize(&normalized, categories);

    if let Some(code) = &item.code {
        return db::upsert_product_by_code(pool, code, &item.description, category_id).await;
    }

    if let Some(existing) = db::find_product_by_description(pool, &item.description).await? {
        return Ok(existing);
    }

    let product =
        db::insert_product(pool, &synthetic_code(), &item.description, category_id).await?;
    tracing::info!(
        "Created product {} ('{}') under synthetic code {}",
        product.id,
        product.description,
        product.code
    );
    Ok(product)
}

fn leading_token(key: &str) -> &str {
    key.split_whitespace().next().unwrap_or("")
}

/// Read-side fuzzy identity: two canonical keys name the same product when
/// identical, or when they share the leading token within edit distance 3.
pub fn same_product(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    !a.is_empty() && leading_token(a) == leading_token(b) && strsim::levenshtein(a, b) <= 3
}

/// Cluster canonical keys for analytics; each key joins the first group whose
/// representative it matches.
pub fn group_products(keys: &[String]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (idx, key) in keys.iter().enumerate() {
        match groups
            .iter_mut()
            .find(|group| same_product(&keys[group[0]], key))
        {
            Some(group) => group.push(idx),
            None => groups.push(vec![idx]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: i64, name: &str, keywords: &[&str]) -> Category {
        Category {
            id,
            name: name.to_string(),
            color: None,
            icon: None,
            position: id as i32,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn normalization_strips_noise() {
        assert_eq!(normalize_description("ARROZ branco 5kg"), "arroz branco");
        assert_eq!(normalize_description("FEIJÃO carioca PCT 1kg"), "feijao carioca");
        assert_eq!(normalize_description("Refrig. Guaraná 2l"), "refrig guarana");
        assert_eq!(normalize_description("OVOS 12 un"), "ovos");
    }

    #[test]
    fn normalization_keeps_identity_words() {
        assert_eq!(normalize_description("Sabão em pó"), "sabao em po");
    }

    #[test]
    fn categorization_picks_matching_category() {
        let categories = vec![
            category(1, "Mercado", &["arroz"]),
            category(2, "Limpeza", &["sabao"]),
        ];
        let key = normalize_description("ARROZ branco 5kg");
        assert_eq!(categorize(&key, &categories), Some(1));
    }

    #[test]
    fn categorization_without_match_yields_none() {
        let categories = vec![
            category(1, "Mercado", &["arroz"]),
            category(2, "Limpeza", &["sabao"]),
        ];
        let key = normalize_description("PNEU ARO 15");
        assert_eq!(categorize(&key, &categories), None);
    }

    #[test]
    fn categorization_tie_resolves_to_first_configured() {
        let categories = vec![
            category(7, "Padaria", &["pao"]),
            category(8, "Mercearia", &["pao"]),
        ];
        assert_eq!(categorize("pao frances", &categories), Some(7));
    }

    #[test]
    fn categorization_prefers_higher_keyword_count() {
        let categories = vec![
            category(1, "Bebidas", &["suco"]),
            category(2, "Hortifruti", &["uva", "suco"]),
        ];
        assert_eq!(categorize("suco de uva", &categories), Some(2));
    }

    #[test]
    fn keywords_match_diacritic_insensitively() {
        let categories = vec![category(3, "Limpeza", &["sabão"])];
        assert_eq!(categorize("sabao em po", &categories), Some(3));
    }

    #[test]
    fn fuzzy_identity_tolerates_small_edits() {
        assert!(same_product("arroz branco", "arroz branco"));
        assert!(same_product("arroz branco", "arroz brancos"));
        assert!(!same_product("arroz branco", "feijao preto"));
        // leading token differs, distance alone is not enough
        assert!(!same_product("arroz tio joao", "arros tio joao"));
    }

    #[test]
    fn grouping_clusters_by_fuzzy_identity() {
        let keys = vec![
            "arroz branco".to_string(),
            "arroz branca".to_string(),
            "cafe torrado".to_string(),
        ];
        assert_eq!(group_products(&keys), vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn synthetic_codes_carry_reserved_prefix() {
        let code = synthetic_code();
        assert!(code.starts_with("SYS-"));
        assert!(code.len() > 10);
        assert_ne!(code, synthetic_code());
    }
}
