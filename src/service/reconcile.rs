use bigdecimal::{BigDecimal, Zero};

/// Trust policy for a declared total against the item-sum baseline.
///
/// Institutional field-name variance sometimes maps the wrong monetary field
/// into the total; the symptom is a declared value of zero or a tiny fraction
/// of what the lines add up to. A declared total below 10% of a positive
/// item-sum is treated as corrupted.
pub fn is_plausible(declared: &BigDecimal, item_sum: &BigDecimal) -> bool {
    if declared.is_zero() {
        return false;
    }
    // declared < item_sum / 10, kept in integer arithmetic
    if item_sum > &BigDecimal::zero() && &(declared * BigDecimal::from(10)) < item_sum {
        return false;
    }
    true
}

/// Select the trustworthy total: the declared value when plausible, the
/// item-sum otherwise. Correction is silent; we only log it.
pub fn reconcile_total(declared: &BigDecimal, item_sum: &BigDecimal) -> BigDecimal {
    if is_plausible(declared, item_sum) {
        declared.clone()
    } else {
        tracing::info!(
            "Declared total {} implausible against item-sum {}, substituting item-sum",
            declared,
            item_sum
        );
        item_sum.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn corrupted_total_is_replaced_by_item_sum() {
        // 5.00 is below 10% of 120.00
        assert_eq!(reconcile_total(&dec("5.00"), &dec("120.00")), dec("120.00"));
    }

    #[test]
    fn plausible_total_passes_through() {
        assert_eq!(
            reconcile_total(&dec("119.50"), &dec("120.00")),
            dec("119.50")
        );
    }

    #[test]
    fn exact_ten_percent_is_plausible() {
        assert_eq!(reconcile_total(&dec("12.00"), &dec("120.00")), dec("12.00"));
    }

    #[test]
    fn zero_declared_total_is_replaced() {
        assert_eq!(reconcile_total(&dec("0"), &dec("34.90")), dec("34.90"));
    }

    #[test]
    fn zero_item_sum_keeps_declared_total() {
        // nothing to reconcile against when no lines parsed
        assert_eq!(reconcile_total(&dec("15.00"), &dec("0")), dec("15.00"));
    }

    #[test]
    fn both_zero_yields_zero() {
        assert_eq!(reconcile_total(&dec("0"), &dec("0")), dec("0"));
    }
}
