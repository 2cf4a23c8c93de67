use crate::error::ScanError;
use regex::Regex;
use std::sync::LazyLock;

// The key is carried either as the `p=` query parameter of the consultation
// URL or as a bare digit run somewhere in the payload.
static PARAM_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"p=(\d{44})").expect("static regex"));
static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{44}").expect("static regex"));

/// Extract the 44-digit access key that names this invoice everywhere
/// downstream. Fails fast with `InvalidQrCode` when no key is derivable.
pub fn resolve_access_key(qr_payload: &str) -> Result<String, ScanError> {
    if let Some(caps) = PARAM_KEY.captures(qr_payload) {
        return Ok(caps[1].to_string());
    }
    if let Some(m) = BARE_KEY.find(qr_payload) {
        return Ok(m.as_str().to_string());
    }
    Err(ScanError::InvalidQrCode)
}
