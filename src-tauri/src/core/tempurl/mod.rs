//! TempURL Signer (C8).
//!
//! Generates and validates HMAC-SHA1 signed, time-bounded, optionally
//! IP-bound object/prefix URLs, and manages the account-scoped
//! signing key through `ApiClient::set_account_meta`/`head_account`. New
//! dependency relative to the teacher: `hmac` + `sha1`, since this
//! requires the literal Swift/OpenStack TempURL algorithm (HMAC-SHA1, not
//! the teacher's request-signing needs elsewhere). Key generation reuses
//! `rand::rngs::OsRng` + `base64`, the same idiom the teacher uses for
//! opaque identifiers.

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::core::api_client::ApiClient;
use crate::core::{HaioError, HaioResult};

type HmacSha1 = Hmac<Sha1>;

const TEMP_URL_KEY_META: &str = "Temp-URL-Key";
const TEMP_URL_KEY_HEADER: &str = "x-account-meta-temp-url-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignedUrl {
    pub url: String,
    pub expires_epoch_s: u64,
    pub signature: String,
}

/// Inputs to `sign`/`sign_prefix`.
pub struct SignRequest<'a> {
    pub method: HttpMethod,
    pub duration_seconds: u64,
    pub object_path: &'a str,
    pub ip: Option<&'a str>,
}

/// Generates the 32 random bytes, URL-safe base64 encoded, used as a new
/// account signing key.
fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn string_to_sign(method_field: &str, expires: u64, object_path: &str, ip: Option<&str>) -> String {
    let mut s = format!("{method_field}\n{expires}\n{object_path}");
    if let Some(ip) = ip {
        s.push_str(&format!("\nip={ip}"));
    }
    s
}

fn hmac_sha1_hex(key: &str, message: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Signs an object URL with `now` supplied by the caller so tests can freeze
/// the clock.
pub fn sign(base: &str, key: &str, now_epoch_s: u64, request: &SignRequest<'_>) -> SignedUrl {
    let expires = now_epoch_s + request.duration_seconds;
    let to_sign = string_to_sign(request.method.as_str(), expires, request.object_path, request.ip);
    let signature = hmac_sha1_hex(key, &to_sign);

    let mut url = format!("{base}{}?temp_url_sig={signature}&temp_url_expires={expires}", request.object_path);
    if let Some(ip) = request.ip {
        url.push_str(&format!("&ip={ip}"));
    }

    SignedUrl { url, expires_epoch_s: expires, signature }
}

/// Signs a prefix URL: identical except `method` carries a `prefix:` marker
/// (the prefix-signing variant).
pub fn sign_prefix(base: &str, key: &str, now_epoch_s: u64, request: &SignRequest<'_>) -> SignedUrl {
    let expires = now_epoch_s + request.duration_seconds;
    let method_field = format!("prefix:{}", request.method.as_str());
    let to_sign = string_to_sign(&method_field, expires, request.object_path, request.ip);
    let signature = hmac_sha1_hex(key, &to_sign);

    let mut url = format!("{base}{}?temp_url_sig={signature}&temp_url_expires={expires}", request.object_path);
    if let Some(ip) = request.ip {
        url.push_str(&format!("&ip={ip}"));
    }

    SignedUrl { url, expires_epoch_s: expires, signature }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    MissingParams,
    Expired,
    MalformedExpires,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub expires_at: Option<u64>,
    pub time_remaining_s: Option<i64>,
    pub reason: Option<InvalidReason>,
}

/// Validates a signed URL's query parameters against `now_epoch_s`.
/// Signature equality is intentionally not re-checked client-side (that
/// would require the key); validity rests on expiration alone.
pub fn validate(url: &str, now_epoch_s: u64) -> ValidationResult {
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
    let mut sig = None;
    let mut expires_raw = None;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            match k {
                "temp_url_sig" => sig = Some(v),
                "temp_url_expires" => expires_raw = Some(v),
                _ => {}
            }
        }
    }

    let (Some(_sig), Some(expires_raw)) = (sig, expires_raw) else {
        return ValidationResult { valid: false, expires_at: None, time_remaining_s: None, reason: Some(InvalidReason::MissingParams) };
    };

    let Ok(expires) = expires_raw.parse::<u64>() else {
        return ValidationResult { valid: false, expires_at: None, time_remaining_s: None, reason: Some(InvalidReason::MalformedExpires) };
    };

    let remaining = expires as i64 - now_epoch_s as i64;
    if remaining < 0 {
        return ValidationResult {
            valid: false,
            expires_at: Some(expires),
            time_remaining_s: Some(remaining),
            reason: Some(InvalidReason::Expired),
        };
    }

    ValidationResult { valid: true, expires_at: Some(expires), time_remaining_s: Some(remaining), reason: None }
}

/// Owns the account-scoped TempURL key lifecycle: generate-install-verify,
/// reset, and desync detection.
pub struct TempUrlKeyManager {
    key: tokio::sync::RwLock<Option<String>>,
}

impl Default for TempUrlKeyManager {
    fn default() -> Self {
        Self { key: tokio::sync::RwLock::new(None) }
    }
}

impl TempUrlKeyManager {
    pub async fn current_key(&self) -> Option<String> {
        self.key.read().await.clone()
    }

    /// Wipes the local key; the next `ensure_key` call regenerates and
    /// re-installs it.
    pub async fn reset(&self) {
        *self.key.write().await = None;
    }

    /// If no local key exists, generates one, installs it via
    /// `set_account_meta`, and verifies the server echoed it back via
    /// `head_account` before trusting it locally. On verification failure
    /// the key is discarded rather than cached.
    pub async fn ensure_key(&self, client: &ApiClient) -> HaioResult<String> {
        if let Some(key) = self.current_key().await {
            return Ok(key);
        }

        let key = generate_key();
        client.set_account_meta(TEMP_URL_KEY_META, &key).await?;

        let headers = client.head_account().await?;
        let echoed = headers
            .get(TEMP_URL_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if echoed.as_deref() != Some(key.as_str()) {
            return Err(HaioError::TempUrlKeyNotAccepted);
        }

        *self.key.write().await = Some(key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s4_fixed_clock_signing() {
        let request = SignRequest {
            method: HttpMethod::Get,
            duration_seconds: 86400,
            object_path: "/v1/AUTH_alice/docs/report.pdf",
            ip: None,
        };
        // now_epoch_s + duration == 1699165092 ⇒ now = 1699078692
        let signed = sign("<base>", "secret123", 1699165092 - 86400, &request);

        let expected_sig = hmac_sha1_hex("secret123", "GET\n1699165092\n/v1/AUTH_alice/docs/report.pdf");
        assert_eq!(signed.signature, expected_sig);
        assert_eq!(signed.expires_epoch_s, 1699165092);
        assert_eq!(
            signed.url,
            format!("<base>/v1/AUTH_alice/docs/report.pdf?temp_url_sig={expected_sig}&temp_url_expires=1699165092")
        );
    }

    #[test]
    fn scenario_s4_validation_flips_to_expired() {
        let request = SignRequest { method: HttpMethod::Get, duration_seconds: 86400, object_path: "/v1/AUTH_alice/docs/report.pdf", ip: None };
        let signed = sign("<base>", "secret123", 1699165092 - 86400, &request);

        let still_valid = validate(&signed.url, 1699165090);
        assert!(still_valid.valid);

        let expired = validate(&signed.url, 1699165093);
        assert!(!expired.valid);
        assert_eq!(expired.reason, Some(InvalidReason::Expired));
    }

    #[test]
    fn property_p5_round_trip_with_tolerance() {
        let request = SignRequest { method: HttpMethod::Put, duration_seconds: 120, object_path: "/v1/AUTH_bob/photos/a.jpg", ip: None };
        let signed = sign("<base>", "anykey", 1_000_000, &request);
        let result = validate(&signed.url, 1_000_000);
        assert!(result.valid);
        assert!((result.time_remaining_s.unwrap() - 120).abs() <= 1);
    }

    #[test]
    fn property_p6_signature_is_deterministic() {
        let request = SignRequest { method: HttpMethod::Get, duration_seconds: 60, object_path: "/v1/AUTH_a/b/c", ip: None };
        let a = sign("<base>", "k", 100, &request);
        let b = sign("<base>", "k", 100, &request);
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn ip_bound_url_appends_ip_to_signed_string_and_query() {
        let request = SignRequest { method: HttpMethod::Get, duration_seconds: 60, object_path: "/v1/AUTH_a/b/c", ip: Some("203.0.113.5") };
        let signed = sign("<base>", "k", 100, &request);
        let expected_sig = hmac_sha1_hex("k", "GET\n160\n/v1/AUTH_a/b/c\nip=203.0.113.5");
        assert_eq!(signed.signature, expected_sig);
        assert!(signed.url.ends_with("&ip=203.0.113.5"));
    }

    #[test]
    fn prefix_variant_prefixes_the_method_in_the_signed_string() {
        let request = SignRequest { method: HttpMethod::Get, duration_seconds: 60, object_path: "/v1/AUTH_a/b/", ip: None };
        let signed = sign_prefix("<base>", "k", 100, &request);
        let expected_sig = hmac_sha1_hex("k", "prefix:GET\n160\n/v1/AUTH_a/b/");
        assert_eq!(signed.signature, expected_sig);
    }

    #[test]
    fn validate_missing_params_is_reported() {
        let result = validate("<base>/v1/AUTH_a/b/c", 0);
        assert!(!result.valid);
        assert_eq!(result.reason, Some(InvalidReason::MissingParams));
    }

    #[test]
    fn validate_malformed_expires_is_reported() {
        let result = validate("<base>/v1/AUTH_a/b/c?temp_url_sig=abc&temp_url_expires=not-a-number", 0);
        assert!(!result.valid);
        assert_eq!(result.reason, Some(InvalidReason::MalformedExpires));
    }

    #[tokio::test]
    async fn reset_clears_cached_key() {
        let manager = TempUrlKeyManager::default();
        *manager.key.write().await = Some("cached".to_string());
        manager.reset().await;
        assert_eq!(manager.current_key().await, None);
    }
}
