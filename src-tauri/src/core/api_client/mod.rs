//! Authenticated API client (C2).
//!
//! Talks to the Swift/Haio account endpoint: authentication, container
//! listing, account metadata, and object listing. Every idempotent GET/HEAD
//! is retried with exponential backoff; a 401 triggers exactly one
//! re-authentication attempt before propagating `AuthExpired`/`AuthInvalid`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::{HaioError, HaioResult};

const MAX_RETRIES: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(4);

const HEADER_AUTH_USER: &str = "X-Auth-User";
const HEADER_AUTH_KEY: &str = "X-Auth-Key";
const HEADER_AUTH_TOKEN: &str = "X-Auth-Token";
const HEADER_STORAGE_URL: &str = "X-Storage-Url";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub name: String,
    pub count: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub name: String,
    pub bytes: u64,
    pub last_modified: String,
}

#[derive(Debug, Clone, Default)]
struct Session {
    token: Option<String>,
    storage_url: Option<String>,
}

/// Authenticated session state plus credentials needed to transparently
/// re-authenticate on token expiry.
struct AuthState {
    account: String,
    username: String,
    password: String,
    session: Session,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: RwLock<Option<AuthState>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> HaioResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HaioError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            auth: RwLock::new(None),
        })
    }

    /// Authenticates against `<base_url>/auth/v1.0` and caches the resulting
    /// token and storage URL along with the credentials, so later 401s can
    /// trigger exactly one silent re-authentication.
    pub async fn authenticate(
        &self,
        account: &str,
        username: &str,
        password: &str,
    ) -> HaioResult<String> {
        let url = format!("{}/auth/v1.0", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(HEADER_AUTH_USER, format!("{account}:{username}"))
            .header(HEADER_AUTH_KEY, password)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            if status.as_u16() == 401 {
                return Err(HaioError::AuthInvalid);
            }
            return Err(HaioError::ServerError(status.as_u16()));
        }

        let token = header_string(&response, HEADER_AUTH_TOKEN)
            .ok_or_else(|| HaioError::AuthInvalid)?;
        let storage_url = header_string(&response, HEADER_STORAGE_URL)
            .ok_or_else(|| HaioError::AuthInvalid)?;

        let mut guard = self.auth.write().await;
        *guard = Some(AuthState {
            account: account.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            session: Session {
                token: Some(token.clone()),
                storage_url: Some(storage_url),
            },
        });

        Ok(token)
    }

    async fn current_token_and_storage_url(&self) -> HaioResult<(String, String)> {
        let guard = self.auth.read().await;
        let state = guard.as_ref().ok_or(HaioError::AuthExpired)?;
        match (&state.session.token, &state.session.storage_url) {
            (Some(token), Some(storage_url)) => Ok((token.clone(), storage_url.clone())),
            _ => Err(HaioError::AuthExpired),
        }
    }

    /// Exposes the cached `(token, storage_url)` pair the mount agent needs
    /// to be handed its own connection config — a mount process authenticates
    /// independently of this `ApiClient`'s HTTP calls.
    pub async fn session_credentials(&self) -> HaioResult<(String, String)> {
        self.current_token_and_storage_url().await
    }

    /// Re-authenticates using the previously supplied credentials. Returns
    /// `AuthInvalid` (not `AuthExpired`) if no password is cached — the
    /// caller should prompt the user rather than retry silently.
    async fn reauthenticate(&self) -> HaioResult<()> {
        let (account, username, password) = {
            let guard = self.auth.read().await;
            let state = guard.as_ref().ok_or(HaioError::AuthInvalid)?;
            (state.account.clone(), state.username.clone(), state.password.clone())
        };
        self.authenticate(&account, &username, &password).await?;
        Ok(())
    }

    /// Lists containers for the authenticated account. An empty account is
    /// `Ok(vec![])`; transport/server failures are `Err`, never confused with
    /// an empty list.
    pub async fn list_containers(&self) -> HaioResult<Vec<ContainerInfo>> {
        let (_, storage_url) = self.current_token_and_storage_url().await?;
        let url = format!("{storage_url}?format=json");
        let body = self.get_with_retry_and_reauth(&url).await?;
        serde_json::from_str(&body).map_err(HaioError::from)
    }

    /// Sets an account-level metadata header (e.g. `Temp-URL-Key`).
    pub async fn set_account_meta(&self, header: &str, value: &str) -> HaioResult<()> {
        let (token, storage_url) = self.current_token_and_storage_url().await?;
        let response = self
            .http
            .post(&storage_url)
            .header(HEADER_AUTH_TOKEN, &token)
            .header(format!("X-Account-Meta-{header}"), value)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().as_u16() == 401 {
            self.reauthenticate().await?;
            return Err(HaioError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(HaioError::ServerError(response.status().as_u16()));
        }
        Ok(())
    }

    /// HEAD the account endpoint, returning response headers — used to
    /// verify metadata (e.g. a just-set TempURL key) was actually accepted.
    pub async fn head_account(&self) -> HaioResult<reqwest::header::HeaderMap> {
        let (token, storage_url) = self.current_token_and_storage_url().await?;
        let response = self
            .http
            .head(&storage_url)
            .header(HEADER_AUTH_TOKEN, &token)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().as_u16() == 401 {
            self.reauthenticate().await?;
            return Err(HaioError::AuthExpired);
        }
        if !response.status().is_success() {
            return Err(HaioError::ServerError(response.status().as_u16()));
        }
        Ok(response.headers().clone())
    }

    /// Lists objects in a container, paginating via `marker` until a short
    /// (less-than-full) page is returned.
    pub async fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> HaioResult<Vec<ObjectInfo>> {
        const PAGE_LIMIT: usize = 10_000;

        let (_, storage_url) = self.current_token_and_storage_url().await?;
        let mut all = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = format!("{storage_url}/{container}?format=json&limit={PAGE_LIMIT}");
            if let Some(p) = prefix {
                url.push_str(&format!("&prefix={}", urlencoding_simple(p)));
            }
            if let Some(m) = &marker {
                url.push_str(&format!("&marker={}", urlencoding_simple(m)));
            }

            let body = self.get_with_retry_and_reauth(&url).await?;
            let page: Vec<ObjectInfo> = serde_json::from_str(&body)?;
            let page_len = page.len();
            marker = page.last().map(|o| o.name.clone());
            all.extend(page);

            if page_len < PAGE_LIMIT {
                break;
            }
        }

        Ok(all)
    }

    /// GET with retry/backoff for transient errors, and exactly one
    /// transparent re-authentication attempt if the current token is rejected.
    async fn get_with_retry_and_reauth(&self, url: &str) -> HaioResult<String> {
        match self.get_with_retry(url).await {
            Err(HaioError::AuthExpired) => {
                self.reauthenticate().await?;
                self.get_with_retry(url).await
            }
            other => other,
        }
    }

    async fn get_with_retry(&self, url: &str) -> HaioResult<String> {
        let (token, _) = self.current_token_and_storage_url().await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .http
                .get(url)
                .header(HEADER_AUTH_TOKEN, &token)
                .send()
                .await;

            match result {
                Ok(response) if response.status().as_u16() == 401 => {
                    return Err(HaioError::AuthExpired);
                }
                Ok(response) if response.status().is_success() => {
                    return response.text().await.map_err(map_transport_error);
                }
                Ok(response) if is_retryable_status(response.status().as_u16()) && attempt < MAX_RETRIES => {
                    warn!(status = %response.status(), attempt, "retryable server error, backing off");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    continue;
                }
                Ok(response) => {
                    return Err(HaioError::ServerError(response.status().as_u16()));
                }
                Err(e) if attempt < MAX_RETRIES && (e.is_timeout() || e.is_connect()) => {
                    debug!(attempt, "transient network error, backing off: {e:?}");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    continue;
                }
                Err(e) => return Err(map_transport_error(e)),
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn backoff_delay(attempt: u32) -> Duration {
    let scaled = RETRY_BASE.saturating_mul(1u32 << (attempt - 1).min(16));
    scaled.min(RETRY_CAP)
}

fn map_transport_error(e: reqwest::Error) -> HaioError {
    if e.is_timeout() {
        HaioError::NetworkTimeout(e.url().map(|u| u.to_string()).unwrap_or_default())
    } else {
        HaioError::NetworkError(e.to_string())
    }
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Minimal percent-encoding for query parameters; avoids pulling in a full
/// URL-encoding crate for the handful of reserved characters object names
/// and prefixes can contain.
fn urlencoding_simple(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_clamped_to_cap() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
        assert!(backoff_delay(10) <= RETRY_CAP);
    }

    #[test]
    fn retryable_statuses_cover_server_errors() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(401));
    }

    #[test]
    fn urlencoding_simple_escapes_reserved_characters() {
        assert_eq!(urlencoding_simple("a b"), "a%20b");
        assert_eq!(urlencoding_simple("docs/report.pdf"), "docs%2Freport.pdf");
        assert_eq!(urlencoding_simple("simple-name_1.0"), "simple-name_1.0");
    }

    #[tokio::test]
    async fn list_containers_without_auth_returns_auth_expired() {
        let client = ApiClient::new("https://example.test", Duration::from_secs(5)).unwrap();
        let result = client.list_containers().await;
        assert!(matches!(result, Err(HaioError::AuthExpired)));
    }
}
