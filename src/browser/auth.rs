//! Restored login state for authenticated timelines.
//!
//! The crawl engine treats auth state as an opaque blob and hands it to the
//! session factory unchanged. `ChromeSession` reads it as a browser
//! storage-state JSON document and restores its cookies before navigating.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::SessionError;

/// Opaque serialized login state.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthState(Vec<u8>);

impl AuthState {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Read auth state from a file (usually a storage-state JSON export).
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        tokio::fs::read(path).await.map(Self)
    }

    /// Cookies contained in a storage-state document.
    ///
    /// Accepts `{"cookies": [...]}` as well as a bare cookie array. Entries
    /// missing a name or domain are dropped.
    pub fn cookies(&self) -> Result<Vec<StoredCookie>, SessionError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Document {
            State { cookies: Vec<StoredCookie> },
            Bare(Vec<StoredCookie>),
        }

        let doc: Document = serde_json::from_slice(&self.0)
            .map_err(|e| SessionError::Protocol(format!("unreadable auth state: {}", e)))?;
        let cookies = match doc {
            Document::State { cookies } | Document::Bare(cookies) => cookies,
        };
        Ok(cookies
            .into_iter()
            .filter(|c| !c.name.is_empty() && !c.domain.is_empty())
            .collect())
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthState(<{} bytes>)", self.0.len())
    }
}

/// A cookie as exported by browser automation tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    #[serde(alias = "key")]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    /// Expiry as seconds since the epoch; negative or absent for session cookies.
    #[serde(default)]
    pub expires: Option<f64>,
}

#[cfg(feature = "browser")]
impl StoredCookie {
    pub(crate) fn to_param(
        &self,
    ) -> Result<chromiumoxide::cdp::browser_protocol::network::CookieParam, String> {
        use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};

        let mut builder = CookieParam::builder()
            .name(self.name.clone())
            .value(self.value.clone())
            .domain(self.domain.clone())
            .secure(self.secure)
            .http_only(self.http_only);
        if let Some(ref path) = self.path {
            builder = builder.path(path.clone());
        }
        if let Some(expires) = self.expires.filter(|e| *e > 0.0) {
            builder = builder.expires(TimeSinceEpoch::new(expires));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_state_document() {
        let state = AuthState::from_bytes(
            r#"{
                "cookies": [
                    {"name": "auth_token", "value": "abc", "domain": ".x.com", "path": "/",
                     "secure": true, "httpOnly": true, "expires": 1893456000},
                    {"name": "", "value": "dropped", "domain": ".x.com"}
                ],
                "origins": []
            }"#,
        );
        let cookies = state.cookies().unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "auth_token");
        assert!(cookies[0].http_only);
        assert_eq!(cookies[0].expires, Some(1893456000.0));
    }

    #[test]
    fn test_bare_cookie_array_with_key_alias() {
        let state =
            AuthState::from_bytes(r#"[{"key": "ct0", "value": "token", "domain": "x.com"}]"#);
        let cookies = state.cookies().unwrap();
        assert_eq!(cookies[0].name, "ct0");
        assert_eq!(cookies[0].path, None);
    }

    #[test]
    fn test_garbage_is_a_protocol_error() {
        let state = AuthState::from_bytes(b"\x00not json".to_vec());
        assert!(matches!(state.cookies(), Err(SessionError::Protocol(_))));
    }

    #[test]
    fn test_debug_does_not_leak_contents() {
        let state = AuthState::from_bytes("secret-session-token");
        let printed = format!("{:?}", state);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("20 bytes"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"[]").await.unwrap();

        let state = AuthState::load(&path).await.unwrap();
        assert_eq!(state.as_bytes(), b"[]");
        assert!(state.cookies().unwrap().is_empty());
    }
}
