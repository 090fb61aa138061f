// # UniFi OS Router Client
//
// This crate provides the UniFi OS implementation of `RouterClient` for the
// Guardian system.
//
// ## Implementation Status
//
// - ✅ Session login with cookie jar and anti-forgery token capture
// - ✅ Anti-forgery token kept with the cookie jar (rotations followed)
// - ✅ Connected client listing (`stat/sta`)
// - ✅ Block / unblock via the station manager (`cmd/stamgr`)
// - ✅ HTTP timeout configured (default 5 seconds)
// - ✅ Self-signed certificates accepted unless verification is enabled
// - ❌ NO retry logic (intentionally omitted - owned by ScanEngine)
// - ❌ NO re-login on expired sessions (owned by ScanEngine)
// - ❌ NO background tasks
//
// ## Trust Level: Untrusted (Router Client)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTPS calls to the configured router only
// - ✅ Keep session cookies between calls
// - ✅ Parse controller-specific responses
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Implement retry logic
// - ❌ Access the registry
//
// ## Security Requirements
//
// - Password NEVER appears in logs or Debug output
// - Anti-forgery token NEVER appears in logs
//
// ## API Reference
//
// - Login: POST `/api/auth/login` → session cookie + `X-Csrf-Token` header
// - Any response may carry `X-Updated-CSRF-Token` with a rotated token
// - Clients: GET `/proxy/network/api/s/:site/stat/sta`
// - Block/unblock: POST `/proxy/network/api/s/:site/cmd/stamgr`
//   with `{"cmd": "block-sta" | "unblock-sta", "mac": ...}`

use async_trait::async_trait;
use guardian_core::config::{RouterConfig, is_valid_site};
use guardian_core::model::MacAddress;
use guardian_core::traits::{AuthContext, ClientInfo, RouterClient};
use guardian_core::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use url::Url;

/// Header carrying the anti-forgery token
const CSRF_HEADER: &str = "x-csrf-token";

/// Header carrying a rotated anti-forgery token
const UPDATED_CSRF_HEADER: &str = "x-updated-csrf-token";

/// Login endpoint on UniFi OS consoles
const LOGIN_PATH: &str = "/api/auth/login";

/// UniFi OS router client
///
/// # Trust Level: Untrusted
///
/// The session (cookie jar and anti-forgery token) lives inside the client,
/// so every holder of a shared client always sends the token that matches
/// the current cookie, whoever logged in last. All coordination (re-login,
/// re-fetch, scheduling) is owned by `ScanEngine` and the sync components.
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the password.
pub struct UnifiClient {
    /// Router base URL
    base_url: Url,

    /// Network site name
    site: String,

    /// Login user
    username: String,

    /// Login password
    /// ⚠️ NEVER log this value
    password: SecretString,

    /// HTTP client with cookie jar
    client: reqwest::Client,

    /// Anti-forgery token bound to the current session cookie
    /// ⚠️ NEVER log this value
    csrf_token: RwLock<Option<String>>,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for UnifiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiClient")
            .field("base_url", &self.base_url.as_str())
            .field("site", &self.site)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// `stat/sta` response envelope
#[derive(Debug, Deserialize)]
struct StationList {
    #[serde(default)]
    data: Vec<Station>,
}

/// One connected station as reported by the controller
#[derive(Debug, Deserialize)]
struct Station {
    #[serde(default)]
    mac: String,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl Station {
    fn into_client_info(self) -> Option<ClientInfo> {
        let mac = match MacAddress::parse(&self.mac) {
            Ok(mac) => mac,
            Err(_) => {
                tracing::warn!("Ignoring station with invalid MAC '{}'", self.mac);
                return None;
            }
        };
        let hostname = self
            .hostname
            .filter(|h| !h.trim().is_empty())
            .or(self.name.filter(|n| !n.trim().is_empty()));
        Some(ClientInfo::new(mac, self.ip, hostname))
    }
}

impl UnifiClient {
    /// Create a client from router configuration
    ///
    /// # Errors
    ///
    /// - `Error::Config`: Invalid host URL or HTTP client construction failure
    pub fn new(config: &RouterConfig) -> Result<Self> {
        let base_url = Url::parse(config.host.trim())
            .map_err(|e| Error::config(format!("Invalid router host '{}': {}", config.host, e)))?;
        if !is_valid_site(&config.site) {
            return Err(Error::config(format!("Invalid router site '{}'", config.site)));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        if !config.verify_tls {
            tracing::debug!("TLS certificate verification disabled for {}", base_url);
        }

        Ok(Self {
            base_url,
            site: config.site.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
            csrf_token: RwLock::new(None),
        })
    }

    /// Router base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::config(format!("Invalid router URL for {}: {}", path, e)))
    }

    fn site_url(&self, suffix: &str) -> Result<Url> {
        self.url(&format!("/proxy/network/api/s/{}/{}", self.site, suffix))
    }

    /// Attach the current anti-forgery token
    ///
    /// The token stored by the last login (or rotation) wins over the one in
    /// `ctx`: the cookie jar is shared, so only the latest pair is valid.
    fn apply_csrf(&self, request: reqwest::RequestBuilder, ctx: &AuthContext) -> reqwest::RequestBuilder {
        let stored = self
            .csrf_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match stored.or_else(|| ctx.csrf_token.clone()) {
            Some(token) => request.header(CSRF_HEADER, token),
            None => request,
        }
    }

    fn store_csrf(&self, token: Option<String>) {
        *self.csrf_token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Follow a token rotation announced by the controller
    fn update_csrf_from_response(&self, headers: &reqwest::header::HeaderMap) {
        if let Some(token) = headers
            .get(UPDATED_CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            tracing::trace!("Anti-forgery token rotated");
            self.store_csrf(Some(token.to_string()));
        }
    }
}

#[async_trait]
impl RouterClient for UnifiClient {
    /// Log in and capture the anti-forgery token
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /api/auth/login
    /// Content-Type: application/json
    ///
    /// {"username": "...", "password": "..."}
    /// ```
    async fn login(&self) -> Result<AuthContext> {
        let url = self.url(LOGIN_PATH)?;
        tracing::debug!("Logging in at {}", url);

        let body = json!({
            "username": self.username,
            "password": self.password.expose_secret(),
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::auth(format!("Login request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::auth(format!("Login rejected: HTTP {}", status)));
        }

        let csrf_token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if csrf_token.is_none() {
            tracing::warn!("Login response carried no anti-forgery token");
        }
        self.store_csrf(csrf_token.clone());

        tracing::debug!("Login successful");
        Ok(AuthContext::new(csrf_token))
    }

    /// List connected stations
    ///
    /// Stations with an unparsable MAC are skipped. The controller's
    /// `hostname` is preferred, falling back to its user-assigned `name`.
    async fn list_clients(&self, ctx: &AuthContext) -> Result<Vec<ClientInfo>> {
        let url = self.site_url("stat/sta")?;

        let response = self
            .apply_csrf(self.client.get(url), ctx)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("Client list request failed: {}", e)))?;
        self.update_csrf_from_response(response.headers());

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("Client list request returned HTTP {}", status)));
        }

        let stations: StationList = response
            .json()
            .await
            .map_err(|e| Error::fetch(format!("Failed to parse client list: {}", e)))?;

        let clients: Vec<ClientInfo> = stations
            .data
            .into_iter()
            .filter_map(Station::into_client_info)
            .collect();

        tracing::debug!("Router reports {} connected clients", clients.len());
        Ok(clients)
    }

    /// Block or unblock a station
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /proxy/network/api/s/:site/cmd/stamgr
    /// X-Csrf-Token: <token>
    ///
    /// {"cmd": "block-sta", "mac": "aa:bb:cc:dd:ee:ff"}
    /// ```
    async fn set_blocked(&self, ctx: &AuthContext, mac: &MacAddress, blocked: bool) -> Result<()> {
        let url = self.site_url("cmd/stamgr")?;
        let cmd = if blocked { "block-sta" } else { "unblock-sta" };
        let body = json!({ "cmd": cmd, "mac": mac.as_str() });

        let response = self
            .apply_csrf(self.client.post(url), ctx)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::enforcement(mac.as_str(), format!("{} request failed: {}", cmd, e)))?;
        self.update_csrf_from_response(response.headers());

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::enforcement(
                mac.as_str(),
                format!("{} returned HTTP {}: {}", cmd, status, text.trim()),
            ));
        }

        // The controller reports command errors in the envelope with HTTP 200
        if let Ok(envelope) = serde_json::from_str::<Value>(&text) {
            if envelope["meta"]["rc"] == "error" {
                let message = envelope["meta"]["msg"].as_str().unwrap_or("unknown error");
                return Err(Error::enforcement(mac.as_str(), format!("{} rejected: {}", cmd, message)));
            }
        }

        tracing::debug!("{} {}", cmd, mac);
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        "unifi"
    }
}
