use anyhow::{Context, Result};
use async_trait::async_trait;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio::sync::mpsc;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{InstalledFlowAuthenticator, InstalledFlowReturnMethod, read_application_secret};

const APP_NAME: &str = "maildash";
const TOKEN_KEY: &str = "google_session";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

pub const SCOPES: &[&str] = &["openid", "email", "profile"];

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

/// Keeps the OAuth token in the OS keyring so the sign-in survives restarts.
pub struct RingStorage;

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<()> {
        let entry = entry()?;

        let data = TokenData {
            tokens: vec![token],
        };
        let serialized = serde_json::to_string(&data).context("Failed to serialize tokens")?;

        entry
            .set_password(&serialized)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.get_all()
            .await
            .ok()
            .and_then(|data| data.tokens.into_iter().next())
    }
}

impl RingStorage {
    async fn get_all(&self) -> Result<TokenData> {
        match entry()?.get_password() {
            Ok(serialized) => {
                serde_json::from_str(&serialized).context("Failed to deserialize tokens")
            }
            Err(keyring::Error::NoEntry) => Ok(TokenData::default()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }

    /// Forgets the stored session. Clearing an absent token is not an error.
    pub async fn clear_token(&self) -> Result<()> {
        match entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

fn entry() -> Result<Entry> {
    Entry::new(APP_NAME, TOKEN_KEY).map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
}

/// Hands the consent URL to the login screen and tries to open a browser.
pub struct TuiDelegate {
    pub tx: mpsc::Sender<String>,
}

impl InstalledFlowDelegate for TuiDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            let _ = self.tx.send(url.to_string()).await;
            if let Err(e) = open::that(url) {
                tracing::warn!(error = %e, "could not open browser for sign-in");
            }
            // The redirect flow receives the code itself.
            Ok(String::new())
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct UserInfo {
    name: Option<String>,
    given_name: Option<String>,
    email: Option<String>,
}

impl UserInfo {
    fn display_name(self) -> String {
        [self.name, self.given_name, self.email]
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| "there".to_string())
    }
}

/// The signed-in user. Created once at startup and handed to the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub display_name: String,
}

impl Session {
    /// Session used with `--no-auth`.
    pub fn local() -> Self {
        Self {
            display_name: "developer".to_string(),
        }
    }

    pub fn greeting(&self) -> String {
        format!("Welcome back, {}", self.display_name)
    }

    /// Runs the installed-app flow (reusing a stored token when there is one)
    /// and looks up who signed in.
    pub async fn sign_in(credentials: &Path, delegate: TuiDelegate) -> Result<Self> {
        let secret = read_application_secret(credentials)
            .await
            .with_context(|| format!("Failed to read application secret {}", credentials.display()))?;

        let auth = InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
            .with_storage(Box::new(RingStorage))
            .flow_delegate(Box::new(delegate))
            .build()
            .await
            .context("Failed to build authenticator")?;

        let token = auth.token(SCOPES).await.context("Sign-in failed")?;
        let access = token
            .token()
            .context("Sign-in returned no access token")?
            .to_string();

        let info: UserInfo = reqwest::Client::new()
            .get(USERINFO_URL)
            .bearer_auth(access)
            .send()
            .await
            .context("Failed to reach userinfo endpoint")?
            .error_for_status()
            .context("Userinfo request rejected")?
            .json()
            .await
            .context("Invalid userinfo response")?;

        let session = Self {
            display_name: info.display_name(),
        };
        tracing::info!(user = %session.display_name, "signed in");
        Ok(session)
    }
}
