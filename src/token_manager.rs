use log::{debug, info};
use reqwest::header::HeaderMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{TrackerError, TrackerResult};
use crate::http_gateway::{HttpGateway, RequestBody};
use crate::models::{ClientCredentials, Credential, TokenResponse};

struct TokenState {
    refresh_token: String,
    credential: Option<Credential>,
}

/// Owns the OAuth credential for the process.
///
/// The access token is obtained lazily on first use by exchanging the current
/// refresh token. Refresh tokens rotate, so every successful exchange is
/// written back to the token store before it is handed out.
pub struct TokenManager {
    gateway: HttpGateway,
    token_url: String,
    client: ClientCredentials,
    store_path: PathBuf,
    state: Mutex<TokenState>,
}

impl TokenManager {
    /// Builds a manager seeded from the token store, falling back to
    /// `seed_refresh_token` when no store exists yet.
    pub fn new(
        gateway: HttpGateway,
        token_url: impl Into<String>,
        client: ClientCredentials,
        store_path: impl Into<PathBuf>,
        seed_refresh_token: Option<String>,
    ) -> TrackerResult<Self> {
        let store_path = store_path.into();
        let refresh_token = match load_credential(&store_path)? {
            Some(stored) => {
                debug!("Using refresh token from {}", store_path.display());
                stored.refresh_token
            }
            None => seed_refresh_token.ok_or_else(|| {
                TrackerError::Config(format!(
                    "No refresh token: {} does not exist and none was configured",
                    store_path.display()
                ))
            })?,
        };

        Ok(Self {
            gateway,
            token_url: token_url.into(),
            client,
            store_path,
            state: Mutex::new(TokenState {
                refresh_token,
                credential: None,
            }),
        })
    }

    /// Current credential, refreshing first if none has been obtained yet.
    pub async fn credential(&self) -> TrackerResult<Credential> {
        let mut state = self.state.lock().await;
        if let Some(credential) = &state.credential {
            return Ok(credential.clone());
        }
        self.exchange(&mut state).await
    }

    /// Exchanges the refresh token unconditionally.
    pub async fn refresh(&self) -> TrackerResult<Credential> {
        let mut state = self.state.lock().await;
        self.exchange(&mut state).await
    }

    async fn exchange(&self, state: &mut TokenState) -> TrackerResult<Credential> {
        let body = RequestBody::Form(vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("client_id".to_string(), self.client.client_id.clone()),
            ("client_secret".to_string(), self.client.client_secret.clone()),
            ("refresh_token".to_string(), state.refresh_token.clone()),
        ]);

        let value = self
            .gateway
            .post(&self.token_url, &body, HeaderMap::new())
            .await
            .map_err(|e| match e {
                TrackerError::Transport { status, body, .. } => TrackerError::Auth { status, body },
                other => other,
            })?;
        let response: TokenResponse = serde_json::from_value(value)?;

        let credential = Credential {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .unwrap_or_else(|| state.refresh_token.clone()),
        };
        save_credential(&self.store_path, &credential)?;
        info!("Refreshed access token; credential stored in {}", self.store_path.display());

        state.refresh_token = credential.refresh_token.clone();
        state.credential = Some(credential.clone());
        Ok(credential)
    }
}

/// Reads a persisted credential, `None` if the file does not exist.
pub fn load_credential(path: &Path) -> TrackerResult<Option<Credential>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Writes the credential next to `path` first and renames it into place, so
/// an interrupted write never leaves a truncated store behind.
pub fn save_credential(path: &Path, credential: &Credential) -> TrackerResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = staging_path(path);
    fs::write(&staging, serde_json::to_string_pretty(credential)?)?;
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "token".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}
