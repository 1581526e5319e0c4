use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use log::info;
use std::path::PathBuf;

use nourish_core::remote::Identity;

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct Config {
    /// On-device key-value store backing the local state.
    pub storage_path: PathBuf,
    /// Document database used by `nourish serve`.
    pub server_db_path: PathBuf,
    pub data_dir: PathBuf,
    pub remote_url: Option<String>,
    pub user_id: Option<String>,
    pub identity_token: Option<String>,
    pub groq_api_key: Option<String>,
    pub groq_base_url: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "nourish").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config {
            storage_path: data_dir.join("local.db"),
            server_db_path: data_dir.join("documents.db"),
            data_dir,
            remote_url: env_var("NOURISH_REMOTE_URL").map(|u| u.trim_end_matches('/').to_string()),
            user_id: env_var("NOURISH_USER_ID"),
            identity_token: env_var("NOURISH_IDENTITY_TOKEN"),
            groq_api_key: env_var("GROQ_API_KEY"),
            groq_base_url: env_var("GROQ_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GROQ_BASE_URL.to_string()),
        })
    }

    /// Whether a remote store and an identity are both configured.
    pub fn sync_enabled(&self) -> bool {
        self.remote_url.is_some() && self.user_id.is_some()
    }

    pub fn remote_url(&self) -> Result<&str> {
        match self.remote_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!("No remote store configured. Set NOURISH_REMOTE_URL"),
        }
    }

    pub fn identity(&self) -> Result<Identity> {
        let Some(user_id) = self.user_id.clone() else {
            bail!("No identity configured. Set NOURISH_USER_ID");
        };
        Ok(Identity {
            user_id,
            token: self.identity_token.clone(),
        })
    }

    /// Load the server API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)`. Identities present this key as their
    /// token when exchanging it for a session.
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        info!("Generated new API key at {}", path.display());
        eprintln!("Generated new API key: {key}");
        eprintln!("Clients sign in with: NOURISH_IDENTITY_TOKEN={key}");
        Ok((key, true))
    }
}
