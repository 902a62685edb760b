//! Credential resolution for broker channels.
//!
//! A single provider replaces ad-hoc credential wiring: sources are tried
//! once, in order, and the first success is cached for the process lifetime.
//! Rotation is an external concern; there is no proactive refresh.

use crate::config::CredentialsConfig;
use crate::error::{Error, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable holding an inline bearer token.
pub const TOKEN_ENV: &str = "PSGATE_TOKEN";

/// Environment variable naming a file that holds the bearer token.
pub const TOKEN_FILE_ENV: &str = "PSGATE_TOKEN_FILE";

/// Where a credential was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Inline token from configuration.
    ConfigToken,
    /// Token file named in configuration.
    ConfigTokenFile,
    /// `PSGATE_TOKEN` / `PSGATE_TOKEN_FILE` environment variables.
    Environment,
    /// Explicitly allowed unauthenticated access.
    Anonymous,
}

/// A resolved credential, read-only and safely shared by all channels.
#[derive(Debug, Clone)]
pub struct Credential {
    token: Option<String>,
    source: CredentialSource,
}

impl Credential {
    /// The bearer token, if this credential carries one.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Where the credential was resolved from.
    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

/// Resolves and caches the process-wide broker credential.
pub struct CredentialProvider {
    config: CredentialsConfig,
    cached: OnceCell<Credential>,
}

impl CredentialProvider {
    /// Create a provider from credential configuration.
    pub fn new(config: CredentialsConfig) -> Self {
        Self {
            config,
            cached: OnceCell::new(),
        }
    }

    /// Resolve the credential.
    ///
    /// Sources are tried once, first success wins; the result is cached for
    /// the remainder of the process. A configured source that cannot be read
    /// is an error rather than a fallthrough, so misconfiguration fails fast.
    /// No retry happens here; callers decide whether to retry resolution.
    pub fn resolve(&self) -> Result<Credential> {
        self.cached
            .get_or_try_init(|| self.resolve_uncached())
            .cloned()
    }

    fn resolve_uncached(&self) -> Result<Credential> {
        if let Some(token) = &self.config.token {
            if token.is_empty() {
                return Err(Error::Auth("configured token is empty".into()));
            }
            info!("Using inline token from configuration");
            return Ok(Credential {
                token: Some(token.clone()),
                source: CredentialSource::ConfigToken,
            });
        }

        if let Some(path) = &self.config.token_file {
            let token = read_token_file(path)?;
            info!(path = %path.display(), "Using token file from configuration");
            return Ok(Credential {
                token: Some(token),
                source: CredentialSource::ConfigTokenFile,
            });
        }

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                info!("Using token from {} environment variable", TOKEN_ENV);
                return Ok(Credential {
                    token: Some(token),
                    source: CredentialSource::Environment,
                });
            }
        }

        if let Ok(path) = std::env::var(TOKEN_FILE_ENV) {
            if !path.is_empty() {
                let token = read_token_file(Path::new(&path))?;
                info!(path = %path, "Using token file from {} environment variable", TOKEN_FILE_ENV);
                return Ok(Credential {
                    token: Some(token),
                    source: CredentialSource::Environment,
                });
            }
        }

        if self.config.allow_anonymous {
            debug!("No credential source configured; anonymous access allowed");
            return Ok(Credential {
                token: None,
                source: CredentialSource::Anonymous,
            });
        }

        Err(Error::Auth(
            "no credential source configured: set credentials.token, credentials.token_file, \
             PSGATE_TOKEN, PSGATE_TOKEN_FILE, or credentials.allow_anonymous"
                .into(),
        ))
    }
}

fn read_token_file(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Auth(format!("cannot read token file {}: {}", path.display(), e)))?;
    let token = raw.trim().to_string();
    if token.is_empty() {
        return Err(Error::Auth(format!(
            "token file {} is empty",
            path.display()
        )));
    }
    Ok(token)
}
