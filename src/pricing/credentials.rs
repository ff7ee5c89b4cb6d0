use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Login details for one partner site.
#[derive(Clone, Deserialize)]
pub struct SiteCredentials {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SiteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteCredentials")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Deserialize)]
struct CredentialFile {
    #[serde(default)]
    websites: Vec<SiteCredentials>,
}

/// Site display name → credentials, read from `{"websites": [...]}`.
#[derive(Debug, Default)]
pub struct CredentialStore {
    sites: HashMap<String, SiteCredentials>,
}

impl CredentialStore {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Malformed credentials file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let file: CredentialFile = serde_json::from_str(raw)?;
        Ok(CredentialStore {
            sites: file
                .websites
                .into_iter()
                .map(|site| (site.name.clone(), site))
                .collect(),
        })
    }

    pub fn get(&self, site: &str) -> Option<&SiteCredentials> {
        self.sites.get(site)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }
}
