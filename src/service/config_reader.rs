use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use election_core::{ElectionSettings, MemoryStore, Nominee, NomineeId, SubmissionLimits};

use crate::service::*;

pub const BIND_ENV: &str = "BALLOTBOX_BIND";
pub const ADMIN_TOKEN_ENV: &str = "BALLOTBOX_ADMIN_TOKEN";
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSection {
    #[serde(rename = "maxVotes")]
    pub max_votes: Option<u64>,
    pub title: Option<String>,
    #[serde(default)]
    pub limits: LimitsSection,
}

/// Field length limits for submissions. Missing entries keep the defaults.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(rename = "maxNameLength")]
    pub max_name_length: Option<usize>,
    #[serde(rename = "maxEmailLength")]
    pub max_email_length: Option<usize>,
    #[serde(rename = "maxPhoneLength")]
    pub max_phone_length: Option<usize>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct NomineeEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "photoUrl")]
    pub photo_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(rename = "snapshotPath")]
    pub snapshot_path: Option<PathBuf>,
    #[serde(rename = "lockTimeoutMs")]
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(rename = "adminToken")]
    pub admin_token: Option<String>,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            bind: default_bind(),
            admin_token: None,
        }
    }
}

/// The election description, as read from the configuration file.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BallotConfig {
    pub election: ElectionSection,
    pub nominees: Vec<NomineeEntry>,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl BallotConfig {
    pub fn settings(&self) -> ElectionSettings {
        ElectionSettings::new(
            self.election
                .max_votes
                .unwrap_or(ElectionSettings::DEFAULT_MAX_VOTES),
        )
    }

    pub fn nominees(&self) -> Vec<Nominee> {
        self.nominees
            .iter()
            .map(|n| Nominee {
                id: NomineeId::new(n.id.trim()),
                name: n.name.clone(),
                photo_url: n.photo_url.clone().filter(|s| !s.is_empty()),
                description: n.description.clone().filter(|s| !s.is_empty()),
                vote_count: 0,
            })
            .collect()
    }

    pub fn limits(&self) -> SubmissionLimits {
        let l = &self.election.limits;
        let d = SubmissionLimits::DEFAULT;
        SubmissionLimits {
            max_name_len: l.max_name_length.unwrap_or(d.max_name_len),
            max_email_len: l.max_email_length.unwrap_or(d.max_email_len),
            max_phone_len: l.max_phone_length.unwrap_or(d.max_phone_len),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.storage
            .lock_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(MemoryStore::DEFAULT_LOCK_TIMEOUT)
    }

    /// Applies the environment overrides. `lookup` reads a variable.
    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(bind) = lookup(BIND_ENV).filter(|s| !s.trim().is_empty()) {
            debug!("apply_overrides: bind address from {}", BIND_ENV);
            self.server.bind = bind.trim().to_string();
        }
        if let Some(token) = lookup(ADMIN_TOKEN_ENV).filter(|s| !s.is_empty()) {
            debug!("apply_overrides: admin token from {}", ADMIN_TOKEN_ENV);
            self.server.admin_token = Some(token);
        }
    }

    /// Makes a relative snapshot path relative to the given directory.
    pub fn resolve_paths(&mut self, root: &Path) {
        if let Some(p) = &self.storage.snapshot_path {
            if p.is_relative() {
                self.storage.snapshot_path = Some(root.join(p));
            }
        }
    }
}

pub fn validate_config(config: &BallotConfig) -> ServiceResult<()> {
    ensure!(
        !config.nominees.is_empty(),
        InvalidConfigSnafu {
            reason: "at least one nominee is required"
        }
    );
    if let Some(max_votes) = config.election.max_votes {
        ensure!(
            max_votes > 0,
            InvalidConfigSnafu {
                reason: "maxVotes must be positive"
            }
        );
    }
    let limits = &config.election.limits;
    for (key, value) in [
        ("maxNameLength", limits.max_name_length),
        ("maxEmailLength", limits.max_email_length),
        ("maxPhoneLength", limits.max_phone_length),
    ] {
        ensure!(
            value != Some(0),
            InvalidConfigSnafu {
                reason: format!("{} must be positive", key)
            }
        );
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for n in config.nominees.iter() {
        let id = n.id.trim();
        ensure!(
            !id.is_empty(),
            InvalidConfigSnafu {
                reason: format!("nominee {:?} has an empty id", n.name)
            }
        );
        ensure!(
            seen.insert(id),
            InvalidConfigSnafu {
                reason: format!("nominee id {:?} is used more than once", id)
            }
        );
    }
    if config.server.admin_token.as_deref() == Some("") {
        whatever!("adminToken may not be empty, remove it to disable administration")
    }
    Ok(())
}

pub fn parse_config(contents: &str) -> ServiceResult<BallotConfig> {
    serde_json::from_str(contents).context(ParsingJsonSnafu {})
}

/// Reads, completes and validates the configuration file.
pub fn read_config(path: &str) -> ServiceResult<BallotConfig> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let mut config = parse_config(&contents)?;
    config.apply_overrides(|name| env::var(name).ok());
    if let Some(root) = Path::new(path).parent() {
        config.resolve_paths(root);
    }
    validate_config(&config)?;
    debug!("read_config: {:?}", config.election);
    Ok(config)
}
