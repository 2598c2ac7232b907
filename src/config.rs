use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{GroupText, OrganizationText};
use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "foph-harvest.json";
pub const DEFAULT_REGION: &str = "eu-central-1";
pub const DEFAULT_USER: &str = "harvest";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub catalog: CatalogEntry,
    #[serde(default)]
    pub store_dir: Option<String>,
    #[serde(default)]
    pub http: HttpEntry,
    #[serde(default)]
    pub organization: Option<OrganizationText>,
    #[serde(default)]
    pub group: Option<GroupText>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub assign_owner: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HttpEntry {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSettings {
    pub bucket_name: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub user: String,
    /// Grant `user` editor rights on every imported dataset.
    pub assign_owner: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_retries: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub bucket: BucketSettings,
    pub base_url: String,
    pub catalog: CatalogSettings,
    pub store_dir: Option<Utf8PathBuf>,
    pub http: HttpSettings,
    pub organization_text: OrganizationText,
    pub group_text: GroupText,
}

/// Secrets and bucket name that may be supplied through the environment.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub bucket_name: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub catalog_api_key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            bucket_name: read("FOPH_S3_BUCKET"),
            access_key: read("FOPH_S3_KEY"),
            secret_key: read("FOPH_S3_SECRET"),
            catalog_api_key: read("CKAN_API_KEY"),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<HarvestConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(HarvestError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, EnvOverrides::from_env())
    }

    pub fn resolve_config(
        config: Config,
        overrides: EnvOverrides,
    ) -> Result<HarvestConfig, HarvestError> {
        let bucket_name = overrides
            .bucket_name
            .or(config.bucket_name)
            .ok_or(HarvestError::MissingSetting("bucket_name"))?;
        let access_key = overrides
            .access_key
            .or(config.access_key)
            .ok_or(HarvestError::MissingSetting("access_key"))?;
        let secret_key = overrides
            .secret_key
            .or(config.secret_key)
            .ok_or(HarvestError::MissingSetting("secret_key"))?;
        let catalog_url = config
            .catalog
            .url
            .ok_or(HarvestError::MissingSetting("catalog.url"))?;

        let base_url = config
            .base_url
            .unwrap_or_else(|| default_base_url(&bucket_name));
        let defaults = HttpSettings::default();

        Ok(HarvestConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: BucketSettings {
                bucket_name,
                access_key,
                secret_key,
                region: config
                    .region
                    .unwrap_or_else(|| DEFAULT_REGION.to_string()),
                endpoint: config.endpoint,
            },
            catalog: CatalogSettings {
                url: catalog_url.trim_end_matches('/').to_string(),
                api_key: overrides.catalog_api_key.or(config.catalog.api_key),
                user: config
                    .catalog
                    .user
                    .unwrap_or_else(|| DEFAULT_USER.to_string()),
                assign_owner: config.catalog.assign_owner.unwrap_or(true),
            },
            store_dir: config.store_dir.map(Utf8PathBuf::from),
            http: HttpSettings {
                timeout: config
                    .http
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
                max_retries: config.http.max_retries.unwrap_or(defaults.max_retries),
            },
            organization_text: config.organization.unwrap_or_default(),
            group_text: config.group.unwrap_or_default(),
        })
    }
}

pub fn default_base_url(bucket_name: &str) -> String {
    format!("http://{bucket_name}.s3.amazonaws.com")
}
