// ABOUTME: Sync configuration loaded from crm-replicator.toml with built-in defaults
// ABOUTME: Describes object types, property selections, batching and source pacing

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::utils::validate_postgres_identifier;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "crm-replicator.toml";

/// HubSpot caps list pages at 100 records.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Upper bound for `default_lookback_hours` (ten years).
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 365 * 10;

/// Which properties to request and flatten for an object type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PropertySelectionRepr")]
pub enum PropertySelection {
    /// Discover every property the source exposes for the object type
    All,
    /// An explicit, ordered list of property names
    List(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PropertySelectionRepr {
    Keyword(String),
    List(Vec<String>),
}

impl TryFrom<PropertySelectionRepr> for PropertySelection {
    type Error = String;

    fn try_from(value: PropertySelectionRepr) -> Result<Self, Self::Error> {
        match value {
            PropertySelectionRepr::Keyword(k) if k.eq_ignore_ascii_case("all") => {
                Ok(PropertySelection::All)
            }
            PropertySelectionRepr::Keyword(other) => Err(format!(
                "expected \"all\" or a list of property names, got \"{other}\""
            )),
            PropertySelectionRepr::List(list) => Ok(PropertySelection::List(list)),
        }
    }
}

/// A single object type to sync together with its property selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectConfig {
    pub object_type: String,
    pub properties: PropertySelection,
}

/// Backoff settings applied when the source answers 429.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Wait used when the response carries no Retry-After header
    pub default_retry_after_secs: u64,
    /// First exponential backoff step
    pub initial_backoff_ms: u64,
    /// Cap for a single wait
    pub max_backoff_secs: u64,
    /// Give up once the total time spent waiting on one page would exceed this
    pub max_elapsed_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_retry_after_secs: 10,
            initial_backoff_ms: 1_000,
            max_backoff_secs: 60,
            max_elapsed_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub page_size: u32,
    pub timeout_secs: u64,
    /// Pause between page requests (the API allows ~100 requests per 10 seconds)
    pub page_delay_ms: u64,
    pub rate_limit: RateLimitConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.hubapi.com/crm/v3".to_string(),
            page_size: MAX_PAGE_SIZE,
            timeout_secs: 30,
            page_delay_ms: 100,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub schema: String,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
        }
    }
}

/// Complete configuration for a sync run.
///
/// Built once at startup and handed to every component explicitly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rows per upsert batch
    pub batch_size: usize,
    /// Destination table name = prefix + object type
    pub table_prefix: String,
    /// Window fetched for object types that have never been synced
    pub default_lookback_hours: i64,
    /// Where provisioning scripts for missing tables are written
    pub provisioning_dir: PathBuf,
    /// Keep the previous watermark when rows failed to load or transform
    pub hold_watermark_on_row_failures: bool,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub objects: BTreeMap<String, PropertySelection>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            table_prefix: "hubspot_".to_string(),
            default_lookback_hours: 24,
            provisioning_dir: PathBuf::from("."),
            hold_watermark_on_row_failures: false,
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            objects: default_objects(),
        }
    }
}

fn list(props: &[&str]) -> PropertySelection {
    PropertySelection::List(props.iter().map(|p| p.to_string()).collect())
}

fn default_objects() -> BTreeMap<String, PropertySelection> {
    let mut objects = BTreeMap::new();
    objects.insert(
        "contacts".to_string(),
        list(&[
            "email",
            "firstname",
            "lastname",
            "phone",
            "company",
            "hs_object_id",
            "createdate",
            "lastmodifieddate",
            "hs_lead_status",
            "lifecyclestage",
        ]),
    );
    objects.insert(
        "companies".to_string(),
        list(&[
            "name",
            "domain",
            "phone",
            "hs_object_id",
            "createdate",
            "lastmodifieddate",
            "industry",
            "city",
            "state",
            "country",
            "website",
        ]),
    );
    objects.insert(
        "deals".to_string(),
        list(&[
            "dealname",
            "dealstage",
            "pipeline",
            "amount",
            "closedate",
            "createdate",
            "hs_object_id",
            "lastmodifieddate",
            "hubspot_owner_id",
        ]),
    );
    objects
}

impl SyncConfig {
    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: SyncConfig =
            toml::from_str(contents).context("Failed to parse sync configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {:?}", path))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in {:?}", path))
    }

    /// Load an explicit file, else `crm-replicator.toml` if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            tracing::info!("Using configuration from {:?}", default_path);
            return Self::load(default_path);
        }

        tracing::debug!("No configuration file found, using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the rest of the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.source.page_size == 0 || self.source.page_size > MAX_PAGE_SIZE {
            bail!(
                "source.page_size must be between 1 and {} (got {})",
                MAX_PAGE_SIZE,
                self.source.page_size
            );
        }
        if self.default_lookback_hours <= 0 || self.default_lookback_hours > MAX_LOOKBACK_HOURS {
            bail!(
                "default_lookback_hours must be between 1 and {} (got {})",
                MAX_LOOKBACK_HOURS,
                self.default_lookback_hours
            );
        }
        if self.objects.is_empty() {
            bail!("No object types configured");
        }

        validate_postgres_identifier(&self.destination.schema)
            .context("Invalid destination schema")?;
        for (object_type, selection) in &self.objects {
            validate_postgres_identifier(&self.table_name(object_type))
                .with_context(|| format!("Invalid table name for object type '{}'", object_type))?;
            if let PropertySelection::List(props) = selection {
                if props.is_empty() {
                    bail!(
                        "Object type '{}' has an empty property list (use \"all\" to discover)",
                        object_type
                    );
                }
            }
        }

        Ok(())
    }

    /// Destination table for an object type.
    pub fn table_name(&self, object_type: &str) -> String {
        format!("{}{}", self.table_prefix, object_type)
    }

    /// All configured object types in a stable order.
    pub fn objects(&self) -> Vec<ObjectConfig> {
        self.objects
            .iter()
            .map(|(object_type, properties)| ObjectConfig {
                object_type: object_type.clone(),
                properties: properties.clone(),
            })
            .collect()
    }

    /// Restrict the configured object types to `only` (empty = everything).
    pub fn select_objects(&self, only: &[String]) -> Result<Vec<ObjectConfig>> {
        if only.is_empty() {
            return Ok(self.objects());
        }

        let mut selected = Vec::with_capacity(only.len());
        for name in only {
            match self.objects.get(name) {
                Some(properties) => selected.push(ObjectConfig {
                    object_type: name.clone(),
                    properties: properties.clone(),
                }),
                None => bail!(
                    "Object type '{}' is not configured. Known types: {}",
                    name,
                    self.objects.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            }
        }
        Ok(selected)
    }

    pub fn default_lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.default_lookback_hours)
    }
}
