//! Variant and region configuration.
//!
//! Variants describe what runs (image, shape, map, admin list, idle policy)
//! and regions describe where it runs (display name, default hostnames, and
//! the backend strategy serving the region). Tenants may override parts of a
//! variant under `guild_variants`. The catalog is loaded once from a JSON
//! document:
//!
//! ```json
//! {
//!   "variants": { "standard-competitive": { "image": "...", "shape": "...", ... } },
//!   "regions": { "fr-par-1": { "display_name": "Paris", "backend": "container-instance", ... } },
//!   "guild_variants": { "1234": { "standard-competitive": { "admins": ["..."] } } }
//! }
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Region, VariantName};

/// Idle minutes applied when a variant does not set its own threshold.
pub const DEFAULT_EMPTY_MINUTES: u32 = 10;

/// Variant a tenant override builds on when no global variant shares its name.
pub const BASE_VARIANT: &str = "default";

/// Errors raised while loading or querying the catalog.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CatalogError {
    /// Raised when no variant with the requested name exists.
    #[error("unknown variant '{variant}'")]
    UnknownVariant {
        /// Requested variant.
        variant: VariantName,
    },
    /// Raised when no region with the requested name exists.
    #[error("unknown region '{region}'")]
    UnknownRegion {
        /// Requested region.
        region: Region,
    },
    /// Raised when the catalog file cannot be read.
    #[error("failed to read catalog {path}: {message}")]
    Io {
        /// Catalog path.
        path: String,
        /// Underlying error text.
        message: String,
    },
    /// Raised when the catalog document is malformed.
    #[error("failed to parse catalog {path}: {message}")]
    Parse {
        /// Catalog path, or `<inline>` for in-memory documents.
        path: String,
        /// Parser error text.
        message: String,
    },
}

/// Strategy used to provision servers in a region.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Container service scheduled onto dedicated compute hosts.
    ContainerService,
    /// Managed single-container instance.
    ContainerInstance,
}

impl BackendKind {
    /// Kebab-case label used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContainerService => "container-service",
            Self::ContainerInstance => "container-instance",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game-server configuration profile.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Container image reference.
    pub image: String,
    /// Compute shape or commercial type.
    pub shape: String,
    /// Virtual CPUs requested.
    #[serde(default = "default_ocpu")]
    pub ocpu: u32,
    /// Memory requested, in gigabytes.
    #[serde(default = "default_memory_gb")]
    pub memory_gb: u32,
    /// Player slots.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    /// Starting map.
    pub map: String,
    /// Hostname template; `{region}` is replaced by the region display name.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Identities always granted admin rights.
    #[serde(default)]
    pub admins: Vec<String>,
    /// Minutes a server may stay empty before it is reclaimed.
    #[serde(default)]
    pub empty_minutes_terminate: Option<u32>,
    /// Default config per game mode, exported as `DEFAULT_<MODE>_CFG`.
    #[serde(default)]
    pub default_cfgs: BTreeMap<String, String>,
    /// Extra environment passed verbatim to the server.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

const fn default_ocpu() -> u32 {
    1
}

const fn default_memory_gb() -> u32 {
    4
}

const fn default_max_players() -> u32 {
    24
}

impl VariantConfig {
    /// Idle threshold in minutes, falling back to [`DEFAULT_EMPTY_MINUTES`].
    #[must_use]
    pub fn empty_minutes(&self) -> u32 {
        self.empty_minutes_terminate.unwrap_or(DEFAULT_EMPTY_MINUTES)
    }
}

/// Tenant-specific replacement for selected variant fields.
///
/// Unset fields keep the value of the global variant.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GuildVariant {
    /// Container image.
    #[serde(default)]
    pub image: Option<String>,
    /// Hostname template.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Admin identities; replaces the global list.
    #[serde(default)]
    pub admins: Option<Vec<String>>,
    /// Default configs per game mode; replaces the global map.
    #[serde(default)]
    pub default_cfgs: Option<BTreeMap<String, String>>,
    /// Idle threshold in minutes.
    #[serde(default)]
    pub empty_minutes_terminate: Option<u32>,
}

impl GuildVariant {
    fn apply(&self, base: &VariantConfig) -> VariantConfig {
        let mut merged = base.clone();
        if let Some(image) = &self.image {
            merged.image.clone_from(image);
        }
        if self.hostname.is_some() {
            merged.hostname.clone_from(&self.hostname);
        }
        if let Some(admins) = &self.admins {
            merged.admins.clone_from(admins);
        }
        if let Some(cfgs) = &self.default_cfgs {
            merged.default_cfgs.clone_from(cfgs);
        }
        if self.empty_minutes_terminate.is_some() {
            merged.empty_minutes_terminate = self.empty_minutes_terminate;
        }
        merged
    }
}

/// Per-region settings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Human-readable region name.
    pub display_name: String,
    /// Hostname used when the variant has no template.
    pub srcds_hostname: String,
    /// Name of the spectator bot.
    pub tv_hostname: String,
    /// Strategy serving this region.
    pub backend: BackendKind,
}

/// In-memory catalog of variants and regions.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    variants: BTreeMap<VariantName, VariantConfig>,
    #[serde(default)]
    regions: BTreeMap<Region, RegionConfig>,
    #[serde(default)]
    guild_variants: BTreeMap<String, BTreeMap<VariantName, GuildVariant>>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a variant.
    #[must_use]
    pub fn with_variant(mut self, name: impl Into<VariantName>, config: VariantConfig) -> Self {
        self.variants.insert(name.into(), config);
        self
    }

    /// Adds or replaces a region.
    #[must_use]
    pub fn with_region(mut self, name: impl Into<Region>, config: RegionConfig) -> Self {
        self.regions.insert(name.into(), config);
        self
    }

    /// Adds or replaces a tenant override of `name`.
    #[must_use]
    pub fn with_guild_variant(
        mut self,
        guild_id: impl Into<String>,
        name: impl Into<VariantName>,
        overrides: GuildVariant,
    ) -> Self {
        self.guild_variants
            .entry(guild_id.into())
            .or_default()
            .insert(name.into(), overrides);
        self
    }

    /// Parses a JSON catalog document.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] when the document is malformed.
    pub fn from_json(contents: &str) -> Result<Self, CatalogError> {
        Self::parse(contents, "<inline>")
    }

    /// Reads and parses the catalog at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] when the file cannot be read and
    /// [`CatalogError::Parse`] when it is malformed.
    pub fn load(path: &Utf8Path) -> Result<Self, CatalogError> {
        let contents = read_catalog(path).map_err(|err| CatalogError::Io {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::parse(&contents, path.as_str())
    }

    fn parse(contents: &str, origin: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(contents).map_err(|err| CatalogError::Parse {
            path: origin.to_owned(),
            message: err.to_string(),
        })
    }

    /// Looks up a variant.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownVariant`] when absent.
    pub fn variant(&self, name: &VariantName) -> Result<&VariantConfig, CatalogError> {
        self.variants
            .get(name)
            .ok_or_else(|| CatalogError::UnknownVariant {
                variant: name.clone(),
            })
    }

    /// Resolves a variant as seen by `guild_id`.
    ///
    /// A tenant override of `name` is applied on top of the global variant
    /// of the same name, or on top of [`BASE_VARIANT`] for tenant-only
    /// variants. Without an override the global variant is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownVariant`] when neither the tenant nor
    /// the global catalog can supply the variant.
    pub fn variant_for(
        &self,
        name: &VariantName,
        guild_id: Option<&str>,
    ) -> Result<Cow<'_, VariantConfig>, CatalogError> {
        let overrides = guild_id
            .and_then(|guild| self.guild_variants.get(guild))
            .and_then(|variants| variants.get(name));
        let Some(overrides) = overrides else {
            return self.variant(name).map(Cow::Borrowed);
        };
        let base = self
            .variants
            .get(name)
            .or_else(|| self.variants.get(&VariantName::from(BASE_VARIANT)))
            .ok_or_else(|| CatalogError::UnknownVariant {
                variant: name.clone(),
            })?;
        Ok(Cow::Owned(overrides.apply(base)))
    }

    /// Looks up a region.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownRegion`] when absent.
    pub fn region(&self, name: &Region) -> Result<&RegionConfig, CatalogError> {
        self.regions
            .get(name)
            .ok_or_else(|| CatalogError::UnknownRegion {
                region: name.clone(),
            })
    }

    /// Idle threshold for a variant; unknown variants use the default.
    #[must_use]
    pub fn empty_minutes(&self, name: &VariantName) -> u32 {
        self.variants
            .get(name)
            .map_or(DEFAULT_EMPTY_MINUTES, VariantConfig::empty_minutes)
    }

    /// Tenants with at least one variant override.
    pub fn guilds(&self) -> impl Iterator<Item = &str> {
        self.guild_variants.keys().map(String::as_str)
    }

    /// Configured regions in name order.
    pub fn regions(&self) -> impl Iterator<Item = (&Region, &RegionConfig)> {
        self.regions.iter()
    }

    /// Configured variant names in order.
    pub fn variant_names(&self) -> impl Iterator<Item = &VariantName> {
        self.variants.keys()
    }
}

fn read_catalog(path: &Utf8Path) -> io::Result<String> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "catalog path has no file name")
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read_to_string(file_name)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    const DOCUMENT: &str = r#"{
        "variants": {
            "standard-competitive": {
                "image": "registry.example/game:latest",
                "shape": "DEV1-M",
                "map": "cp_badlands",
                "hostname": "QuickServer | {region}",
                "admins": ["U:1:1"],
                "default_cfgs": { "5cp": "etf2l_6v6_5cp" }
            },
            "casual": {
                "image": "registry.example/game:latest",
                "shape": "DEV1-S",
                "map": "pl_upward",
                "empty_minutes_terminate": 25
            }
        },
        "regions": {
            "fr-par-1": {
                "display_name": "Paris",
                "srcds_hostname": "QuickServer Paris",
                "tv_hostname": "QuickServer TV",
                "backend": "container-instance"
            }
        },
        "guild_variants": {
            "guild-1": {
                "standard-competitive": {
                    "image": "registry.example/guild-game:stable",
                    "admins": ["U:1:42"]
                },
                "scrim": {
                    "hostname": "Guild scrims | {region}",
                    "empty_minutes_terminate": 5
                }
            }
        }
    }"#;

    #[fixture]
    fn catalog() -> Catalog {
        Catalog::from_json(DOCUMENT).expect("document parses")
    }

    #[rstest]
    fn resolves_variants_and_regions(catalog: Catalog) {
        let variant = catalog
            .variant(&VariantName::from("standard-competitive"))
            .expect("variant exists");
        assert_eq!(variant.ocpu, 1);
        assert_eq!(variant.max_players, 24);
        assert_eq!(variant.default_cfgs.get("5cp").map(String::as_str), Some("etf2l_6v6_5cp"));

        let region = catalog
            .region(&Region::from("fr-par-1"))
            .expect("region exists");
        assert_eq!(region.backend, BackendKind::ContainerInstance);
    }

    #[rstest]
    fn guild_override_replaces_only_the_fields_it_sets(catalog: Catalog) {
        let name = VariantName::from("standard-competitive");
        let resolved = catalog
            .variant_for(&name, Some("guild-1"))
            .expect("override resolves");

        assert_eq!(resolved.image, "registry.example/guild-game:stable");
        assert_eq!(resolved.admins, ["U:1:42"]);
        assert_eq!(resolved.map, "cp_badlands");
        assert_eq!(resolved.hostname.as_deref(), Some("QuickServer | {region}"));
        assert_eq!(
            resolved.default_cfgs.get("5cp").map(String::as_str),
            Some("etf2l_6v6_5cp")
        );
    }

    #[rstest]
    #[case::no_guild(None)]
    #[case::other_guild(Some("guild-2"))]
    fn global_variant_applies_without_an_override(
        catalog: Catalog,
        #[case] guild_id: Option<&str>,
    ) {
        let name = VariantName::from("standard-competitive");
        let resolved = catalog.variant_for(&name, guild_id).expect("global variant");

        assert!(matches!(resolved, Cow::Borrowed(_)));
        assert_eq!(resolved.image, "registry.example/game:latest");
    }

    #[rstest]
    fn guild_only_variant_builds_on_the_base_variant(catalog: Catalog) {
        let name = VariantName::from("scrim");
        assert!(matches!(
            catalog.variant_for(&name, Some("guild-1")),
            Err(CatalogError::UnknownVariant { .. })
        ));

        let with_base = catalog.with_variant(
            BASE_VARIANT,
            VariantConfig {
                image: String::from("registry.example/game:base"),
                shape: String::from("DEV1-S"),
                ocpu: 1,
                memory_gb: 2,
                max_players: 12,
                map: String::from("koth_product"),
                hostname: None,
                admins: Vec::new(),
                empty_minutes_terminate: None,
                default_cfgs: BTreeMap::new(),
                environment: BTreeMap::new(),
            },
        );
        let resolved = with_base
            .variant_for(&name, Some("guild-1"))
            .expect("base variant backs the override");
        assert_eq!(resolved.image, "registry.example/game:base");
        assert_eq!(resolved.hostname.as_deref(), Some("Guild scrims | {region}"));
        assert_eq!(resolved.empty_minutes(), 5);
        assert_eq!(with_base.guilds().collect::<Vec<_>>(), ["guild-1"]);
    }

    #[rstest]
    fn idle_threshold_falls_back_to_default(catalog: Catalog) {
        assert_eq!(catalog.empty_minutes(&VariantName::from("casual")), 25);
        assert_eq!(
            catalog.empty_minutes(&VariantName::from("standard-competitive")),
            DEFAULT_EMPTY_MINUTES
        );
        assert_eq!(
            catalog.empty_minutes(&VariantName::from("missing")),
            DEFAULT_EMPTY_MINUTES
        );
    }

    #[rstest]
    fn unknown_entries_are_reported(catalog: Catalog) {
        assert_eq!(
            catalog.region(&Region::from("mars-1")),
            Err(CatalogError::UnknownRegion {
                region: Region::from("mars-1"),
            })
        );
        assert!(matches!(
            catalog.variant(&VariantName::from("nope")),
            Err(CatalogError::UnknownVariant { .. })
        ));
    }

    #[rstest]
    fn loads_from_disk() {
        let tmp = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("catalog.json"))
            .expect("utf-8 temp path");
        fs::write(&path, DOCUMENT).expect("write catalog");

        let loaded = Catalog::load(&path).expect("catalog loads");
        assert_eq!(loaded.variant_names().count(), 2);
    }

    #[rstest]
    fn missing_file_is_an_io_error() {
        let tmp = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("absent.json"))
            .expect("utf-8 temp path");
        assert!(matches!(
            Catalog::load(&path),
            Err(CatalogError::Io { .. })
        ));
    }

    #[rstest]
    fn malformed_document_is_a_parse_error() {
        assert!(matches!(
            Catalog::from_json("{ not json"),
            Err(CatalogError::Parse { .. })
        ));
    }
}
