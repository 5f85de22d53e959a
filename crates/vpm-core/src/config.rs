//! Layered configuration and path helpers.
//!
//! Figment merges compiled defaults, `config.toml`, `config.<env>.toml` and
//! `APP_*` environment variables (`__` separates sections, e.g.
//! `APP_PIPELINE__WORKERS=4`). The merged result is extracted into the typed
//! [`AppConfig`] and validated before use.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub fields: FieldMapping,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineConfig,
    pub fetch: FetchConfig,
    pub display: DisplayConfig,
    pub localize: LocalizeConfig,
    pub query: QueryConfig,
    /// Directory relative paths are resolved against. Not read from files.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Product metadata consumed by the catalog and the pipeline.
    pub products_path: String,
    /// Embedding store written by the pipeline, read by the catalog.
    pub embeddings_path: String,
    /// Root that `/`-prefixed image references are resolved against.
    pub image_root: String,
}

/// Names of the JSON keys that carry each product field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub id: String,
    pub name: String,
    pub image_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Directory holding `model.safetensors` for the CLIP image tower.
    pub model_dir: Option<String>,
    pub use_fake: bool,
    pub fake_dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    pub incremental: bool,
    pub embed_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub jpeg_quality: u8,
    pub background: [u8; 3],
    pub per_row: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizeConfig {
    /// Source metadata with remote image URLs.
    pub source_path: String,
    pub image_dir: String,
    /// Prefix written into localized image references.
    pub public_prefix: String,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_threshold_percent: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            fields: FieldMapping::default(),
            embedding: EmbeddingConfig::default(),
            pipeline: PipelineConfig::default(),
            fetch: FetchConfig::default(),
            display: DisplayConfig::default(),
            localize: LocalizeConfig::default(),
            query: QueryConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            products_path: "public/products_local.json".to_string(),
            embeddings_path: "public/product_embeddings.json".to_string(),
            image_root: "public".to_string(),
        }
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self { id: "id".to_string(), name: "name".to_string(), image_reference: "url".to_string() }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { model_dir: None, use_fake: false, fake_dim: 512 }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { workers: 1, incremental: false, embed_timeout_secs: 60 }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout_secs: 15, user_agent: concat!("vpm/", env!("CARGO_PKG_VERSION")).to_string() }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { thumbnail_width: 300, thumbnail_height: 300, jpeg_quality: 85, background: [255, 255, 255], per_row: 5 }
    }
}

impl Default for LocalizeConfig {
    fn default() -> Self {
        Self {
            source_path: "public/products.json".to_string(),
            image_dir: "public/product-images".to_string(),
            public_prefix: "/product-images".to_string(),
            jpeg_quality: 70,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { default_threshold_percent: 25.0 }
    }
}

/// Canonical environment name for `RUST_ENV` spellings.
fn canonical_env(name: &str) -> Option<&'static str> {
    match name {
        "dev" | "development" => Some("dev"),
        "prod" | "production" => Some("prod"),
        "test" | "testing" => Some("test"),
        _ => None,
    }
}

impl AppConfig {
    /// Load from the current directory using `RUST_ENV` (default `dev`).
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(Path::new("."), &env_name)
    }

    /// Load with `dir` as the location of the TOML files and the base for
    /// relative paths.
    pub fn load_from(dir: &Path, env_name: &str) -> Result<Self> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(dir.join("config.toml")));
        if let Some(env) = canonical_env(env_name) {
            figment = figment.merge(Toml::file(dir.join(format!("config.{env}.toml"))));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self::from_figment(figment, dir)
    }

    pub fn from_figment(figment: Figment, base_dir: &Path) -> Result<Self> {
        let mut config: AppConfig = figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.base_dir = base_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fields.validate()?;
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.display.thumbnail_width == 0 || self.display.thumbnail_height == 0 {
            return invalid(format!(
                "display thumbnail size must be positive, got {}x{}",
                self.display.thumbnail_width, self.display.thumbnail_height
            ));
        }
        for (section, q) in [("display", self.display.jpeg_quality), ("localize", self.localize.jpeg_quality)] {
            if !(1..=100).contains(&q) {
                return invalid(format!("{section}.jpeg_quality must be in 1..=100, got {q}"));
            }
        }
        if self.display.per_row == 0 {
            return invalid("display.per_row must be at least 1".to_string());
        }
        if self.pipeline.workers == 0 {
            return invalid("pipeline.workers must be at least 1".to_string());
        }
        if self.pipeline.embed_timeout_secs == 0 || self.fetch.timeout_secs == 0 {
            return invalid("timeouts must be at least one second".to_string());
        }
        if self.embedding.fake_dim == 0 {
            return invalid("embedding.fake_dim must be at least 1".to_string());
        }
        let t = self.query.default_threshold_percent;
        if !(0.0..=100.0).contains(&t) {
            return invalid(format!("query.default_threshold_percent must be in [0, 100], got {t}"));
        }
        Ok(())
    }

    /// Resolve a configured path against `base_dir` after `~`/`$VAR` expansion.
    pub fn resolve_path(&self, p: &str) -> PathBuf {
        resolve_with_base(&self.base_dir, p)
    }

    pub fn products_path(&self) -> PathBuf { self.resolve_path(&self.data.products_path) }
    pub fn embeddings_path(&self) -> PathBuf { self.resolve_path(&self.data.embeddings_path) }
    pub fn image_root(&self) -> PathBuf { self.resolve_path(&self.data.image_root) }
}

impl FieldMapping {
    pub fn validate(&self) -> Result<()> {
        for (field, key) in [("id", &self.id), ("name", &self.name), ("image_reference", &self.image_reference)] {
            if key.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("fields.{field} must name a JSON key")));
            }
        }
        if self.id == self.name || self.id == self.image_reference || self.name == self.image_reference {
            return Err(Error::InvalidConfig(format!(
                "fields map two product fields to the same key ({:?}, {:?}, {:?})",
                self.id, self.name, self.image_reference
            )));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
