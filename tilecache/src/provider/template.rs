//! URL-template tile provider.
//!
//! Builds tile URLs by substituting placeholders in a template:
//!
//! | Placeholder | Value                                          |
//! |-------------|------------------------------------------------|
//! | `{x}`       | tile column                                    |
//! | `{y}`       | tile row                                       |
//! | `{z}`       | zoom level                                     |
//! | `{q}`       | Bing-style quadkey                             |
//! | `{s}`       | subdomain, rotated by `(x + y) % n`            |
//!
//! ```ignore
//! let provider = UrlTemplateProvider::new(
//!     "osm",
//!     "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
//! )?
//! .with_subdomains(["a", "b", "c"])
//! .with_zoom_range(0, 19)?;
//! ```

use crate::coord::MAX_ZOOM;
use crate::key::TileKey;

use super::types::{ProviderError, TileUrlProvider};

/// Provider driven by a URL template.
#[derive(Debug, Clone)]
pub struct UrlTemplateProvider {
    name: String,
    template: String,
    subdomains: Vec<String>,
    min_zoom: u8,
    max_zoom: u8,
}

impl UrlTemplateProvider {
    /// Creates a provider serving zoom levels 0 to 19.
    ///
    /// # Arguments
    ///
    /// * `name` - Stable provider name, hashed into storage headers
    /// * `template` - URL with placeholders; must address tiles either by
    ///   `{x}`, `{y}` and `{z}` or by `{q}`
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Result<Self, ProviderError> {
        let template = template.into();
        let has_xyz = ["{x}", "{y}", "{z}"].iter().all(|p| template.contains(p));
        if !has_xyz && !template.contains("{q}") {
            return Err(ProviderError::InvalidTemplate {
                template,
                reason: "needs {x}, {y} and {z}, or {q}".to_string(),
            });
        }

        Ok(Self {
            name: name.into(),
            template,
            subdomains: Vec::new(),
            min_zoom: 0,
            max_zoom: 19,
        })
    }

    /// Sets the subdomains substituted for `{s}`.
    pub fn with_subdomains<I, S>(mut self, subdomains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subdomains = subdomains.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts the served zoom levels.
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Result<Self, ProviderError> {
        if min_zoom > max_zoom || max_zoom > MAX_ZOOM {
            return Err(ProviderError::InvalidTemplate {
                template: self.template,
                reason: format!(
                    "zoom range {}..={} must be ascending and at most {}",
                    min_zoom, max_zoom, MAX_ZOOM
                ),
            });
        }
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        Ok(self)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    fn subdomain(&self, key: TileKey) -> Option<&str> {
        if self.subdomains.is_empty() {
            return None;
        }
        let n = self.subdomains.len() as u64;
        let i = (key.x() as u64 + key.y() as u64) % n;
        Some(&self.subdomains[i as usize])
    }
}

impl TileUrlProvider for UrlTemplateProvider {
    fn url(&self, key: TileKey) -> Option<String> {
        if !self.supports_zoom(key.zoom()) {
            return None;
        }

        let mut url = self
            .template
            .replace("{x}", &key.x().to_string())
            .replace("{y}", &key.y().to_string())
            .replace("{z}", &key.zoom().to_string());
        if url.contains("{q}") {
            url = url.replace("{q}", &key.quadkey());
        }
        if url.contains("{s}") {
            url = url.replace("{s}", self.subdomain(key)?);
        }
        Some(url)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }
}
