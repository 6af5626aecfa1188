//! `[provider]` INI section.
//!
//! ```ini
//! [provider]
//! name = osm
//! url_template = https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png
//! subdomains = a,b,c
//! min_zoom = 0
//! max_zoom = 19
//! timeout = 30
//! ```

use std::path::Path;

use ini::{Ini, Properties};

use crate::config::ConfigError;

use super::http::{ReqwestFetcher, DEFAULT_TIMEOUT_SECS};
use super::template::UrlTemplateProvider;
use super::types::ProviderError;

pub const PROVIDER_SECTION: &str = "provider";

/// Provider settings read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub name: String,
    pub url_template: String,
    pub subdomains: Vec<String>,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub timeout_secs: u64,
}

impl ProviderSettings {
    /// Settings for `url_template` with defaults for everything else.
    ///
    /// The template doubles as the provider name.
    pub fn new(url_template: impl Into<String>) -> Self {
        let url_template = url_template.into();
        Self {
            name: url_template.clone(),
            url_template,
            subdomains: Vec::new(),
            min_zoom: 0,
            max_zoom: 19,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn from_ini_file(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Reads the `[provider]` section. `url_template` is required.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let missing = || ConfigError::Missing {
            section: PROVIDER_SECTION.to_string(),
            key: "url_template".to_string(),
        };
        let section = ini.section(Some(PROVIDER_SECTION)).ok_or_else(missing)?;
        let template = section.get("url_template").ok_or_else(missing)?;

        let mut settings = Self::new(template);
        if let Some(v) = section.get("name") {
            settings.name = v.to_string();
        }
        if let Some(v) = section.get("subdomains") {
            settings.subdomains = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = parsed::<u8>(section, "min_zoom")? {
            settings.min_zoom = v;
        }
        if let Some(v) = parsed::<u8>(section, "max_zoom")? {
            settings.max_zoom = v;
        }
        if let Some(v) = parsed::<u64>(section, "timeout")? {
            settings.timeout_secs = v;
        }
        Ok(settings)
    }

    /// Builds the URL provider.
    pub fn provider(&self) -> Result<UrlTemplateProvider, ProviderError> {
        UrlTemplateProvider::new(self.name.clone(), self.url_template.clone())?
            .with_subdomains(self.subdomains.iter().cloned())
            .with_zoom_range(self.min_zoom, self.max_zoom)
    }

    /// Builds the HTTP fetcher.
    pub fn fetcher(&self) -> Result<ReqwestFetcher, ProviderError> {
        ReqwestFetcher::with_timeout(self.timeout_secs)
    }
}

fn parsed<T: std::str::FromStr>(section: &Properties, key: &str) -> Result<Option<T>, ConfigError> {
    section
        .get(key)
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| {
                ConfigError::invalid(PROVIDER_SECTION, key, v, "expected a non-negative integer")
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TileKey;
    use crate::provider::TileUrlProvider;

    #[test]
    fn test_from_ini_full_section() {
        let ini = Ini::load_from_str(
            "[provider]\nname = osm\nurl_template = https://{s}.t/{z}/{x}/{y}.png\nsubdomains = a, b\nmin_zoom = 1\nmax_zoom = 17\ntimeout = 5\n",
        )
        .unwrap();
        let settings = ProviderSettings::from_ini(&ini).unwrap();
        assert_eq!(settings.name, "osm");
        assert_eq!(settings.subdomains, vec!["a", "b"]);
        assert_eq!(settings.min_zoom, 1);
        assert_eq!(settings.max_zoom, 17);
        assert_eq!(settings.timeout_secs, 5);

        let provider = settings.provider().unwrap();
        assert_eq!(provider.name(), "osm");
        assert_eq!(
            provider.url(TileKey::new(1, 0, 2)).unwrap(),
            "https://b.t/2/1/0.png"
        );
    }

    #[test]
    fn test_name_defaults_to_template() {
        let ini = Ini::load_from_str("[provider]\nurl_template = https://t/{z}/{x}/{y}\n").unwrap();
        let settings = ProviderSettings::from_ini(&ini).unwrap();
        assert_eq!(settings.name, "https://t/{z}/{x}/{y}");
        assert_eq!(settings.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_missing_template() {
        let ini = Ini::load_from_str("[provider]\nname = osm\n").unwrap();
        assert!(matches!(
            ProviderSettings::from_ini(&ini),
            Err(ConfigError::Missing { .. })
        ));

        let ini = Ini::load_from_str("[cache]\nmax_size = 1MB\n").unwrap();
        assert!(ProviderSettings::from_ini(&ini).is_err());
    }

    #[test]
    fn test_bad_zoom_value() {
        let ini = Ini::load_from_str("[provider]\nurl_template = https://t/{q}\nmax_zoom = high\n")
            .unwrap();
        assert!(matches!(
            ProviderSettings::from_ini(&ini),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
