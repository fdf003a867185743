//! Tableau dashboard URL synthesis.
//!
//! Two query styles are supported:
//!
//! - [`UrlMode::MultiParam`] rebuilds the query string: Tableau's reserved
//!   `?:` parameters are dropped, `:embed=y&:showVizHome=no` is re-added, and
//!   country, year and region are appended as standard filter parameters.
//! - [`UrlMode::SingleParam`] keeps the base URL as-is and appends only
//!   `&p.<country_field>=<country>`.
//!
//! Keys and values are form-encoded (space becomes `+`). Whether the
//! dashboard actually has filters with these names is not checked.

use crate::error::{ReportError, Result};
use crate::resolver::FilterSelection;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::form_urlencoded::byte_serialize;
use url::Url;

pub const DEFAULT_DASHBOARD_URL: &str =
    "https://public.tableau.com/views/UNICEFHIVTech_AI/UNICEFHIVReporting?:showVizHome=no&:embed=true";

pub const DEFAULT_COUNTRY_FIELD: &str = "Country";
pub const DEFAULT_YEAR_FIELD: &str = "Year";
pub const DEFAULT_REGION_FIELD: &str = "Unicef Region";

/// Control parameters re-added in multi-parameter mode
const EMBED_PARAMS: [&str; 2] = [":embed=y", ":showVizHome=no"];

/// Query string style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum UrlMode {
    /// Country, year and region as standard query parameters
    #[default]
    MultiParam,
    /// Country only, as `p.<field>` appended to the untouched base URL
    SingleParam,
}

/// Dashboard location and filter field names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub base_url: String,
    pub mode: UrlMode,
    pub country_field: String,
    pub year_field: String,
    pub region_field: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DASHBOARD_URL.to_string(),
            mode: UrlMode::default(),
            country_field: DEFAULT_COUNTRY_FIELD.to_string(),
            year_field: DEFAULT_YEAR_FIELD.to_string(),
            region_field: DEFAULT_REGION_FIELD.to_string(),
        }
    }
}

/// Builds filtered dashboard URLs from a [`FilterSelection`]
#[derive(Debug, Clone)]
pub struct DashboardUrlBuilder {
    config: DashboardConfig,
}

impl DashboardUrlBuilder {
    /// Validate the base URL and create a builder.
    pub fn new(config: DashboardConfig) -> Result<Self> {
        let parsed = Url::parse(&config.base_url)
            .map_err(|e| ReportError::Config(format!("Invalid dashboard URL '{}': {}", config.base_url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(ReportError::Config(format!(
                "Dashboard URL must be absolute: {}",
                config.base_url
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn build(&self, selection: &FilterSelection) -> String {
        let url = match self.config.mode {
            UrlMode::MultiParam => self.build_multi_param(selection),
            UrlMode::SingleParam => self.build_single_param(&selection.country),
        };
        debug!(mode = ?self.config.mode, url = %url, "Built dashboard URL");
        url
    }

    fn build_multi_param(&self, selection: &FilterSelection) -> String {
        let base = match self.config.base_url.find("?:") {
            Some(idx) => &self.config.base_url[..idx],
            None => self.config.base_url.as_str(),
        };

        let mut query: Vec<String> = EMBED_PARAMS.iter().map(|p| p.to_string()).collect();

        let filters = [
            (&self.config.country_field, &selection.country),
            (&self.config.year_field, &selection.year),
            (&self.config.region_field, &selection.region),
        ];
        for (key, value) in filters {
            if !value.is_empty() {
                query.push(format!("{}={}", form_encode(key), form_encode(value)));
            }
        }

        // A base that still carries a plain query gets appended to, never a second `?`
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}{}", base, separator, query.join("&"))
    }

    fn build_single_param(&self, country: &str) -> String {
        let base = &self.config.base_url;
        if country.is_empty() {
            return base.clone();
        }

        let key = format!("p.{}", self.config.country_field);
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}{}={}", base, separator, form_encode(&key), form_encode(country))
    }
}

/// `application/x-www-form-urlencoded` encoding of one key or value
pub fn form_encode(input: &str) -> String {
    byte_serialize(input.as_bytes()).collect()
}
