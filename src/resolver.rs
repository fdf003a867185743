//! Filter resolution against the dataset.
//!
//! Turns raw tag values into a [`FilterSelection`] whose fields are either
//! present in the dataset or the configured fallbacks. Every resolution
//! function is total: a missing tag, a malformed value and a value the
//! dataset does not know all take the same fallback path.

use crate::dataset::Dataset;
use crate::error::{ReportError, Result};
use crate::tags::{TagMatcher, FILTER_COUNTRY_TAG, FILTER_YEAR_TAG};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_FALLBACK_COUNTRY: &str = "South Africa";
pub const DEFAULT_FALLBACK_REGION: &str = "Eastern and Southern Africa";
pub const DEFAULT_FALLBACK_YEAR: i32 = 2024;

/// Values used when extraction or validation fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallbacks {
    pub country: String,
    pub region: String,
    /// Only used when the dataset is empty; otherwise the latest year wins.
    pub year: i32,
}

impl Default for Fallbacks {
    fn default() -> Self {
        Self {
            country: DEFAULT_FALLBACK_COUNTRY.to_string(),
            region: DEFAULT_FALLBACK_REGION.to_string(),
            year: DEFAULT_FALLBACK_YEAR,
        }
    }
}

/// Validated country/year/region triple for the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    pub country: String,
    /// Digits only, exactly as the model wrote them when accepted
    pub year: String,
    pub region: String,
}

/// A selection plus which fields came from the model rather than fallbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub selection: FilterSelection,
    pub country_extracted: bool,
    pub year_extracted: bool,
}

/// Resolves raw tag values against a read-only dataset
pub struct FilterResolver<'a> {
    dataset: &'a Dataset,
    fallbacks: Fallbacks,
    country_tag: TagMatcher,
    year_tag: TagMatcher,
}

impl<'a> FilterResolver<'a> {
    /// Create a resolver.
    ///
    /// Fails if the dataset has rows but none for the fallback country, since
    /// every fallback selection would then point at data that does not exist.
    pub fn new(dataset: &'a Dataset, fallbacks: Fallbacks) -> Result<Self> {
        if fallbacks.country.trim().is_empty() || fallbacks.region.trim().is_empty() {
            return Err(ReportError::Validation(
                "Fallback country and region must be non-empty".to_string(),
            ));
        }
        if !dataset.is_empty() && !dataset.contains_country(&fallbacks.country) {
            return Err(ReportError::Validation(format!(
                "Fallback country '{}' is not present in the dataset",
                fallbacks.country
            )));
        }

        Ok(Self {
            dataset,
            fallbacks,
            country_tag: TagMatcher::new(FILTER_COUNTRY_TAG),
            year_tag: TagMatcher::new(FILTER_YEAR_TAG),
        })
    }

    pub fn fallbacks(&self) -> &Fallbacks {
        &self.fallbacks
    }

    /// Accept `raw` only if it names a country in the dataset exactly.
    pub fn resolve_country(&self, raw: Option<&str>) -> String {
        match raw {
            Some(country) if self.accepts_country(country) => country.to_string(),
            _ => self.fallbacks.country.clone(),
        }
    }

    /// Accept `raw` only if it is all ASCII digits and names a year in the
    /// dataset. Otherwise the latest year in the dataset.
    pub fn resolve_year(&self, raw: Option<&str>) -> String {
        match raw {
            Some(year) if self.accepts_year(year) => year.to_string(),
            _ => self.default_year(),
        }
    }

    /// Region of the most recent row for `country`.
    pub fn resolve_region(&self, country: &str) -> String {
        self.dataset
            .latest_for_country(country)
            .and_then(|r| r.unicef_region.as_deref())
            .filter(|region| !region.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.fallbacks.region.clone())
    }

    /// Extract both tags from a model response and resolve all three fields.
    pub fn resolve(&self, response: &str) -> Resolution {
        let raw_country = self.country_tag.find(response);
        let raw_year = self.year_tag.find(response);

        let country = self.resolve_country(raw_country);
        let year = self.resolve_year(raw_year);
        let region = self.resolve_region(&country);

        let country_extracted = raw_country.is_some_and(|c| self.accepts_country(c));
        let year_extracted = raw_year.is_some_and(|y| self.accepts_year(y));

        debug!(
            raw_country = ?raw_country,
            raw_year = ?raw_year,
            "Extracted raw filter tags"
        );
        info!(
            country = %country,
            year = %year,
            region = %region,
            country_extracted = country_extracted,
            year_extracted = year_extracted,
            "Resolved filter selection"
        );

        Resolution {
            selection: FilterSelection {
                country,
                year,
                region,
            },
            country_extracted,
            year_extracted,
        }
    }

    fn accepts_country(&self, raw: &str) -> bool {
        !raw.is_empty() && self.dataset.contains_country(raw)
    }

    fn accepts_year(&self, raw: &str) -> bool {
        parse_year(raw).is_some_and(|year| self.dataset.contains_year(year))
    }

    fn default_year(&self) -> String {
        self.dataset
            .max_year()
            .unwrap_or(self.fallbacks.year)
            .to_string()
    }
}

/// Strict digit-only year parsing: no sign, no decimal point, no spaces.
fn parse_year(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;

    fn record(country: &str, year: i32, region: Option<&str>) -> Record {
        Record {
            country: country.to_string(),
            year,
            unicef_region: region.map(str::to_string),
            ..Default::default()
        }
    }

    fn sample() -> Dataset {
        Dataset::from_records(vec![
            record("Kenya", 2021, Some("Old Region")),
            record("Kenya", 2022, Some("Eastern and Southern Africa")),
            record("Côte d'Ivoire", 2023, Some("West and Central Africa")),
            record("Lesotho", 2020, None),
        ])
    }

    fn fallbacks() -> Fallbacks {
        Fallbacks {
            country: "Kenya".to_string(),
            region: "Somewhere".to_string(),
            year: 1999,
        }
    }

    #[test]
    fn test_new_rejects_missing_fallback_country() {
        let data = sample();
        let err = FilterResolver::new(&data, Fallbacks::default());
        assert!(matches!(err, Err(ReportError::Validation(_))));
    }

    #[test]
    fn test_new_accepts_any_fallback_on_empty_dataset() {
        let data = Dataset::default();
        assert!(FilterResolver::new(&data, Fallbacks::default()).is_ok());
    }

    #[test]
    fn test_resolve_country() {
        let data = sample();
        let resolver = FilterResolver::new(&data, fallbacks()).expect("resolver");
        assert_eq!(resolver.resolve_country(Some("Côte d'Ivoire")), "Côte d'Ivoire");
        assert_eq!(resolver.resolve_country(Some("kenya")), "Kenya");
        assert_eq!(resolver.resolve_country(Some("Atlantis")), "Kenya");
        assert_eq!(resolver.resolve_country(None), "Kenya");
    }

    #[test]
    fn test_resolve_year() {
        let data = sample();
        let resolver = FilterResolver::new(&data, fallbacks()).expect("resolver");
        assert_eq!(resolver.resolve_year(Some("2021")), "2021");
        assert_eq!(resolver.resolve_year(Some("02021")), "02021");
        assert_eq!(resolver.resolve_year(Some("1990")), "2023");
        assert_eq!(resolver.resolve_year(Some("+2021")), "2023");
        assert_eq!(resolver.resolve_year(Some("2021.0")), "2023");
        assert_eq!(resolver.resolve_year(Some("20 21")), "2023");
        assert_eq!(resolver.resolve_year(Some("")), "2023");
        assert_eq!(resolver.resolve_year(Some("99999999999999999999999")), "2023");
        assert_eq!(resolver.resolve_year(None), "2023");
    }

    #[test]
    fn test_resolve_region() {
        let data = sample();
        let resolver = FilterResolver::new(&data, fallbacks()).expect("resolver");
        assert_eq!(resolver.resolve_region("Kenya"), "Eastern and Southern Africa");
        assert_eq!(resolver.resolve_region("Lesotho"), "Somewhere");
        assert_eq!(resolver.resolve_region("Atlantis"), "Somewhere");
    }

    #[test]
    fn test_resolve_end_to_end() {
        let data = sample();
        let resolver = FilterResolver::new(&data, fallbacks()).expect("resolver");
        let resolution =
            resolver.resolve("Some analysis...\n[FILTER_COUNTRY: Kenya][FILTER_YEAR: 2022]");

        assert_eq!(
            resolution.selection,
            FilterSelection {
                country: "Kenya".to_string(),
                year: "2022".to_string(),
                region: "Eastern and Southern Africa".to_string(),
            }
        );
        assert!(resolution.country_extracted && resolution.year_extracted);
    }

    #[test]
    fn test_resolve_without_tags_uses_fallbacks() {
        let data = sample();
        let resolver = FilterResolver::new(&data, fallbacks()).expect("resolver");
        let resolution = resolver.resolve("The model forgot the tag line.");

        assert_eq!(resolution.selection.country, "Kenya");
        assert_eq!(resolution.selection.year, "2023");
        assert_eq!(resolution.selection.region, "Eastern and Southern Africa");
        assert!(!resolution.country_extracted);
        assert!(!resolution.year_extracted);
    }

    #[test]
    fn test_empty_dataset_uses_configured_literals() {
        let data = Dataset::default();
        let resolver = FilterResolver::new(&data, fallbacks()).expect("resolver");
        let resolution = resolver.resolve("[FILTER_COUNTRY: Kenya][FILTER_YEAR: 2022]");

        assert_eq!(resolution.selection.country, "Kenya");
        assert_eq!(resolution.selection.year, "1999");
        assert_eq!(resolution.selection.region, "Somewhere");
        assert!(!resolution.country_extracted);
    }

    #[test]
    fn test_region_never_empty() {
        let data = sample();
        let resolver = FilterResolver::new(&data, fallbacks()).expect("resolver");
        for text in ["", "[FILTER_COUNTRY: ]", "[FILTER_COUNTRY: Lesotho]", "noise [ ] :"] {
            let resolution = resolver.resolve(text);
            assert!(!resolution.selection.region.is_empty(), "text: {:?}", text);
            assert!(!resolution.selection.country.is_empty());
            assert!(!resolution.selection.year.is_empty());
        }
    }

    #[test]
    fn test_rejects_blank_fallbacks() {
        let data = Dataset::default();
        let blank = Fallbacks {
            country: " ".to_string(),
            ..Fallbacks::default()
        };
        assert!(FilterResolver::new(&data, blank).is_err());
    }
}
