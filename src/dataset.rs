//! UNICEF HIV dataset table.
//!
//! The table is loaded once from the prepared CSV (see [`crate::prep`]) and
//! is read-only afterwards. It provides the lookups the filter resolver
//! validates against and the markdown summary embedded in the system prompt.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Years kept in the prompt sample, counting back from the latest year
pub const PROMPT_RECENT_YEARS: i32 = 5;

/// Countries kept in the prompt sample, ranked by peak PLHIV (0-19)
pub const PROMPT_TOP_COUNTRIES: usize = 30;

/// One row of the prepared table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub country: String,
    pub year: i32,
    pub unicef_region: Option<String>,
    /// People living with HIV, age 0-19
    #[serde(rename = "PLHIV_0_19")]
    pub plhiv_0_19: Option<f64>,
    /// ART coverage (%), age 0-14
    #[serde(rename = "ART_Coverage_0_14_Pct")]
    pub art_coverage_0_14_pct: Option<f64>,
    /// Annual new infections, age 0-14
    #[serde(rename = "Annual_New_Infections_0_14")]
    pub annual_new_infections_0_14: Option<f64>,
    /// Annual AIDS-related deaths, age 0-14
    #[serde(rename = "Annual_AIDS_Deaths_0_14")]
    pub annual_aids_deaths_0_14: Option<f64>,
    /// Mother-to-child transmission rate (%)
    #[serde(rename = "MTCT_Rate_Pct")]
    pub mtct_rate_pct: Option<f64>,
}

/// CSV row as written by the prep step; every cell may be empty.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    year: Option<f64>,
    #[serde(default)]
    unicef_region: Option<String>,
    #[serde(rename = "PLHIV_0_19", default)]
    plhiv_0_19: Option<f64>,
    #[serde(rename = "ART_Coverage_0_14_Pct", default)]
    art_coverage_0_14_pct: Option<f64>,
    #[serde(rename = "Annual_New_Infections_0_14", default)]
    annual_new_infections_0_14: Option<f64>,
    #[serde(rename = "Annual_AIDS_Deaths_0_14", default)]
    annual_aids_deaths_0_14: Option<f64>,
    #[serde(rename = "MTCT_Rate_Pct", default)]
    mtct_rate_pct: Option<f64>,
}

impl CsvRow {
    /// Rows without the key columns or the core indicators are not usable
    /// for analysis.
    fn into_record(self) -> Option<Record> {
        let country = self.country.map(|c| c.trim().to_string()).filter(|c| !c.is_empty())?;
        let year = self.year.filter(|y| y.fract() == 0.0)?;
        if self.plhiv_0_19.is_none()
            || self.art_coverage_0_14_pct.is_none()
            || self.annual_new_infections_0_14.is_none()
        {
            return None;
        }

        Some(Record {
            country,
            year: year as i32,
            unicef_region: self
                .unicef_region
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            plhiv_0_19: self.plhiv_0_19,
            art_coverage_0_14_pct: self.art_coverage_0_14_pct,
            annual_new_infections_0_14: self.annual_new_infections_0_14,
            annual_aids_deaths_0_14: self.annual_aids_deaths_0_14,
            mtct_rate_pct: self.mtct_rate_pct,
        })
    }
}

/// Read-only table of HIV indicator records
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Load the prepared CSV.
    ///
    /// Rows missing `country`, `year`, `PLHIV_0_19`, `ART_Coverage_0_14_Pct`
    /// or `Annual_New_Infections_0_14` are dropped.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_path(path)?;

        let mut records = Vec::new();
        let mut dropped = 0usize;

        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            match row {
                Ok(row) => match row.into_record() {
                    Some(record) => records.push(record),
                    None => dropped += 1,
                },
                Err(e) => {
                    warn!(line = line + 2, error = %e, "Skipping malformed row");
                    dropped += 1;
                }
            }
        }

        info!(
            path = %path.display(),
            kept = records.len(),
            dropped = dropped,
            "Loaded dataset"
        );

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn contains_country(&self, country: &str) -> bool {
        self.records.iter().any(|r| r.country == country)
    }

    pub fn contains_year(&self, year: i64) -> bool {
        self.records.iter().any(|r| i64::from(r.year) == year)
    }

    pub fn max_year(&self) -> Option<i32> {
        self.records.iter().map(|r| r.year).max()
    }

    /// Most recent row for `country`; the first row wins when a year repeats.
    pub fn latest_for_country(&self, country: &str) -> Option<&Record> {
        let mut latest: Option<&Record> = None;
        for record in self.records.iter().filter(|r| r.country == country) {
            if latest.map_or(true, |best| record.year > best.year) {
                latest = Some(record);
            }
        }
        latest
    }

    /// Distinct country names in first-seen order
    pub fn countries(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for record in &self.records {
            if !seen.contains(&record.country.as_str()) {
                seen.push(record.country.as_str());
            }
        }
        seen
    }

    /// Subset handed to the language model: the last `recent_years` years,
    /// restricted to the `top_countries` countries with the highest peak
    /// PLHIV (0-19) inside that window.
    pub fn prompt_sample(&self, recent_years: i32, top_countries: usize) -> Dataset {
        let Some(latest) = self.max_year() else {
            return Dataset::default();
        };
        let start_year = latest - (recent_years - 1).max(0);

        let window: Vec<&Record> = self.records.iter().filter(|r| r.year >= start_year).collect();

        let mut peaks: HashMap<&str, f64> = HashMap::new();
        for record in &window {
            if let Some(plhiv) = record.plhiv_0_19 {
                let peak = peaks.entry(record.country.as_str()).or_insert(plhiv);
                if plhiv > *peak {
                    *peak = plhiv;
                }
            }
        }

        let mut ranked: Vec<(&str, f64)> = peaks.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(top_countries);

        let records: Vec<Record> = window
            .into_iter()
            .filter(|r| ranked.iter().any(|(c, _)| *c == r.country))
            .cloned()
            .collect();

        debug!(
            start_year = start_year,
            countries = ranked.len(),
            rows = records.len(),
            "Built prompt sample"
        );

        Dataset { records }
    }

    /// Render the table as a markdown pipe table for the system prompt.
    pub fn to_markdown(&self) -> String {
        const HEADERS: [&str; 8] = [
            "country",
            "year",
            "unicef_region",
            "PLHIV_0_19",
            "ART_Coverage_0_14_Pct",
            "Annual_New_Infections_0_14",
            "Annual_AIDS_Deaths_0_14",
            "MTCT_Rate_Pct",
        ];

        let mut out = format!("| {} |\n", HEADERS.join(" | "));
        out.push_str(&format!("|{}\n", "---|".repeat(HEADERS.len())));

        for r in &self.records {
            let cells = [
                r.country.clone(),
                r.year.to_string(),
                r.unicef_region.clone().unwrap_or_default(),
                format_cell(r.plhiv_0_19),
                format_cell(r.art_coverage_0_14_pct),
                format_cell(r.annual_new_infections_0_14),
                format_cell(r.annual_aids_deaths_0_14),
                format_cell(r.mtct_rate_pct),
            ];
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }

        out
    }
}

fn format_cell(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{:.0}", v),
        Some(v) => v.to_string(),
        None => String::new(),
    }
}
