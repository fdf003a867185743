//! Offline preparation of the merged indicator table.
//!
//! Reads the three raw UNICEF HIV exports (orphans, epidemiology, paediatric
//! ART coverage), keeps country-level rows for the indicators we use,
//! cleans the `Value` cells, and outer-merges everything on
//! `(ISO3, country, year)` into one wide CSV that [`crate::dataset`] loads.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const ORPHANS_FILE: &str = "HIV_Orphans_2025.csv";
pub const EPIDEMIOLOGY_FILE: &str = "HIV_Epidemiology_Children_Adolescents_2025.csv";
pub const ART_FILE: &str = "HIV_Paediatric_ART_Coverage_2025.csv";
pub const DEFAULT_OUTPUT_FILE: &str = "unicef_hiv_tech.csv";

const KEY_COLUMNS: [&str; 4] = ["ISO3", "country", "year", "unicef_region"];

/// One indicator pulled from a raw file into its own column
#[derive(Debug, Clone, Copy)]
pub struct IndicatorColumn {
    pub file: &'static str,
    pub indicator: &'static str,
    pub column: &'static str,
    pub age: Option<&'static str>,
    pub sex: Option<&'static str>,
    /// Whether this indicator's rows supply `unicef_region`
    pub carries_region: bool,
}

const fn indicator_column(
    file: &'static str,
    indicator: &'static str,
    column: &'static str,
    age: Option<&'static str>,
    carries_region: bool,
) -> IndicatorColumn {
    IndicatorColumn {
        file,
        indicator,
        column,
        age,
        sex: if age.is_some() { Some("Both") } else { None },
        carries_region,
    }
}

/// Indicators extracted into the merged table, in output column order
pub const INDICATORS: [IndicatorColumn; 11] = [
    indicator_column(
        ORPHANS_FILE,
        "Estimated number of children (aged 0-17) who have lost one or both parents due to AIDS",
        "AIDS_Orphans_0_17",
        None,
        true,
    ),
    indicator_column(
        ORPHANS_FILE,
        "Estimated number of children (aged 0-17) who have lost one or both parents due all causes",
        "Orphans_All_Causes_0_17",
        None,
        false,
    ),
    indicator_column(
        EPIDEMIOLOGY_FILE,
        "Estimated number of people living with HIV",
        "PLHIV_0_19",
        Some("Age 0-19"),
        false,
    ),
    indicator_column(
        EPIDEMIOLOGY_FILE,
        "Estimated number of people living with HIV (per 100,000 population)",
        "PLHIV_Rate_per_100k_0_19",
        Some("Age 0-19"),
        false,
    ),
    indicator_column(
        EPIDEMIOLOGY_FILE,
        "Estimated number of annual new HIV infections",
        "Annual_New_Infections_0_14",
        Some("Age 0-14"),
        false,
    ),
    indicator_column(
        EPIDEMIOLOGY_FILE,
        "Estimated incidence rate (new HIV infection per 1,000 uninfected population)",
        "Incidence_Rate_per_1k_0_14",
        Some("Age 0-14"),
        false,
    ),
    indicator_column(
        EPIDEMIOLOGY_FILE,
        "Estimated number of annual AIDS-related deaths",
        "Annual_AIDS_Deaths_0_14",
        Some("Age 0-14"),
        false,
    ),
    indicator_column(
        EPIDEMIOLOGY_FILE,
        "Estimated rate of annual AIDS-related deaths (per 100,000 population)",
        "Death_Rate_per_100k_0_14",
        Some("Age 0-14"),
        false,
    ),
    indicator_column(
        EPIDEMIOLOGY_FILE,
        "Estimated mother-to-child transmission rate (%)",
        "MTCT_Rate_Pct",
        Some("Age 0-4"),
        false,
    ),
    indicator_column(
        ART_FILE,
        "Per cent of children living with HIV receiving ART",
        "ART_Coverage_0_14_Pct",
        None,
        false,
    ),
    indicator_column(
        ART_FILE,
        "Reported number of children receiving ART",
        "Reported_ART_Number",
        None,
        false,
    ),
];

/// Row of a raw UNICEF export
#[derive(Debug, Clone, Deserialize)]
pub struct RawRow {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Indicator")]
    pub indicator: String,
    #[serde(rename = "ISO3", default)]
    pub iso3: String,
    #[serde(rename = "Country/Region")]
    pub country: String,
    #[serde(rename = "UNICEF Region", default)]
    pub region: Option<String>,
    #[serde(rename = "Year")]
    pub year: String,
    #[serde(rename = "Value", default)]
    pub value: String,
    #[serde(rename = "Age", default)]
    pub age: Option<String>,
    #[serde(rename = "Sex", default)]
    pub sex: Option<String>,
}

/// One indicator value for one country-year
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRow {
    pub iso3: String,
    pub country: String,
    pub year: i32,
    pub region: Option<String>,
    pub value: Option<f64>,
}

/// What [`prepare`] wrote
#[derive(Debug, Clone, Serialize)]
pub struct PrepSummary {
    pub output: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    pub skipped_files: Vec<String>,
}

/// Parse a raw `Value` cell.
///
/// Quotes and thousands separators are removed. `<1` becomes 0.5 and
/// `<0.01` becomes 0.005; any other `<x` becomes `x`. Empty cells, `-` and
/// unparseable text are missing.
pub fn clean_value(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != '"' && *c != ',').collect();
    let mut cleaned = cleaned.trim();

    if let Some(rest) = cleaned.strip_prefix('<') {
        match cleaned {
            "<1" => return Some(0.5),
            "<0.01" => return Some(0.005),
            _ => cleaned = rest.trim(),
        }
    }

    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Rows of one raw export plus which optional filter columns it has
#[derive(Debug, Clone, Default)]
pub struct RawFile {
    pub rows: Vec<RawRow>,
    pub has_age: bool,
    pub has_sex: bool,
}

/// Read every row of a raw export.
pub fn read_raw_file(path: &Path) -> Result<RawFile> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let has_column = |name: &str| headers.iter().any(|h| h.trim() == name);
    let has_age = has_column("Age");
    let has_sex = has_column("Sex");

    let mut rows = Vec::new();
    for row in reader.deserialize::<RawRow>() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable raw row"),
        }
    }
    Ok(RawFile { rows, has_age, has_sex })
}

/// Country-level rows of one indicator, first row kept per country-year.
pub fn pivot_indicator(file: &RawFile, ind: &IndicatorColumn) -> Vec<IndicatorRow> {
    let mut seen: HashMap<(String, String, i32), ()> = HashMap::new();
    let mut out = Vec::new();

    for row in &file.rows {
        if row.kind != "Country" || row.indicator != ind.indicator {
            continue;
        }
        if !matches_filter(row.age.as_deref(), ind.age, file.has_age)
            || !matches_filter(row.sex.as_deref(), ind.sex, file.has_sex)
        {
            continue;
        }
        let Ok(year) = row.year.trim().parse::<i32>() else {
            continue;
        };

        let key = (row.iso3.clone(), row.country.clone(), year);
        if seen.insert(key, ()).is_some() {
            continue;
        }

        out.push(IndicatorRow {
            iso3: row.iso3.clone(),
            country: row.country.clone(),
            year,
            region: if ind.carries_region {
                row.region.clone().filter(|r| !r.trim().is_empty())
            } else {
                None
            },
            value: clean_value(&row.value),
        });
    }

    out
}

/// A filter is skipped only when the file lacks that column. While the
/// column exists, a blank cell never matches.
fn matches_filter(cell: Option<&str>, wanted: Option<&str>, column_present: bool) -> bool {
    match wanted {
        Some(wanted) if column_present => cell.map(str::trim) == Some(wanted),
        _ => true,
    }
}

/// Wide row of the merged table
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub iso3: String,
    pub country: String,
    pub year: i32,
    pub unicef_region: Option<String>,
    pub values: Vec<Option<f64>>,
}

/// Outer-merge indicator tables on `(ISO3, country, year)`.
///
/// `tables` pairs each column name with its rows. The region is propagated
/// to every row sharing an ISO3 code. Output is sorted by country, then year.
pub fn merge_indicators(tables: &[(&str, Vec<IndicatorRow>)]) -> Vec<MergedRow> {
    let width = tables.len();
    let mut index: HashMap<(String, String, i32), usize> = HashMap::new();
    let mut merged: Vec<MergedRow> = Vec::new();

    for (col, (_, rows)) in tables.iter().enumerate() {
        for row in rows {
            let key = (row.iso3.clone(), row.country.clone(), row.year);
            let idx = *index.entry(key).or_insert_with(|| {
                merged.push(MergedRow {
                    iso3: row.iso3.clone(),
                    country: row.country.clone(),
                    year: row.year,
                    unicef_region: None,
                    values: vec![None; width],
                });
                merged.len() - 1
            });

            let target = &mut merged[idx];
            target.values[col] = row.value;
            if target.unicef_region.is_none() {
                target.unicef_region = row.region.clone();
            }
        }
    }

    let mut regions: HashMap<String, String> = HashMap::new();
    for row in &merged {
        if let Some(region) = &row.unicef_region {
            regions.entry(row.iso3.clone()).or_insert_with(|| region.clone());
        }
    }
    for row in merged.iter_mut().filter(|r| r.unicef_region.is_none()) {
        row.unicef_region = regions.get(&row.iso3).cloned();
    }

    merged.sort_by(|a, b| a.country.cmp(&b.country).then(a.year.cmp(&b.year)));
    merged
}

/// Build the merged table from the raw files in `input_dir` and write it to
/// `output`. A raw file that cannot be read is skipped with a warning.
pub fn prepare(input_dir: &Path, output: &Path) -> Result<PrepSummary> {
    let mut tables: Vec<(&str, Vec<IndicatorRow>)> = Vec::new();
    let mut skipped_files = Vec::new();
    let mut files: HashMap<&str, RawFile> = HashMap::new();

    for ind in &INDICATORS {
        if skipped_files.iter().any(|f| f == ind.file) {
            continue;
        }
        let file = match files.entry(ind.file) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = input_dir.join(ind.file);
                match read_raw_file(&path) {
                    Ok(file) => {
                        info!(file = ind.file, rows = file.rows.len(), "Loaded raw indicator file");
                        entry.insert(file)
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to load raw indicator file");
                        skipped_files.push(ind.file.to_string());
                        continue;
                    }
                }
            }
        };

        let pivoted = pivot_indicator(file, ind);
        debug!(column = ind.column, rows = pivoted.len(), "Pivoted indicator");
        if !pivoted.is_empty() {
            tables.push((ind.column, pivoted));
        }
    }

    if tables.is_empty() {
        warn!("No indicator data could be extracted; writing key columns only");
    }

    let merged = merge_indicators(&tables);
    let columns: Vec<String> = KEY_COLUMNS
        .iter()
        .copied()
        .chain(tables.iter().map(|(col, _)| *col))
        .map(str::to_string)
        .collect();

    write_merged(output, &columns, &merged)?;

    info!(
        output = %output.display(),
        rows = merged.len(),
        columns = columns.len(),
        "Prepared merged dataset"
    );

    Ok(PrepSummary {
        output: output.to_path_buf(),
        rows: merged.len(),
        columns,
        skipped_files,
    })
}

fn write_merged(path: &Path, columns: &[String], rows: &[MergedRow]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    wtr.write_record(columns)?;

    for row in rows {
        let mut record = vec![
            row.iso3.clone(),
            row.country.clone(),
            row.year.to_string(),
            row.unicef_region.clone().unwrap_or_default(),
        ];
        record.extend(row.values.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default()));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}
