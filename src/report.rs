//! End-to-end report generation.
//!
//! One question goes through: request building, one completion call, tag
//! extraction, resolution against the dataset, and URL synthesis. The tags
//! are stripped from the text shown to the reader. No stage can fail; the
//! worst case is a report made of fallback values.

use crate::dashboard::DashboardUrlBuilder;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::llm::{build_request, generate_response, is_api_failure, CompletionService};
use crate::resolver::{Fallbacks, FilterResolver, FilterSelection};
use crate::tags::strip_filter_tags;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// How the selection was obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportStatus {
    /// The completion call failed and `raw_response` is the failure message
    pub api_failed: bool,
    pub country_extracted: bool,
    pub year_extracted: bool,
}

impl ReportStatus {
    pub fn used_fallback(&self) -> bool {
        !(self.country_extracted && self.year_extracted)
    }
}

/// Everything produced for one question
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutcome {
    pub raw_response: String,
    /// `raw_response` with the filter tags removed
    pub display_text: String,
    pub selection: FilterSelection,
    pub dashboard_url: String,
    pub status: ReportStatus,
}

impl ReportOutcome {
    /// Human-readable summary of the applied filters.
    pub fn filter_summary(&self, urls: &DashboardUrlBuilder) -> String {
        let config = urls.config();
        let mut out = String::new();

        if self.status.api_failed {
            out.push_str("Analysis failed: check the API key and account balance. Showing defaults.\n");
        } else if self.status.used_fallback() {
            out.push_str("The model did not return a usable tag line; defaults were applied where needed.\n");
        } else {
            out.push_str("Filters extracted from the model response.\n");
        }

        out.push_str(&format!(
            "- Country ({}): {}{}\n",
            config.country_field,
            self.selection.country,
            if self.status.country_extracted { "" } else { " (default)" }
        ));
        out.push_str(&format!(
            "- Year ({}): {}{}\n",
            config.year_field,
            self.selection.year,
            if self.status.year_extracted { "" } else { " (latest year)" }
        ));
        out.push_str(&format!(
            "- Region ({}): {}\n",
            config.region_field, self.selection.region
        ));
        out.push_str(&format!("- Dashboard: {}\n", self.dashboard_url));
        out
    }

    /// Markdown rendering of the report and its filters.
    pub fn to_markdown(&self, urls: &DashboardUrlBuilder) -> String {
        format!(
            "# HIV Policy Draft Report\n\n{}\n\n## Dashboard Filters\n\n{}",
            self.display_text,
            self.filter_summary(urls)
        )
    }

    /// Write `report_<stamp>.json` and `report_<stamp>.md` into `dir`,
    /// creating it if needed.
    pub fn save(&self, dir: &Path, stamp: &str, urls: &DashboardUrlBuilder) -> Result<SavedReport> {
        std::fs::create_dir_all(dir)?;

        let json_path = dir.join(format!("report_{}.json", stamp));
        let markdown_path = dir.join(format!("report_{}.md", stamp));

        std::fs::write(&json_path, serde_json::to_string_pretty(self)?)?;
        std::fs::write(&markdown_path, self.to_markdown(urls))?;

        info!(json = %json_path.display(), markdown = %markdown_path.display(), "Saved report");
        Ok(SavedReport {
            json_path,
            markdown_path,
        })
    }
}

/// Files written by [`ReportOutcome::save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedReport {
    pub json_path: PathBuf,
    pub markdown_path: PathBuf,
}

/// Shared pieces needed to turn model text into an outcome
pub struct ReportPipeline<'a> {
    dataset: &'a Dataset,
    resolver: FilterResolver<'a>,
    urls: &'a DashboardUrlBuilder,
}

impl<'a> ReportPipeline<'a> {
    /// `dataset` should be the prompt sample, so the model is only offered
    /// (and validated against) the rows it was shown.
    pub fn new(dataset: &'a Dataset, fallbacks: Fallbacks, urls: &'a DashboardUrlBuilder) -> Result<Self> {
        Ok(Self {
            dataset,
            resolver: FilterResolver::new(dataset, fallbacks)?,
            urls,
        })
    }

    /// Ask `service` about `question` and build the outcome.
    pub async fn run<S>(&self, service: &S, question: &str) -> ReportOutcome
    where
        S: CompletionService + ?Sized,
    {
        let request = build_request(question, self.dataset, self.resolver.fallbacks());
        info!(
            rows = self.dataset.len(),
            question_len = question.len(),
            "Requesting report"
        );
        let response = generate_response(service, &request).await;
        self.analyze(response)
    }

    /// Build the outcome for model text obtained elsewhere.
    pub fn analyze(&self, response: String) -> ReportOutcome {
        let api_failed = is_api_failure(&response);
        if api_failed {
            warn!("Completion failed, falling back to default filters");
        }

        let resolution = self.resolver.resolve(&response);
        let dashboard_url = self.urls.build(&resolution.selection);
        let display_text = strip_filter_tags(&response);

        ReportOutcome {
            raw_response: response,
            display_text,
            dashboard_url,
            status: ReportStatus {
                api_failed,
                country_extracted: resolution.country_extracted,
                year_extracted: resolution.year_extracted,
            },
            selection: resolution.selection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::{DashboardConfig, UrlMode};
    use crate::dataset::Record;
    use crate::error::ReportError;
    use crate::llm::CompletionRequest;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedService {
        reply: Option<String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedService {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedService {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            self.reply.clone().ok_or_else(|| ReportError::Api {
                code: 429,
                message: "quota exceeded".to_string(),
            })
        }
    }

    fn record(country: &str, year: i32, region: &str) -> Record {
        Record {
            country: country.to_string(),
            year,
            unicef_region: Some(region.to_string()),
            plhiv_0_19: Some(1000.0),
            ..Default::default()
        }
    }

    fn dataset() -> Dataset {
        Dataset::from_records(vec![
            record("Kenya", 2022, "Eastern and Southern Africa"),
            record("Nigeria", 2023, "West and Central Africa"),
            record("South Africa", 2021, "Eastern and Southern Africa"),
        ])
    }

    fn urls(mode: UrlMode) -> DashboardUrlBuilder {
        DashboardUrlBuilder::new(DashboardConfig {
            mode,
            ..DashboardConfig::default()
        })
        .expect("urls")
    }

    #[tokio::test]
    async fn test_run_with_tagged_response() {
        let data = dataset();
        let urls = urls(UrlMode::MultiParam);
        let pipeline = ReportPipeline::new(&data, Fallbacks::default(), &urls).expect("pipeline");
        let service = ScriptedService::ok("Some analysis...\n[FILTER_COUNTRY: Kenya][FILTER_YEAR: 2022]");

        let outcome = pipeline.run(&service, "Where is ART coverage lowest?").await;

        assert_eq!(
            outcome.selection,
            FilterSelection {
                country: "Kenya".to_string(),
                year: "2022".to_string(),
                region: "Eastern and Southern Africa".to_string(),
            }
        );
        assert_eq!(outcome.display_text, "Some analysis...");
        assert!(outcome.dashboard_url.ends_with(
            "?:embed=y&:showVizHome=no&Country=Kenya&Year=2022&Unicef+Region=Eastern+and+Southern+Africa"
        ));
        assert!(!outcome.status.api_failed);
        assert!(!outcome.status.used_fallback());

        let seen = service.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert!(seen[0].user.contains("Where is ART coverage lowest?"));
        assert!(seen[0].system.contains("[FILTER_COUNTRY: South Africa][FILTER_YEAR: 2023]"));
    }

    #[tokio::test]
    async fn test_run_service_failure_uses_defaults() {
        let data = dataset();
        let urls = urls(UrlMode::SingleParam);
        let pipeline = ReportPipeline::new(&data, Fallbacks::default(), &urls).expect("pipeline");

        let outcome = pipeline.run(&ScriptedService::failing(), "q").await;

        assert!(outcome.status.api_failed);
        assert!(outcome.raw_response.contains("quota exceeded"));
        assert_eq!(outcome.selection.country, "South Africa");
        assert_eq!(outcome.selection.year, "2023");
        assert_eq!(outcome.selection.region, "Eastern and Southern Africa");
        assert!(outcome.dashboard_url.ends_with("&p.Country=South+Africa"));
    }

    #[test]
    fn test_analyze_without_tags() {
        let data = dataset();
        let urls = urls(UrlMode::MultiParam);
        let pipeline = ReportPipeline::new(&data, Fallbacks::default(), &urls).expect("pipeline");

        let outcome = pipeline.analyze("No tag here.".to_string());

        assert_eq!(outcome.selection.country, "South Africa");
        assert_eq!(outcome.selection.year, "2023");
        assert_eq!(outcome.selection.region, "Eastern and Southern Africa");
        assert!(outcome.status.used_fallback());
        assert!(!outcome.status.api_failed);
        assert_eq!(outcome.display_text, "No tag here.");

        let summary = outcome.filter_summary(&urls);
        assert!(summary.contains("- Country (Country): South Africa (default)"));
        assert!(summary.contains("- Year (Year): 2023 (latest year)"));
    }

    #[test]
    fn test_analyze_out_of_domain_values() {
        let data = dataset();
        let urls = urls(UrlMode::MultiParam);
        let pipeline = ReportPipeline::new(&data, Fallbacks::default(), &urls).expect("pipeline");

        let outcome = pipeline.analyze("[FILTER_COUNTRY: Atlantis][FILTER_YEAR: 2023]".to_string());

        assert_eq!(outcome.selection.country, "South Africa");
        assert_eq!(outcome.selection.year, "2023");
        assert!(!outcome.status.country_extracted);
        assert!(outcome.status.year_extracted);
        assert_eq!(outcome.display_text, "");
    }

    #[test]
    fn test_save_writes_json_and_markdown() {
        let data = dataset();
        let urls = urls(UrlMode::MultiParam);
        let pipeline = ReportPipeline::new(&data, Fallbacks::default(), &urls).expect("pipeline");
        let outcome = pipeline.analyze("Kenya first.\n[FILTER_COUNTRY: Kenya][FILTER_YEAR: 2022]".to_string());

        let dir = tempfile::tempdir().expect("temp dir");
        let out_dir = dir.path().join("reports");
        let saved = outcome.save(&out_dir, "20240101_120000", &urls).expect("save");

        assert_eq!(saved.json_path, out_dir.join("report_20240101_120000.json"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&saved.json_path).expect("read json")).expect("parse");
        assert_eq!(json["selection"]["country"], "Kenya");
        assert_eq!(json["status"]["api_failed"], false);

        let markdown = std::fs::read_to_string(&saved.markdown_path).expect("read md");
        assert!(markdown.starts_with("# HIV Policy Draft Report\n\nKenya first."));
        assert!(markdown.contains("- Country (Country): Kenya\n"));
    }

    #[test]
    fn test_save_into_file_path_is_io_error() {
        let data = dataset();
        let urls = urls(UrlMode::MultiParam);
        let pipeline = ReportPipeline::new(&data, Fallbacks::default(), &urls).expect("pipeline");
        let outcome = pipeline.analyze(String::new());

        let file = tempfile::NamedTempFile::new().expect("temp file");
        let result = outcome.save(file.path(), "stamp", &urls);
        assert!(matches!(result, Err(ReportError::Io(_))));
    }

    #[test]
    fn test_pipeline_rejects_unknown_fallback_country() {
        let data = dataset();
        let urls = urls(UrlMode::MultiParam);
        let fallbacks = Fallbacks {
            country: "Atlantis".to_string(),
            ..Fallbacks::default()
        };
        assert!(ReportPipeline::new(&data, fallbacks, &urls).is_err());
    }
}
