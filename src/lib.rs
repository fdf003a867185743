//! # hivreport
//!
//! AI-assisted UNICEF HIV report generator with filtered Tableau dashboard links.
//!
//! ## Modules
//!
//! - [`dataset`] - Prepared indicator table and prompt sample
//! - [`prompts`] - System and user prompt templates
//! - [`llm`] - Completion requests against an OpenAI-compatible API
//! - [`tags`] - `[FILTER_*: value]` tag extraction and stripping
//! - [`resolver`] - Validation of extracted values with fallbacks
//! - [`dashboard`] - Filtered dashboard URL synthesis
//! - [`report`] - End-to-end pipeline
//! - [`prep`] - Offline merge of the raw UNICEF exports
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hivreport::dashboard::{DashboardConfig, DashboardUrlBuilder};
//! use hivreport::dataset::Dataset;
//! use hivreport::report::ReportPipeline;
//! use hivreport::resolver::Fallbacks;
//!
//! fn main() -> anyhow::Result<()> {
//!     let data = Dataset::load_csv("unicef_hiv_tech.csv".as_ref())?.prompt_sample(5, 30);
//!     let urls = DashboardUrlBuilder::new(DashboardConfig::default())?;
//!     let pipeline = ReportPipeline::new(&data, Fallbacks::default(), &urls)?;
//!     let outcome = pipeline.analyze("...\n[FILTER_COUNTRY: Kenya][FILTER_YEAR: 2022]".to_string());
//!     println!("{}", outcome.dashboard_url);
//!     Ok(())
//! }
//! ```

pub mod dashboard;
pub mod dataset;
pub mod error;
pub mod llm;
pub mod prep;
pub mod prompts;
pub mod report;
pub mod resolver;
pub mod tags;

pub use error::{ReportError, Result};
