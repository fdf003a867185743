//! Prompt module for LLM-based operations.
//!
//! This module provides the prompt templates used to request a report.

pub mod report;

pub use report::*;
