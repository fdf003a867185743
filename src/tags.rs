//! Structured filter tags in model output.
//!
//! The model is instructed to end its answer with
//! `[FILTER_COUNTRY: <country>][FILTER_YEAR: <year>]`. This module finds those
//! tags and strips them before the text is shown to a reader.
//!
//! Matching is first-occurrence: if the model echoes the instructed example
//! in its prose before the real final line, the echoed tag is the one
//! returned. Callers cannot tell the two apart from the text alone.

use regex::Regex;
use std::sync::LazyLock;

/// Tag carrying the selected country
pub const FILTER_COUNTRY_TAG: &str = "FILTER_COUNTRY";

/// Tag carrying the selected year
pub const FILTER_YEAR_TAG: &str = "FILTER_YEAR";

/// One filter tag. A value wrapped in its own brackets (`[FILTER_YEAR: [2022]]`)
/// takes both closing brackets with it.
const FILTER_TAG: &str = r"\[(?:FILTER_COUNTRY|FILTER_YEAR):\s*(?:\[[^\]\n]*\]\s*\]|.*?\])";

/// Every filter tag occurrence, plus the whitespace between adjacent tags.
static FILTER_TAG_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?:{FILTER_TAG}\s*)*{FILTER_TAG}"))
        .unwrap_or_else(|_| Regex::new(r"").expect("Empty regex"))
});

/// Matcher for a single `[TAG: value]` pattern
#[derive(Debug, Clone)]
pub struct TagMatcher {
    regex: Regex,
}

impl TagMatcher {
    /// Build a matcher for `tag`. The tag name is matched literally.
    pub fn new(tag: &str) -> Self {
        let pattern = format!(r"\[{}:\s*(.*?)\]", regex::escape(tag));
        // The empty pattern has no capture group, so `find` yields None.
        let regex = Regex::new(&pattern).unwrap_or_else(|_| Regex::new(r"").expect("Empty regex"));
        Self { regex }
    }

    /// Trimmed value of the first occurrence, or `None` if the tag is absent.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
    }
}

/// Extract the value of `[tag: value]` from `text`.
pub fn extract_tag(text: &str, tag: &str) -> Option<String> {
    TagMatcher::new(tag).find(text).map(str::to_string)
}

/// Remove every filter tag from `text` so tag syntax never reaches a reader.
///
/// Adjacent tags are removed together in either order, with or without
/// whitespace between them. Applying this twice is the same as applying it
/// once.
pub fn strip_filter_tags(text: &str) -> String {
    let mut current = text.trim().to_string();
    // Removing one tag can splice the halves of another back together.
    loop {
        let next = FILTER_TAG_BLOCK.replace_all(&current, "").trim().to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Render the tag line the model is asked to emit.
pub fn format_filter_tags(country: &str, year: &str) -> String {
    format!("[{FILTER_COUNTRY_TAG}: {country}][{FILTER_YEAR_TAG}: {year}]")
}
