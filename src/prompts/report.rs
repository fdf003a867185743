//! HIV policy report prompts.
//!
//! The system prompt embeds the dataset summary and ends with the filter tag
//! instruction, including a literal example built from the default country
//! and year. The user prompt wraps the question with the two-slide report
//! structure.

use crate::tags::format_filter_tags;

/// System prompt template
/// Placeholders: {data_summary}, {default_country}, {default_year}, {tag_example}
pub const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are an AI-powered HIV policy consultant working for UNICEF.
Answer the user's question and draft a policy report using only the data below (the latest 5 years for the 30 countries with the most children and adolescents living with HIV).

### Data summary (latest 5 years, top 30 countries)
{data_summary}

### Analysis rules
1. Data-driven: every statement must be backed by the figures in the table above.
2. Forced selection: you MUST pick exactly one country and one year to control the Tableau dashboard. If the question cannot be answered from the data, pick the defaults '{default_country}' and '{default_year}'.
3. Report focus: write the report about the single selected country, using PLHIV_0_19, ART_Coverage_0_14_Pct and Annual_New_Infections_0_14.

### Final output tag (mandatory)
1. After the whole answer, including the report, write the tag alone on the very last line.
2. Exact format: [FILTER_COUNTRY: [Country English Name]][FILTER_YEAR: [Year Number]]
3. Country name: use only an English country name that appears in the dataset.
4. Example (do not deviate from this format): {tag_example}
5. Do not add any other text, spaces, line breaks or explanation to the last line; it must contain the tag string only."#;

/// User prompt template
/// Placeholders: {question}
pub const USER_PROMPT_TEMPLATE: &str = r#"[User Question]: {question}

First give the analysis answer, then write a draft report in the PowerPoint slide format below.

[Draft Report] (focus on the single selected country)
1. Slide 1 [Title: HIV Response Status in the Selected Country]: summarize the trend of ART coverage (`ART_Coverage_0_14_Pct`) and new infections (`Annual_New_Infections_0_14`) for the selected country, citing `PLHIV_0_19`.
2. Slide 2 [Title: Policy Intervention Recommendations]: based on the country's MTCT rate (`MTCT_Rate_Pct`) and AIDS-related deaths (`Annual_AIDS_Deaths_0_14`), propose two policy actions UNICEF can start immediately.

When the answer and the report are complete, put the filter tag on the very last line as the system instructions require."#;

/// Question used when the caller does not supply one
pub const DEFAULT_QUESTION: &str = r#"UNICEF's core priorities are scaling up treatment for children living with HIV and minimizing new infections.
Using the data:
1. Identify countries with a large PLHIV (0-19) population but ART coverage (ART_Coverage_0_14_Pct) below 60%.
2. From that group, select the single country whose new infections (Annual_New_Infections_0_14) decreased the slowest or increased over the last 5 years, and infer the reasons behind the weak response (e.g. MTCT_Rate_Pct).
3. Draft a policy report focused on that single country."#;

/// Build system prompt with the dataset summary and default selection
pub fn build_system_prompt(data_summary: &str, default_country: &str, default_year: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE
        .replace("{data_summary}", data_summary)
        .replace("{default_country}", default_country)
        .replace("{default_year}", default_year)
        .replace("{tag_example}", &format_filter_tags(default_country, default_year))
}

/// Build user prompt with the question
pub fn build_user_prompt(question: &str) -> String {
    USER_PROMPT_TEMPLATE.replace("{question}", question.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_system_prompt() {
        let prompt = build_system_prompt("| country |\n|---|\n| Kenya |", "South Africa", "2023");
        assert!(prompt.contains("| Kenya |"));
        assert!(prompt.contains("defaults 'South Africa' and '2023'"));
        assert!(prompt.contains(
            "Example (do not deviate from this format): [FILTER_COUNTRY: South Africa][FILTER_YEAR: 2023]"
        ));
        assert!(prompt.contains("[FILTER_COUNTRY: [Country English Name]][FILTER_YEAR: [Year Number]]"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_build_user_prompt() {
        let prompt = build_user_prompt("  Which country needs help?\n");
        assert!(prompt.starts_with("[User Question]: Which country needs help?\n"));
        assert!(prompt.contains("Slide 2"));
    }
}
