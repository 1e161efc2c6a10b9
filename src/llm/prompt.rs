//! Prompt assembly for generation, correction and explanation requests.
//!
//! Rendering is pure: the same request and templates always produce the
//! same messages.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::db::Row;
use crate::llm::models::{ChatMessage, CorrectionRequest, Example, TranslationRequest};
use crate::llm::templates::MessageTemplates;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex"));

/// System and user message pair sent to the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system), ChatMessage::user(self.user)]
    }
}

pub struct PromptAssembler;

impl PromptAssembler {
    /// Prompt for the first generation attempt.
    pub fn generation(request: &TranslationRequest, templates: &MessageTemplates) -> Prompt {
        let mut values = Self::context_values(request, templates);
        values.insert("question", request.question.clone());

        Prompt {
            system: substitute(templates.generate_system, &values),
            user: substitute(templates.generate_user, &values),
        }
    }

    /// Prompt asking the model to repair a statement the database rejected.
    pub fn correction(request: &CorrectionRequest<'_>, templates: &MessageTemplates) -> Prompt {
        let mut values = Self::context_values(request.translation, templates);
        values.insert("question", request.translation.question.clone());
        values.insert("failed_sql", request.failed_sql.to_string());
        values.insert("error", request.error.to_string());

        Prompt {
            system: substitute(templates.correct_system, &values),
            user: substitute(templates.correct_user, &values),
        }
    }

    /// Prompt asking for a plain-language account of a result set. Only the
    /// first `row_limit` rows are shown to the model.
    pub fn explanation(
        question: &str,
        sql: &str,
        rows: &[Row],
        row_limit: usize,
        detailed: bool,
        templates: &MessageTemplates,
    ) -> Prompt {
        let preview = &rows[..rows.len().min(row_limit)];
        let mut values = HashMap::new();
        values.insert("question", question.to_string());
        values.insert("sql", sql.to_string());
        values.insert("row_count", rows.len().to_string());
        values.insert(
            "rows",
            serde_json::to_string_pretty(preview).unwrap_or_default(),
        );

        let user = if detailed {
            templates.explain_detailed_user
        } else {
            templates.explain_user
        };
        Prompt {
            system: substitute(templates.explain_system, &values),
            user: substitute(user, &values),
        }
    }

    /// Shared schema, relationship, business, example and instruction sections.
    fn context_values(
        request: &TranslationRequest,
        templates: &MessageTemplates,
    ) -> HashMap<&'static str, String> {
        let mut values = HashMap::new();
        values.insert("schema", request.schema_description.clone());
        values.insert(
            "relationships",
            section(
                templates.relationships_header,
                request.relationships.iter().map(|r| format!("- {}", r)),
            ),
        );
        values.insert(
            "business_context",
            section(
                templates.business_context_header,
                request
                    .business_context
                    .iter()
                    .map(|c| c.trim())
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
            ),
        );
        values.insert(
            "examples",
            section(
                templates.examples_header,
                numbered_examples(&request.examples, templates),
            ),
        );
        values.insert(
            "custom_instructions",
            section(
                templates.instructions_header,
                request.custom_instructions.iter().map(|i| format!("- {}", i)),
            ),
        );
        values
    }
}

/// Replace every `{name}` with its value in one pass. Unknown names become
/// empty strings; substituted values are never rescanned.
pub fn substitute(template: &str, values: &HashMap<&'static str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Header plus lines and a blank separator line, or nothing when there are no lines.
fn section(header: &str, lines: impl Iterator<Item = String>) -> String {
    let body: Vec<String> = lines.collect();
    if body.is_empty() {
        return String::new();
    }
    format!("\n{}\n{}\n", header, body.join("\n"))
}

fn numbered_examples<'a>(
    examples: &'a [Example],
    templates: &'a MessageTemplates,
) -> impl Iterator<Item = String> + 'a {
    examples.iter().enumerate().map(|(i, example)| {
        let mut values = HashMap::new();
        values.insert("index", (i + 1).to_string());
        values.insert("question", example.question.clone());
        values.insert("sql", example.sql.clone());
        substitute(templates.example_item, &values)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::templates::Language;

    fn request() -> TranslationRequest {
        TranslationRequest {
            question: "How many orders per customer?".to_string(),
            language: Language::English,
            schema_description: "Table orders:\n  - id INTEGER".to_string(),
            business_context: None,
            relationships: vec![],
            examples: vec![],
            custom_instructions: vec![],
        }
    }

    #[test]
    fn test_minimal_prompt_omits_empty_sections() {
        let prompt = PromptAssembler::generation(&request(), Language::English.templates());

        assert!(prompt.user.contains("Table orders:"));
        assert!(prompt.user.contains("Question: How many orders per customer?"));
        assert!(!prompt.user.contains("Relationships:"));
        assert!(!prompt.user.contains("Business context:"));
        assert!(!prompt.user.contains("Examples:"));
        assert!(!prompt.user.contains("Additional instructions:"));
        assert!(!prompt.user.contains('{'));
    }

    #[test]
    fn test_full_prompt_renders_all_sections() {
        let mut request = request();
        request.business_context = Some("Orders are shipped weekly.".to_string());
        request.relationships = vec!["orders.customer_id → customers.id".to_string()];
        request.examples = vec![
            Example {
                question: "All customers".to_string(),
                sql: "SELECT * FROM customers".to_string(),
            },
            Example {
                question: "Order count".to_string(),
                sql: "SELECT COUNT(*) FROM orders".to_string(),
            },
        ];
        request.custom_instructions = vec!["Use table aliases".to_string()];

        let prompt = PromptAssembler::generation(&request, Language::English.templates());

        assert!(prompt.user.contains("Relationships:\n- orders.customer_id → customers.id"));
        assert!(prompt.user.contains("Business context:\nOrders are shipped weekly."));
        assert!(prompt.user.contains("1. Question: All customers\n   SQL: SELECT * FROM customers"));
        assert!(prompt.user.contains("2. Question: Order count"));
        assert!(prompt.user.contains("Additional instructions:\n- Use table aliases"));
    }

    #[test]
    fn test_correction_prompt_carries_failure() {
        let request = request();
        let correction = CorrectionRequest {
            translation: &request,
            failed_sql: "SELECT nme FROM orders",
            error: "Binder Error: column nme not found",
        };

        let prompt = PromptAssembler::correction(&correction, Language::Italian.templates());

        assert!(prompt.user.contains("SELECT nme FROM orders"));
        assert!(prompt.user.contains("Binder Error: column nme not found"));
        assert!(prompt.user.contains("Domanda: How many orders per customer?"));
        assert!(prompt.user.contains("Table orders:"));
    }

    #[test]
    fn test_unknown_placeholder_becomes_empty() {
        let mut values = HashMap::new();
        values.insert("known", "yes".to_string());
        assert_eq!(substitute("{known}/{unknown}/", &values), "yes//");
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let mut values = HashMap::new();
        values.insert("question", "what is {schema}?".to_string());
        values.insert("schema", "secret".to_string());
        assert_eq!(substitute("Q: {question}", &values), "Q: what is {schema}?");
    }

    #[test]
    fn test_explanation_prompt_previews_limited_rows() {
        let rows: Vec<Row> = (0..5)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".to_string(), serde_json::json!(i));
                row
            })
            .collect();

        let prompt = PromptAssembler::explanation(
            "Which orders?",
            "SELECT id FROM orders",
            &rows,
            2,
            false,
            Language::English.templates(),
        );

        assert!(prompt.user.contains("returned 5 rows"));
        assert!(prompt.user.contains("\"id\": 1"));
        assert!(!prompt.user.contains("\"id\": 2"));
        assert!(!prompt.user.contains("step by step"));
    }
}
