// Evaluation prompt templates and the pure builders that fill them.

use std::fmt;

use serde_json::{Map, Value};

use crate::llm_client::prompts::{json_only_instruction, EVALUATOR_PERSONA};

/// Candidate text beyond this many characters is dropped before prompting.
pub const MAX_DOCUMENT_CHARS: usize = 4000;

pub const CV_RESULT_SCHEMA: &str =
    r#"{ "cv_match_rate": number(0.0-1.0), "cv_feedback": string(2-3 sentences) }"#;
pub const CV_RESULT_KEYS: &[&str] = &["cv_match_rate", "cv_feedback"];

pub const REPORT_RESULT_SCHEMA: &str =
    r#"{ "project_score": number(1.0-5.0), "project_feedback": string(2-3 sentences) }"#;
pub const REPORT_RESULT_KEYS: &[&str] = &["project_score", "project_feedback"];

pub const SUMMARY_RESULT_SCHEMA: &str = r#"{ "overall_summary": string(2-3 sentences) }"#;
pub const SUMMARY_RESULT_KEYS: &[&str] = &["overall_summary"];

pub const REPORT_CONTEXT_QUERY: &str = "Context for evaluating a project report against the \
    case study brief and the project scoring rubric.";

/// Built-in rubric used by the direct strategy in place of retrieved CV context.
pub const DIRECT_CV_GUIDANCE: &str = "\
No reference documents were retrieved. Judge the CV on general expectations for the role:
- Technical skills match (backend, databases, APIs, cloud, AI/LLM exposure)
- Experience level (years, project complexity)
- Relevant achievements (measurable impact, scale)
- Cultural and collaboration signals (communication, learning, teamwork)";

/// Built-in rubric used by the direct strategy in place of retrieved report context.
pub const DIRECT_REPORT_GUIDANCE: &str = "\
No reference documents were retrieved. Judge the project report on:
- Correctness (prompt design, LLM chaining, context injection)
- Code quality and structure
- Resilience and error handling (retries, timeouts, failure modes)
- Documentation and explanation of trade-offs
- Creativity beyond the minimum requirements";

const DOCUMENT_PROMPT_TEMPLATE: &str = r#"{persona} tasked with evaluating a candidate's {doc_type} for the position of "{job_title}".
Carefully review the following CONTEXT retrieved from internal documents (job description, scoring rubrics, case study brief):
CONTEXT:
{context}

Now analyze the candidate's {doc_type} provided below:
CANDIDATE DOCUMENT TEXT:
{document}

Based strictly on comparing the CANDIDATE DOCUMENT TEXT against the CONTEXT, provide your evaluation.
{json_instruction}"#;

const SUMMARY_PROMPT_TEMPLATE: &str = r#"Based on the previous evaluations:
CV Evaluation: {cv_result}
Project Report Evaluation: {report_result}

Provide a concise overall summary (2-3 sentences) of the candidate's suitability for the "{job_title}" role.
{json_instruction}"#;

/// The two kinds of candidate document the pipeline evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Cv,
    ProjectReport,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Cv => write!(f, "CV"),
            DocumentKind::ProjectReport => write!(f, "Project Report"),
        }
    }
}

/// Retrieval query for CV-evaluation context. Depends only on the job title,
/// never on extracted text, so it can run alongside extraction.
pub fn cv_context_query(job_title: &str) -> String {
    format!(
        "Context for evaluating a CV for the role: {job_title}. \
         Include job description requirements and the CV scoring rubric."
    )
}

/// Renders the CV or project-report prompt. Pure and deterministic.
pub fn build_prompt(
    doc_type: DocumentKind,
    doc_text: &str,
    context: &str,
    job_title: &str,
    output_schema: &str,
) -> String {
    let doc_type = doc_type.to_string();
    let json_instruction = json_only_instruction(output_schema);
    render(
        DOCUMENT_PROMPT_TEMPLATE,
        &[
            ("persona", EVALUATOR_PERSONA),
            ("doc_type", doc_type.as_str()),
            ("job_title", job_title),
            ("context", context),
            ("document", truncate_chars(doc_text, MAX_DOCUMENT_CHARS)),
            ("json_instruction", json_instruction.as_str()),
        ],
    )
}

/// Renders the summary prompt, embedding the first two results verbatim.
pub fn build_summary_prompt(
    cv_result: &Map<String, Value>,
    report_result: &Map<String, Value>,
    job_title: &str,
) -> String {
    let cv_result = Value::Object(cv_result.clone()).to_string();
    let report_result = Value::Object(report_result.clone()).to_string();
    let json_instruction = json_only_instruction(SUMMARY_RESULT_SCHEMA);
    render(
        SUMMARY_PROMPT_TEMPLATE,
        &[
            ("cv_result", cv_result.as_str()),
            ("report_result", report_result.as_str()),
            ("job_title", job_title),
            ("json_instruction", json_instruction.as_str()),
        ],
    )
}

/// Fills `{name}` placeholders in one left-to-right scan. Substituted values
/// are copied as-is and never scanned again.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let value = tail[1..].find('}').and_then(|close| {
            let name = &tail[1..=close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close + 2))
        });
        match value {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
