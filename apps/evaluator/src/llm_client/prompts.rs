// Shared prompt fragments. Pipeline-specific templates live in
// evaluation/prompts.rs; this file holds the cross-cutting pieces.

/// Appended to every evaluation prompt. The worker parses the reply with a
/// plain `serde_json::from_str`, so anything outside the object is a failure.
pub const JSON_ONLY_INSTRUCTION: &str = "\
Your response MUST be ONLY a single, valid JSON object matching this exact format: {schema}
Do not include any text before or after the JSON object. Do not use markdown code fences.";

/// Persona line that opens the document evaluation prompts.
pub const EVALUATOR_PERSONA: &str = "You are an expert HR analyst";

/// Renders the JSON-only instruction for a given schema example.
pub fn json_only_instruction(schema: &str) -> String {
    JSON_ONLY_INSTRUCTION.replace("{schema}", schema)
}
