use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::sync::Arc;

use crate::upload::ContextDocument;

const SYSTEM_INSTRUCTION: &str = r#"
You are "TarHeel Insight AI", a premier academic advisor and student resource assistant for the University of North Carolina at Chapel Hill (UNC).
Your goal is to help students navigate:
1. Course requirements (Gen Ed, Major specifics).
2. Campus life (Housing, Dining, Student Orgs).
3. Career resources (University Career Services, Handshake).
4. Campus navigation (The Pit, Old Well, Polk Place).

Always maintain a helpful, encouraging, and professional "Tar Heel" spirit.
Use UNC-specific terminology where appropriate (e.g., "The Pit", "South Building", "ConnectCarolina", "Davis Library").

If a user uploads a document, prioritize information from that document to answer questions accurately.
Keep responses concise but information-dense. Use Markdown for formatting.
"#;

const CONTEXT_TEMPLATE: &str =
    "Using the following context: \n\n{context}\n\nAnswer the student's question: {question}";

const GREETING: &str =
    "Hello Tar Heel! I am your personal Insight AI. Whether you need advice on COMP classes, study spots at Davis Library, or finding your way to South Building, I am here to help. Have a syllabus or degree sheet? Upload it and I can help you parse the details!";

const DOCUMENT_LOADED_TEMPLATE: &str =
    "I've successfully loaded \"{name}\". You can now ask me specific questions about its contents!";

#[derive(Debug)]
pub enum PromptError {
    MissingPlaceholder(&'static str, &'static str),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::MissingPlaceholder(template, placeholder) =>
                write!(f, "Prompt template '{}' is missing placeholder '{}'", template, placeholder),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// Instruction and message templates. Every field may be overridden from a JSON file;
/// omitted fields keep the built-in text.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PromptConfig {
    pub system_instruction: String,
    pub context_template: String,
    pub greeting: String,
    pub document_loaded_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            context_template: CONTEXT_TEMPLATE.to_string(),
            greeting: GREETING.to_string(),
            document_loaded_template: DOCUMENT_LOADED_TEMPLATE.to_string(),
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        if !self.context_template.contains("{context}") {
            return Err(PromptError::MissingPlaceholder("context_template", "{context}"));
        }
        if !self.context_template.contains("{question}") {
            return Err(PromptError::MissingPlaceholder("context_template", "{question}"));
        }
        Ok(())
    }
}

pub fn load_prompts_from_str(json: &str) -> Result<Arc<PromptConfig>, PromptError> {
    let config: PromptConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(Arc::new(config))
}

pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, Box<dyn Error + Send + Sync>> {
    let file_content = fs
        ::read_to_string(path)
        .map_err(|e| format!("Failed to read prompts file '{}': {}", path, e))?;
    load_prompts_from_str(&file_content).map_err(|e|
        format!("Failed to parse prompts file '{}': {}", path, e).into()
    )
}

/// The prompt sent to the model: the question verbatim, or the question under a
/// labelled context block when a document is attached.
pub fn build_effective_prompt(
    config: &PromptConfig,
    question: &str,
    document: Option<&ContextDocument>
) -> String {
    match document {
        Some(doc) =>
            fill_template(
                &config.context_template,
                &[
                    ("{context}", doc.content.as_str()),
                    ("{question}", question),
                ]
            ),
        None => question.to_string(),
    }
}

/// Substitutes placeholders in one left-to-right pass over `template`.
/// Inserted values are never scanned again.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let next = values
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|pos| (pos, *key, *value)))
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, key, value)) => {
                out.push_str(&rest[..pos]);
                out.push_str(value);
                rest = &rest[pos + key.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

pub fn document_loaded_message(config: &PromptConfig, name: &str) -> String {
    config.document_loaded_template.replace("{name}", name)
}
