use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{prompts, CompletionProvider, CompletionRequest};
use crate::analysis::parser::extract_json_candidate;
use crate::config::LlmConfig;
use crate::error::{HomeFixError, HomeFixResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    YesNo,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpQuestion {
    pub id: String,
    pub question: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
}

/// Follow-up questions that narrow down a vague problem description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSet {
    #[serde(default = "default_category")]
    pub category: String,
    pub questions: Vec<FollowUpQuestion>,
}

fn default_category() -> String {
    "general".to_string()
}

impl QuestionSet {
    /// Parse and check a model reply
    pub fn from_model_reply(text: &str) -> HomeFixResult<Self> {
        let candidate = extract_json_candidate(text)?;
        let set: QuestionSet = serde_json::from_str(candidate)
            .map_err(|e| HomeFixError::ModelOutput { message: format!("Invalid question set: {}", e) })?;
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> HomeFixResult<()> {
        if self.questions.is_empty() {
            return Err(HomeFixError::ModelOutput { message: "Question set has no questions".to_string() });
        }

        for question in &self.questions {
            if question.id.trim().is_empty() || question.question.trim().is_empty() {
                return Err(HomeFixError::ModelOutput { message: "Question is missing id or text".to_string() });
            }

            let has_options = question.options.as_ref().is_some_and(|o| !o.is_empty());
            if question.kind == QuestionKind::MultipleChoice && !has_options {
                return Err(HomeFixError::ModelOutput {
                    message: format!("Multiple choice question '{}' has no options", question.id),
                });
            }
        }

        Ok(())
    }

    /// Location and urgency questions used when generation fails
    pub fn fallback() -> Self {
        let choice = |id: &str, question: &str, options: &[&str]| FollowUpQuestion {
            id: id.to_string(),
            question: question.to_string(),
            kind: QuestionKind::MultipleChoice,
            options: Some(options.iter().map(|o| o.to_string()).collect()),
            required: true,
        };

        Self {
            category: default_category(),
            questions: vec![
                choice(
                    "location",
                    "Where exactly is this issue located?",
                    &["Interior", "Exterior", "Basement", "Attic", "Bathroom", "Kitchen"],
                ),
                choice(
                    "urgency",
                    "How urgent is this repair?",
                    &["Emergency", "High priority", "Medium priority", "Low priority"],
                ),
            ],
        }
    }
}

pub struct QuestionGenerator {
    provider: Arc<dyn CompletionProvider>,
    config: LlmConfig,
}

impl QuestionGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            config: config.clone(),
        }
    }

    /// Generate follow-up questions, falling back to the fixed set on any failure
    pub async fn generate(&self, description: &str) -> QuestionSet {
        let request = CompletionRequest {
            model: self.config.question_model.clone(),
            system_prompt: prompts::get_question_system_prompt().to_string(),
            user_prompt: prompts::build_question_prompt(description),
            image: None,
            max_tokens: self.config.question_max_tokens,
            temperature: self.config.temperature,
            json_response: false,
        };

        let result = match self.provider.complete(&request).await {
            Ok(content) => QuestionSet::from_model_reply(&content),
            Err(e) => Err(e),
        };

        match result {
            Ok(set) => {
                info!("Generated {} follow-up questions ({})", set.questions.len(), set.category);
                set
            }
            Err(e) => {
                warn!("Question generation failed, using fallback questions: {}", e);
                QuestionSet::fallback()
            }
        }
    }
}
