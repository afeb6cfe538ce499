//! Prompt templates for the two generated documents.
//!
//! Each template carries exactly one `{{TRANSCRIPT}}` placeholder. Templates are
//! loaded once when the process starts and shared read-only afterwards.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Placeholder substituted with the transcript text
pub const TRANSCRIPT_PLACEHOLDER: &str = "{{TRANSCRIPT}}";

const GREENPAPER_PROMPT: &str = r#"You are a public policy assistant helping people with lived experience of the UK welfare system submit evidence to a government consultation.

You are writing on behalf of someone who has recorded a voice message, which has been transcribed. The speaker may be upset, informal, or distressed. Your job is to summarize their points into a structured, respectful, and formal response to the DWP Green Paper: "Pathways to Work".

You must:
- Use neutral language, even if the speaker is emotional.
- Highlight key experiences, concerns, or recommendations.
- Avoid quoting verbatim unless it's impactful.
- Do not include names, threats, or personally identifying information.
- Start with a subject line and greeting.
- End with a respectful sign-off.
- Add a short emotional summary (before the email) like:
  Emotion Summary: "The speaker appeared [emotion] and discussed..."

Here is the transcription:
<transcript>
{{TRANSCRIPT}}
</transcript>
"#;

const MP_PROMPT: &str = r#"You are helping a constituent write to their Member of Parliament about the DWP Green Paper: "Pathways to Work".

The constituent has recorded a voice message, which has been transcribed. They may be upset, informal, or distressed. Turn what they said into a clear, personal and polite letter to their MP.

You must:
- Write in the first person, as the constituent.
- Explain how the proposals would affect them, using the experiences they describe.
- Ask the MP for something specific, such as raising the concerns with the Minister or responding to the consultation.
- Keep a calm, respectful tone, even if the speaker is angry.
- Do not invent facts, names, or personal details the speaker did not give.
- Leave placeholders such as [Your name] and [Your address] for the constituent to fill in.
- Start with a subject line and "Dear [MP name],".

Here is the transcription:
<transcript>
{{TRANSCRIPT}}
</transcript>
"#;

/// Which document a template produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Formal consultation response
    Greenpaper,

    /// Constituent letter to their MP
    Mp,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greenpaper => "greenpaper",
            Self::Mp => "mp",
        }
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static prompt text with a single transcript placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    kind: TemplateKind,
    text: String,
}

impl PromptTemplate {
    /// Build a template, checking it has exactly one placeholder
    pub fn new(kind: TemplateKind, text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let count = text.matches(TRANSCRIPT_PLACEHOLDER).count();
        if count != 1 {
            anyhow::bail!(
                "{} prompt must contain {} exactly once (found {})",
                kind,
                TRANSCRIPT_PLACEHOLDER,
                count
            );
        }
        Ok(Self { kind, text })
    }

    /// Load a template from a file
    pub fn from_file(kind: TemplateKind, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} prompt: {}", kind, path.display()))?;
        Self::new(kind, text)
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    /// Template text with the placeholder intact
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Substitute the transcript into the template
    pub fn render(&self, transcript: &str) -> String {
        self.text.replacen(TRANSCRIPT_PLACEHOLDER, transcript, 1)
    }
}

/// The pair of templates used by the generate stage
#[derive(Debug, Clone)]
pub struct Prompts {
    pub greenpaper: PromptTemplate,
    pub mp: PromptTemplate,
}

impl Prompts {
    /// Built-in templates
    pub fn builtin() -> Self {
        Self {
            greenpaper: PromptTemplate {
                kind: TemplateKind::Greenpaper,
                text: GREENPAPER_PROMPT.to_string(),
            },
            mp: PromptTemplate {
                kind: TemplateKind::Mp,
                text: MP_PROMPT.to_string(),
            },
        }
    }

    /// Built-in templates, replaced by any override files given
    pub fn load(greenpaper: Option<&Path>, mp: Option<&Path>) -> Result<Self> {
        let builtin = Self::builtin();
        Ok(Self {
            greenpaper: match greenpaper {
                Some(path) => PromptTemplate::from_file(TemplateKind::Greenpaper, path)?,
                None => builtin.greenpaper,
            },
            mp: match mp {
                Some(path) => PromptTemplate::from_file(TemplateKind::Mp, path)?,
                None => builtin.mp,
            },
        })
    }
}
