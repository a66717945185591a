use std::process::Stdio;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{
    error::{AppError, ExtractionStage},
    types::source_format::SourceFormat,
    utils::config::AppConfig,
};
use tokio::process::Command;
use tracing::{debug, warn};

use super::optical_fallback::TextRecognizer;

const MAX_VISION_ATTEMPTS: usize = 2;
/// Refusals are short; a long reply is treated as a transcription whatever it starts with.
const MAX_REFUSAL_CHARS: usize = 240;
const REFUSAL_OPENINGS: &[&str] = &[
    "i cannot",
    "i can't",
    "i can not",
    "i'm unable to",
    "i am unable to",
    "i'm sorry",
    "i am sorry",
    "sorry",
    "unfortunately, i",
    "as an ai",
];
const PAGE_TRANSCRIPTION_PROMPT: &str = "Transcribe all visible text on this document page verbatim in reading order. Respond with the text only, without commentary or Markdown formatting.";
const PAGE_TRANSCRIPTION_PROMPT_RETRY: &str = "The page image is already supplied, so do not respond that you cannot view it. Transcribe every visible word on the page verbatim and respond with the text only.";

fn recognize_err(cause: impl std::fmt::Display) -> AppError {
    AppError::extraction(SourceFormat::Pdf, ExtractionStage::Recognize, cause)
}

/// Runs the `tesseract` command line tool on a temporary PNG.
pub struct TesseractRecognizer {
    binary: String,
    language: String,
}

impl TesseractRecognizer {
    pub fn new(binary: &str, language: &str) -> Self {
        Self {
            binary: binary.to_string(),
            language: language.to_string(),
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize_text(&self, png: &[u8]) -> Result<String, AppError> {
        let staged = tempfile::Builder::new()
            .prefix("ocr-page-")
            .suffix(".png")
            .tempfile()?;
        tokio::fs::write(staged.path(), png).await?;

        let output = Command::new(&self.binary)
            .arg(staged.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| recognize_err(format!("failed to run `{}`: {err}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(recognize_err(format!(
                "`{}` exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(chars = text.len(), "tesseract recognized page");
        Ok(text)
    }
}

/// Sends a page image to a vision-capable chat model for transcription.
pub struct VisionRecognizer {
    client: Client<OpenAIConfig>,
    model: String,
}

impl VisionRecognizer {
    pub fn new(client: Client<OpenAIConfig>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_base(&config.openai_base_url);
        if let Some(api_key) = &config.openai_api_key {
            openai_config = openai_config.with_api_key(api_key);
        }
        Self::new(Client::with_config(openai_config), &config.vision_model)
    }
}

#[async_trait]
impl TextRecognizer for VisionRecognizer {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn recognize_text(&self, png: &[u8]) -> Result<String, AppError> {
        let image_url = format!("data:image/png;base64,{}", STANDARD.encode(png));

        for attempt in 0..MAX_VISION_ATTEMPTS {
            let prompt = if attempt == 0 {
                PAGE_TRANSCRIPTION_PROMPT
            } else {
                PAGE_TRANSCRIPTION_PROMPT_RETRY
            };

            let request = CreateChatCompletionRequestArgs::default()
                .model(&self.model)
                .messages([ChatCompletionRequestUserMessageArgs::default()
                    .content(vec![
                        ChatCompletionRequestMessageContentPartTextArgs::default()
                            .text(prompt)
                            .build()?
                            .into(),
                        ChatCompletionRequestMessageContentPartImageArgs::default()
                            .image_url(
                                ImageUrlArgs::default()
                                    .url(image_url.as_str())
                                    .detail(ImageDetail::High)
                                    .build()?,
                            )
                            .build()?
                            .into(),
                    ])
                    .build()?
                    .into()])
                .build()?;

            let response = self.client.chat().create(request).await?;
            let Some(content) = response
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_ref())
            else {
                warn!(attempt, "vision response missing content");
                continue;
            };

            if is_low_quality_response(content) {
                warn!(attempt, "vision model returned a refusal or empty transcription");
                continue;
            }

            return Ok(content.trim().to_string());
        }

        Err(recognize_err("vision model did not return a usable transcription"))
    }
}

fn is_low_quality_response(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.chars().count() > MAX_REFUSAL_CHARS {
        return false;
    }
    let lowered = trimmed.to_lowercase().replace('\u{2019}', "'");
    REFUSAL_OPENINGS
        .iter()
        .any(|opening| lowered.starts_with(opening))
}
