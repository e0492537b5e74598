//! Request payloads for generation and edit jobs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::QueueError;

const MAX_PROMPT_CHARS: usize = 4000;
const MIN_SIDE: u32 = 16;
const MAX_SIDE: u32 = 4096;
const MAX_STEPS: u32 = 200;

fn default_seed() -> Option<u64> {
    Some(42)
}

fn default_strength() -> f32 {
    0.6
}

fn default_max_side() -> Option<u32> {
    Some(768)
}

/// Tag distinguishing the task variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Generate,
    Edit,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Generate => "generate",
            JobKind::Edit => "edit",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for text-to-image generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f32>,
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: None,
            height: None,
            steps: None,
            guidance: None,
            seed: default_seed(),
        }
    }
}

/// Parameters for editing an existing image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    pub prompt: String,
    /// Image to edit, as stored on the server's filesystem.
    pub input_image: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// How far the img2img fallback may move away from the input, in (0, 1].
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Longest side the input is downscaled to when no size is forced.
    #[serde(default = "default_max_side")]
    pub max_side: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<f32>,
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
}

impl EditRequest {
    pub fn new(prompt: impl Into<String>, input_image: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            input_image: input_image.into(),
            negative_prompt: None,
            strength: default_strength(),
            width: None,
            height: None,
            max_side: default_max_side(),
            steps: None,
            guidance: None,
            seed: default_seed(),
        }
    }
}

/// Caller-supplied parameters for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobRequest {
    Generate(GenerateRequest),
    Edit(EditRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Generate(_) => JobKind::Generate,
            JobRequest::Edit(_) => JobKind::Edit,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            JobRequest::Generate(req) => &req.prompt,
            JobRequest::Edit(req) => &req.prompt,
        }
    }

    /// Reject malformed parameters before a job is created.
    pub fn validate(&self) -> Result<(), QueueError> {
        validate_prompt(self.prompt())?;
        match self {
            JobRequest::Generate(req) => {
                validate_side("width", req.width)?;
                validate_side("height", req.height)?;
                validate_steps(req.steps)?;
                validate_guidance(req.guidance)?;
            }
            JobRequest::Edit(req) => {
                if req.input_image.as_os_str().is_empty() {
                    return Err(invalid("input_image is required"));
                }
                if !(req.strength > 0.0 && req.strength <= 1.0) {
                    return Err(invalid("strength must be in (0, 1]"));
                }
                validate_side("width", req.width)?;
                validate_side("height", req.height)?;
                if let Some(max_side) = req.max_side
                    && max_side < MIN_SIDE
                {
                    return Err(invalid(format!("max_side must be at least {MIN_SIDE}")));
                }
                validate_steps(req.steps)?;
                validate_guidance(req.guidance)?;
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> QueueError {
    QueueError::InvalidRequest(message.into())
}

fn validate_prompt(prompt: &str) -> Result<(), QueueError> {
    if prompt.trim().is_empty() {
        return Err(invalid("prompt must not be empty"));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(invalid(format!(
            "prompt must be at most {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_side(name: &str, value: Option<u32>) -> Result<(), QueueError> {
    match value {
        Some(v) if !(MIN_SIDE..=MAX_SIDE).contains(&v) => Err(invalid(format!(
            "{name} must be between {MIN_SIDE} and {MAX_SIDE}"
        ))),
        _ => Ok(()),
    }
}

fn validate_steps(steps: Option<u32>) -> Result<(), QueueError> {
    match steps {
        Some(s) if s == 0 || s > MAX_STEPS => {
            Err(invalid(format!("steps must be between 1 and {MAX_STEPS}")))
        }
        _ => Ok(()),
    }
}

fn validate_guidance(guidance: Option<f32>) -> Result<(), QueueError> {
    match guidance {
        Some(g) if !g.is_finite() || g < 0.0 => {
            Err(invalid("guidance must be a non-negative number"))
        }
        _ => Ok(()),
    }
}
