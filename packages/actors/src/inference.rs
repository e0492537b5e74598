//! Inference collaborator contract and the modes it is called in.
//!
//! The set of modes is closed: plain generation, instruction editing, and
//! the img2img fallback used when no edit model is configured. The edit
//! mode is picked once when the [`ModeTable`] is resolved, and every job is
//! turned into a fixed-shape plan for exactly one entry point.

use std::path::PathBuf;
use std::sync::Arc;

use render_core::{Artifact, EditRequest, GenerateRequest, InferenceError, JobRequest};
use serde::{Deserialize, Serialize};

/// Result type for collaborator calls.
pub type InferenceResult = Result<Artifact, InferenceError>;

/// The external component that actually produces images.
///
/// Calls are synchronous and may run for minutes; the worker runs them on
/// the blocking thread pool.
pub trait InferenceBackend: Send + Sync + 'static {
    /// Text-to-image generation.
    fn generate(&self, plan: &GeneratePlan) -> InferenceResult;

    /// Instruction-driven edit of an input image.
    fn instruction_edit(&self, plan: &InstructionEditPlan) -> InferenceResult;

    /// Image-to-image edit steered by `strength`.
    fn img2img(&self, plan: &Img2ImgPlan) -> InferenceResult;

    /// Release temporary inputs once a job has finished, whatever the outcome.
    fn cleanup(&self, _request: &JobRequest) {}
}

/// Defaults for text-to-image generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateSettings {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
}

impl Default for GenerateSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            steps: 9,
            guidance: 0.0,
        }
    }
}

/// Defaults for the instruction-edit model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionEditSettings {
    pub model_id: String,
    pub steps: u32,
    pub guidance: f32,
    pub true_cfg_scale: f32,
    pub max_sequence_length: u32,
}

impl Default for InstructionEditSettings {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            steps: 40,
            guidance: 1.0,
            true_cfg_scale: 4.0,
            max_sequence_length: 256,
        }
    }
}

/// Defaults for the img2img fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Img2ImgSettings {
    pub steps: u32,
    pub guidance: f32,
}

impl Default for Img2ImgSettings {
    fn default() -> Self {
        Self {
            steps: 9,
            guidance: 0.0,
        }
    }
}

/// Which collaborator entry point serves edit jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EditMode {
    Instruction(InstructionEditSettings),
    Img2Img(Img2ImgSettings),
}

/// Mode configuration resolved once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeTable {
    pub generate: GenerateSettings,
    pub edit: EditMode,
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::resolve(None)
    }
}

impl ModeTable {
    /// Use instruction editing when an edit model is configured, img2img otherwise.
    pub fn resolve(edit_model_id: Option<&str>) -> Self {
        let edit = match edit_model_id.map(str::trim) {
            Some(model_id) if !model_id.is_empty() => EditMode::Instruction(InstructionEditSettings {
                model_id: model_id.to_string(),
                ..Default::default()
            }),
            _ => EditMode::Img2Img(Img2ImgSettings::default()),
        };
        Self {
            generate: GenerateSettings::default(),
            edit,
        }
    }

    /// Merge a request with the mode defaults into the plan for its entry point.
    pub fn plan(&self, request: &JobRequest) -> InferencePlan {
        match request {
            JobRequest::Generate(req) => InferencePlan::Generate(self.generate_plan(req)),
            JobRequest::Edit(req) => match &self.edit {
                EditMode::Instruction(settings) => {
                    InferencePlan::InstructionEdit(instruction_plan(settings, req))
                }
                EditMode::Img2Img(settings) => InferencePlan::Img2Img(img2img_plan(settings, req)),
            },
        }
    }

    fn generate_plan(&self, req: &GenerateRequest) -> GeneratePlan {
        let settings = &self.generate;
        GeneratePlan {
            prompt: req.prompt.clone(),
            negative_prompt: req.negative_prompt.clone(),
            width: floor_to_16(req.width.unwrap_or(settings.width)),
            height: floor_to_16(req.height.unwrap_or(settings.height)),
            steps: req.steps.unwrap_or(settings.steps),
            guidance: req.guidance.unwrap_or(settings.guidance),
            seed: req.seed,
        }
    }
}

fn instruction_plan(settings: &InstructionEditSettings, req: &EditRequest) -> InstructionEditPlan {
    // The edit model expects a single space rather than an empty negative prompt.
    let negative_prompt = match req.negative_prompt.as_deref().map(str::trim) {
        Some(neg) if !neg.is_empty() => neg.to_string(),
        _ => " ".to_string(),
    };
    InstructionEditPlan {
        model_id: settings.model_id.clone(),
        prompt: req.prompt.clone(),
        negative_prompt,
        input_image: req.input_image.clone(),
        size: edit_size(req),
        steps: req.steps.unwrap_or(settings.steps),
        guidance: req.guidance.unwrap_or(settings.guidance),
        true_cfg_scale: settings.true_cfg_scale,
        max_sequence_length: settings.max_sequence_length,
        seed: req.seed,
    }
}

fn img2img_plan(settings: &Img2ImgSettings, req: &EditRequest) -> Img2ImgPlan {
    Img2ImgPlan {
        prompt: req.prompt.clone(),
        negative_prompt: req.negative_prompt.clone(),
        input_image: req.input_image.clone(),
        size: edit_size(req),
        strength: req.strength,
        steps: req.steps.unwrap_or(settings.steps),
        guidance: req.guidance.unwrap_or(settings.guidance),
        seed: req.seed,
    }
}

fn edit_size(req: &EditRequest) -> EditSize {
    if req.width.is_none() && req.height.is_none() {
        EditSize::MaxSide(req.max_side)
    } else {
        EditSize::Explicit {
            width: req.width.map(floor_to_16),
            height: req.height.map(floor_to_16),
        }
    }
}

/// Round down to a multiple of 16, never below 16.
pub fn floor_to_16(value: u32) -> u32 {
    ((value / 16) * 16).max(16)
}

/// How the output size of an edit is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditSize {
    /// Keep the input's size, downscaled so its longest side fits.
    MaxSide(Option<u32>),
    /// Forced size; a missing side keeps the input's.
    Explicit {
        width: Option<u32>,
        height: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratePlan {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionEditPlan {
    pub model_id: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub input_image: PathBuf,
    pub size: EditSize,
    pub steps: u32,
    pub guidance: f32,
    pub true_cfg_scale: f32,
    pub max_sequence_length: u32,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Img2ImgPlan {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub input_image: PathBuf,
    pub size: EditSize,
    pub strength: f32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: Option<u64>,
}

/// One fully resolved call into the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InferencePlan {
    Generate(GeneratePlan),
    InstructionEdit(InstructionEditPlan),
    Img2Img(Img2ImgPlan),
}

impl InferencePlan {
    /// Call the entry point matching this plan.
    pub fn run(&self, backend: &dyn InferenceBackend) -> InferenceResult {
        match self {
            InferencePlan::Generate(plan) => backend.generate(plan),
            InferencePlan::InstructionEdit(plan) => backend.instruction_edit(plan),
            InferencePlan::Img2Img(plan) => backend.img2img(plan),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            InferencePlan::Generate(_) => "generate",
            InferencePlan::InstructionEdit(_) => "instruction_edit",
            InferencePlan::Img2Img(_) => "img2img",
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            InferencePlan::Generate(plan) => &plan.prompt,
            InferencePlan::InstructionEdit(plan) => &plan.prompt,
            InferencePlan::Img2Img(plan) => &plan.prompt,
        }
    }
}

/// A simple closure-based backend that sees every plan.
pub struct FnBackend<F>
where
    F: Fn(&InferencePlan) -> InferenceResult + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnBackend<F>
where
    F: Fn(&InferencePlan) -> InferenceResult + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }

    /// Wrap into the shared handle the scheduler expects.
    pub fn shared(handler: F) -> Arc<dyn InferenceBackend> {
        Arc::new(Self::new(handler))
    }
}

impl<F> InferenceBackend for FnBackend<F>
where
    F: Fn(&InferencePlan) -> InferenceResult + Send + Sync + 'static,
{
    fn generate(&self, plan: &GeneratePlan) -> InferenceResult {
        (self.handler)(&InferencePlan::Generate(plan.clone()))
    }

    fn instruction_edit(&self, plan: &InstructionEditPlan) -> InferenceResult {
        (self.handler)(&InferencePlan::InstructionEdit(plan.clone()))
    }

    fn img2img(&self, plan: &Img2ImgPlan) -> InferenceResult {
        (self.handler)(&InferencePlan::Img2Img(plan.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_edit_mode_once_from_model_id() {
        assert!(matches!(ModeTable::resolve(None).edit, EditMode::Img2Img(_)));
        assert!(matches!(ModeTable::resolve(Some("  ")).edit, EditMode::Img2Img(_)));
        match ModeTable::resolve(Some("Qwen/Qwen-Image-Edit-2511")).edit {
            EditMode::Instruction(settings) => {
                assert_eq!(settings.model_id, "Qwen/Qwen-Image-Edit-2511");
                assert_eq!(settings.steps, 40);
            }
            other => panic!("unexpected edit mode: {other:?}"),
        }
    }

    #[test]
    fn generate_plan_applies_defaults_and_rounds_sizes() {
        let table = ModeTable::default();
        let mut req = GenerateRequest::new("cat");
        req.width = Some(1000);

        let InferencePlan::Generate(plan) = table.plan(&JobRequest::Generate(req)) else {
            panic!("expected a generate plan");
        };
        assert_eq!(plan.width, 992);
        assert_eq!(plan.height, 1024);
        assert_eq!(plan.steps, 9);
        assert_eq!(plan.guidance, 0.0);
        assert_eq!(plan.seed, Some(42));
    }

    #[test]
    fn edit_plans_follow_the_resolved_mode() {
        let req = JobRequest::Edit(EditRequest::new("make it blue", "uploads/in.png"));

        let InferencePlan::Img2Img(plan) = ModeTable::resolve(None).plan(&req) else {
            panic!("expected an img2img plan");
        };
        assert_eq!(plan.strength, 0.6);
        assert_eq!(plan.size, EditSize::MaxSide(Some(768)));

        let InferencePlan::InstructionEdit(plan) = ModeTable::resolve(Some("edit-model")).plan(&req)
        else {
            panic!("expected an instruction edit plan");
        };
        assert_eq!(plan.negative_prompt, " ");
        assert_eq!(plan.guidance, 1.0);
        assert_eq!(plan.true_cfg_scale, 4.0);
    }

    #[test]
    fn plan_runs_matching_entry_point() {
        let backend = FnBackend::new(|plan: &InferencePlan| {
            Ok(Artifact::new(format!("/assets/{}.png", plan.mode())))
        });
        let req = JobRequest::Edit(EditRequest::new("x", "in.png"));
        let plan = ModeTable::resolve(None).plan(&req);
        assert_eq!(plan.run(&backend).unwrap().url, "/assets/img2img.png");
    }
}
