//! Inference collaborator that shells out to model-serving commands.
//!
//! Generation and editing run through separate commands. Each plan becomes
//! one process invocation:
//!
//! ```text
//! <program> <args..> --prompt P [--negative N] --height H --width W --steps S --guidance G [--seed N] --output PATH
//! <edit_program> <edit_args..> --mode instruction --model-id M --image IN --prompt P ... --output PATH
//! <edit_program> <edit_args..> --mode img2img --image IN --prompt P --strength X ... --output PATH
//! ```
//!
//! The generate command takes no subcommand and no flags beyond those above.
//! Without an edit command, edit plans are rejected before anything runs.
//! The command writes the image to `--output`; the artifact url points at it
//! under `/assets`.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Local;
use render_actors::{
    EditSize, GeneratePlan, Img2ImgPlan, InferenceBackend, InferenceResult, InstructionEditPlan,
};
use render_core::{Artifact, InferenceError, JobRequest};
use ulid::Ulid;

use crate::config::ServerConfig;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// A program plus the leading arguments placed before every invocation.
#[derive(Debug, Clone)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

pub struct CommandBackend {
    generate: CommandLine,
    edit: Option<CommandLine>,
    assets_dir: PathBuf,
    uploads_dir: PathBuf,
}

impl CommandBackend {
    pub fn new(
        generate: CommandLine,
        edit: Option<CommandLine>,
        assets_dir: impl Into<PathBuf>,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            generate,
            edit,
            assets_dir: assets_dir.into(),
            uploads_dir: uploads_dir.into(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let edit = config
            .edit_program
            .as_ref()
            .map(|program| CommandLine::new(program.clone(), config.edit_args.clone()));
        Self::new(
            CommandLine::new(config.inference_program.clone(), config.inference_args.clone()),
            edit,
            config.assets_dir.clone(),
            config.uploads_dir.clone(),
        )
    }

    /// Fresh output file name, e.g. `output_2026-10-19_12-00-00_<ulid>.png`.
    fn output_name(prefix: &str) -> String {
        format!(
            "{prefix}_{}_{}.png",
            Local::now().format("%Y-%m-%d_%H-%M-%S"),
            Ulid::new().to_string().to_lowercase()
        )
    }

    fn edit_command(&self) -> Result<&CommandLine, InferenceError> {
        self.edit
            .as_ref()
            .ok_or_else(|| InferenceError::Rejected("no edit command is configured".into()))
    }

    fn run(
        &self,
        command: &CommandLine,
        mode: &str,
        mut args: Vec<String>,
        prefix: &str,
    ) -> InferenceResult {
        std::fs::create_dir_all(&self.assets_dir)?;
        let name = Self::output_name(prefix);
        let output = self.assets_dir.join(&name);
        args.push("--output".into());
        args.push(output.display().to_string());

        tracing::debug!(program = %command.program, mode, output = %output.display(), "Running inference command");
        let result = Command::new(&command.program)
            .args(&command.args)
            .args(&args)
            .output()?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr_tail(&stderr);
            if stderr.to_lowercase().contains("out of memory") {
                return Err(InferenceError::ResourceExhausted(tail));
            }
            return Err(InferenceError::Internal(format!(
                "{mode} exited with {}: {tail}",
                result.status
            )));
        }
        if !output.is_file() {
            return Err(InferenceError::Internal(format!(
                "{mode} finished without writing {}",
                output.display()
            )));
        }

        Ok(Artifact::new(format!("/assets/{name}")))
    }
}

impl InferenceBackend for CommandBackend {
    fn generate(&self, plan: &GeneratePlan) -> InferenceResult {
        let mut args = vec!["--prompt".into(), plan.prompt.clone()];
        if let Some(negative) = &plan.negative_prompt {
            args.extend(["--negative".into(), negative.clone()]);
        }
        args.extend([
            "--height".into(),
            plan.height.to_string(),
            "--width".into(),
            plan.width.to_string(),
            "--steps".into(),
            plan.steps.to_string(),
            "--guidance".into(),
            plan.guidance.to_string(),
        ]);
        push_seed(&mut args, plan.seed);
        self.run(&self.generate, "generate", args, "output")
    }

    fn instruction_edit(&self, plan: &InstructionEditPlan) -> InferenceResult {
        let command = self.edit_command()?;
        require_input(&plan.input_image)?;
        let mut args = vec![
            "--mode".into(),
            "instruction".into(),
            "--model-id".into(),
            plan.model_id.clone(),
            "--image".into(),
            plan.input_image.display().to_string(),
            "--prompt".into(),
            plan.prompt.clone(),
            "--negative".into(),
            plan.negative_prompt.clone(),
            "--steps".into(),
            plan.steps.to_string(),
            "--guidance".into(),
            plan.guidance.to_string(),
            "--true-cfg-scale".into(),
            plan.true_cfg_scale.to_string(),
            "--max-sequence-length".into(),
            plan.max_sequence_length.to_string(),
        ];
        push_size(&mut args, plan.size);
        push_seed(&mut args, plan.seed);
        self.run(command, "edit", args, "edit")
    }

    fn img2img(&self, plan: &Img2ImgPlan) -> InferenceResult {
        let command = self.edit_command()?;
        require_input(&plan.input_image)?;
        let mut args = vec![
            "--mode".into(),
            "img2img".into(),
            "--image".into(),
            plan.input_image.display().to_string(),
            "--prompt".into(),
            plan.prompt.clone(),
            "--strength".into(),
            plan.strength.to_string(),
            "--steps".into(),
            plan.steps.to_string(),
            "--guidance".into(),
            plan.guidance.to_string(),
        ];
        if let Some(negative) = &plan.negative_prompt {
            args.extend(["--negative".into(), negative.clone()]);
        }
        push_size(&mut args, plan.size);
        push_seed(&mut args, plan.seed);
        self.run(command, "img2img", args, "edit")
    }

    /// Remove an uploaded edit input once its job is done.
    fn cleanup(&self, request: &JobRequest) {
        let JobRequest::Edit(edit) = request else {
            return;
        };
        if !edit.input_image.starts_with(&self.uploads_dir) {
            return;
        }
        match std::fs::remove_file(&edit.input_image) {
            Ok(()) => tracing::debug!(path = %edit.input_image.display(), "Removed upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %edit.input_image.display(), error = %e, "Failed to remove upload")
            }
        }
    }
}

fn require_input(path: &Path) -> Result<(), InferenceError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(InferenceError::Rejected(format!(
            "input image not found: {}",
            path.display()
        )))
    }
}

fn push_seed(args: &mut Vec<String>, seed: Option<u64>) {
    if let Some(seed) = seed {
        args.extend(["--seed".into(), seed.to_string()]);
    }
}

fn push_size(args: &mut Vec<String>, size: EditSize) {
    match size {
        EditSize::MaxSide(Some(max_side)) => {
            args.extend(["--max-side".into(), max_side.to_string()]);
        }
        EditSize::MaxSide(None) => {}
        EditSize::Explicit { width, height } => {
            if let Some(width) = width {
                args.extend(["--width".into(), width.to_string()]);
            }
            if let Some(height) = height {
                args.extend(["--height".into(), height.to_string()]);
            }
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use render_actors::{InferencePlan, ModeTable};
    use render_core::{EditRequest, GenerateRequest};

    /// `sh -c SCRIPT render <args..>`: the script sees the arguments from `$1`.
    fn script(body: &str) -> CommandLine {
        CommandLine::new("sh", vec!["-c".into(), body.into(), "render".into()])
    }

    fn backend(generate: &str, edit: Option<&str>, dir: &Path) -> CommandBackend {
        CommandBackend::new(
            script(generate),
            edit.map(script),
            dir.join("assets"),
            dir.join("uploads"),
        )
    }

    /// Accepts exactly the generate command's flags, failing like argparse otherwise.
    const GENERATE_ONLY: &str = r#"
        out=""
        while [ $# -gt 0 ]; do
            case "$1" in
                --prompt|--negative|--height|--width|--steps|--guidance|--seed) shift 2 ;;
                --output) out="$2"; shift 2 ;;
                *) echo "error: unrecognized arguments: $1" >&2; exit 2 ;;
            esac
        done
        [ -n "$out" ] || { echo "error: --output is required" >&2; exit 2; }
        printf 'generated' > "$out"
    "#;

    /// Writes the `--mode` value into `--output`.
    const WRITE_MODE: &str = r#"
        mode=""
        while [ $# -gt 0 ]; do
            if [ "$1" = "--mode" ]; then mode="$2"; fi
            if [ "$1" = "--output" ]; then out="$2"; fi
            shift
        done
        printf '%s' "$mode" > "$out"
    "#;

    fn plan(request: JobRequest, modes: &ModeTable) -> InferencePlan {
        modes.plan(&request)
    }

    fn written(dir: &Path, artifact: &Artifact) -> String {
        let name = artifact.url.trim_start_matches("/assets/");
        std::fs::read_to_string(dir.join("assets").join(name)).unwrap()
    }

    #[test]
    fn generate_speaks_only_the_generate_flags() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(GENERATE_ONLY, None, dir.path());
        let mut request = GenerateRequest::new("a lighthouse");
        request.negative_prompt = Some("fog".into());
        request.seed = Some(7);
        let plan = plan(JobRequest::Generate(request), &ModeTable::default());

        let artifact = plan.run(&backend).unwrap();
        assert!(artifact.url.starts_with("/assets/output_"));
        assert_eq!(written(dir.path(), &artifact), "generated");
    }

    #[test]
    fn generate_only_command_refuses_unknown_flags() {
        let dir = tempfile::tempdir().unwrap();
        let strict = CommandLine::new(
            "sh",
            vec!["-c".into(), GENERATE_ONLY.into(), "render".into(), "generate".into()],
        );
        let backend = CommandBackend::new(
            strict,
            None,
            dir.path().join("assets"),
            dir.path().join("uploads"),
        );
        let plan = plan(
            JobRequest::Generate(GenerateRequest::new("a lighthouse")),
            &ModeTable::default(),
        );

        let err = plan.run(&backend).unwrap_err();
        assert!(matches!(err, InferenceError::Internal(ref msg) if msg.contains("unrecognized arguments: generate")));
    }

    #[test]
    fn edit_mode_follows_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let input = uploads.join("in.png");
        std::fs::write(&input, b"png").unwrap();
        let backend = backend(GENERATE_ONLY, Some(WRITE_MODE), dir.path());
        let request = JobRequest::Edit(EditRequest::new("add a hat", &input));

        let artifact = plan(request.clone(), &ModeTable::resolve(Some("edit-model")))
            .run(&backend)
            .unwrap();
        assert!(artifact.url.starts_with("/assets/edit_"));
        assert_eq!(written(dir.path(), &artifact), "instruction");

        let artifact = plan(request.clone(), &ModeTable::default())
            .run(&backend)
            .unwrap();
        assert_eq!(written(dir.path(), &artifact), "img2img");

        backend.cleanup(&request);
        assert!(!input.exists());
    }

    #[test]
    fn edit_without_a_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let input = uploads.join("in.png");
        std::fs::write(&input, b"png").unwrap();
        let backend = backend(GENERATE_ONLY, None, dir.path());
        let request = JobRequest::Edit(EditRequest::new("add a hat", &input));

        for modes in [ModeTable::default(), ModeTable::resolve(Some("edit-model"))] {
            let err = plan(request.clone(), &modes).run(&backend).unwrap_err();
            assert!(matches!(err, InferenceError::Rejected(ref msg) if msg.contains("no edit command")));
        }
        assert!(!dir.path().join("assets").exists());
    }

    #[test]
    fn missing_input_is_rejected_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend("exit 0", Some("exit 0"), dir.path());
        let request = JobRequest::Edit(EditRequest::new("add a hat", dir.path().join("gone.png")));

        let err = plan(request, &ModeTable::default()).run(&backend).unwrap_err();
        assert!(matches!(err, InferenceError::Rejected(_)));
    }

    #[test]
    fn classifies_command_failures() {
        let dir = tempfile::tempdir().unwrap();
        let request = JobRequest::Generate(GenerateRequest::new("a lighthouse"));
        let modes = ModeTable::default();

        let oom = backend("echo 'RuntimeError: MPS backend out of memory' >&2; exit 1", None, dir.path());
        let err = plan(request.clone(), &modes).run(&oom).unwrap_err();
        assert!(matches!(err, InferenceError::ResourceExhausted(ref msg) if msg.contains("out of memory")));

        let broken = backend("echo 'model weights missing' >&2; exit 3", None, dir.path());
        let err = plan(request.clone(), &modes).run(&broken).unwrap_err();
        assert!(matches!(err, InferenceError::Internal(ref msg) if msg.contains("model weights missing")));

        let silent = backend("exit 0", None, dir.path());
        let err = plan(request, &modes).run(&silent).unwrap_err();
        assert!(matches!(err, InferenceError::Internal(ref msg) if msg.contains("without writing")));
    }

    #[test]
    fn cleanup_leaves_files_outside_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("keep.png");
        std::fs::write(&outside, b"png").unwrap();
        let backend = backend("exit 0", None, dir.path());

        backend.cleanup(&JobRequest::Edit(EditRequest::new("x", &outside)));
        assert!(outside.exists());
    }
}
