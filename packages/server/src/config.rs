use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderValue;
use render_actors::{ModeTable, SchedulerConfig};

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// Every field has a default suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Where produced images are written (default: `assets`).
    pub assets_dir: PathBuf,
    /// Where uploaded edit inputs are staged (default: `uploads`).
    pub uploads_dir: PathBuf,
    /// Request body limit for uploads in bytes (default: 20 MiB).
    pub max_upload_bytes: usize,
    /// Program that runs the model (default: `python3`).
    pub inference_program: String,
    /// Leading arguments for the program (default: `-m app.cli`).
    pub inference_args: Vec<String>,
    /// Program that edits images; unset disables `POST /api/edit`.
    pub edit_program: Option<String>,
    /// Leading arguments for the edit program.
    pub edit_args: Vec<String>,
    /// Instruction-edit model; unset selects the img2img fallback.
    pub edit_model_id: Option<String>,
    /// How long finished jobs stay pollable; unset keeps them forever.
    pub job_retention: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec!["*".into()],
            assets_dir: PathBuf::from("assets"),
            uploads_dir: PathBuf::from("uploads"),
            max_upload_bytes: 20 * 1024 * 1024,
            inference_program: "python3".into(),
            inference_args: vec!["-m".into(), "app.cli".into()],
            edit_program: None,
            edit_args: Vec::new(),
            edit_model_id: None,
            job_retention: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default       |
    /// |----------------------|---------------|
    /// | `HOST`               | `0.0.0.0`     |
    /// | `PORT`               | `8000`        |
    /// | `CORS_ORIGINS`       | `*`           |
    /// | `ASSETS_DIR`         | `assets`      |
    /// | `UPLOADS_DIR`        | `uploads`     |
    /// | `MAX_UPLOAD_BYTES`   | `20971520`    |
    /// | `INFERENCE_PROGRAM`  | `python3`     |
    /// | `INFERENCE_ARGS`     | `-m app.cli`  |
    /// | `EDIT_PROGRAM`       | unset         |
    /// | `EDIT_ARGS`          | empty         |
    /// | `EDIT_MODEL_ID`      | unset         |
    /// | `JOB_RETENTION_SECS` | unset         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = var("HOST") {
            host.parse::<IpAddr>()
                .map_err(|e| ConfigError::invalid("HOST", &host, e))?;
            config.host = host;
        }
        if let Some(port) = var("PORT") {
            config.port = port
                .parse()
                .map_err(|e| ConfigError::invalid("PORT", &port, e))?;
        }
        if let Some(origins) = var("CORS_ORIGINS") {
            config.cors_origins = parse_origins(&origins)?;
        }
        if let Some(dir) = var("ASSETS_DIR") {
            config.assets_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("UPLOADS_DIR") {
            config.uploads_dir = PathBuf::from(dir);
        }
        if let Some(limit) = var("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = limit
                .parse()
                .map_err(|e| ConfigError::invalid("MAX_UPLOAD_BYTES", &limit, e))?;
        }
        if let Some(program) = var("INFERENCE_PROGRAM") {
            config.inference_program = program;
        }
        if let Some(args) = lookup("INFERENCE_ARGS") {
            config.inference_args = args.split_whitespace().map(String::from).collect();
        }
        config.edit_program = var("EDIT_PROGRAM");
        if let Some(args) = lookup("EDIT_ARGS") {
            config.edit_args = args.split_whitespace().map(String::from).collect();
        }
        config.edit_model_id = var("EDIT_MODEL_ID").map(|id| id.trim().to_string());
        if let Some(secs) = var("JOB_RETENTION_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| ConfigError::invalid("JOB_RETENTION_SECS", &secs, e))?;
            config.job_retention = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| ConfigError::invalid("HOST", &self.host, e))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Whether a command is configured for edit jobs.
    pub fn edit_enabled(&self) -> bool {
        self.edit_program.is_some()
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }

    /// Edit mode is fixed here, once, for the life of the process.
    pub fn mode_table(&self) -> ModeTable {
        ModeTable::resolve(self.edit_model_id.as_deref())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let config = SchedulerConfig::default();
        match self.job_retention {
            Some(retention) => config.with_retention(retention),
            None => config,
        }
    }
}

fn parse_origins(raw: &str) -> Result<Vec<String>, ConfigError> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    for origin in origins.iter().filter(|o| *o != "*") {
        HeaderValue::from_str(origin).map_err(|e| ConfigError::invalid("CORS_ORIGINS", origin, e))?;
    }
    Ok(origins)
}
