use notedmark_atoms::drawing::{Color, SurfaceConfig};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Failed to load annotation font: {0}")]
    Font(String),
}

/// Which backends the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// DynamoDB, S3 and Cognito.
    Aws,
    /// In-process backends, for local runs.
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CognitoConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend_mode: BackendMode,
    pub table_name: String,
    pub bucket_name: String,
    /// Required in `Aws` mode.
    pub cognito: Option<CognitoConfig>,
    pub region: Option<String>,
    /// Base of every public object URL; the bucket name and path follow it.
    pub public_base_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub font_path: Option<PathBuf>,
    pub surface: SurfaceConfig,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend_mode = match var("BACKEND_MODE").as_deref() {
            None | Some("aws") => BackendMode::Aws,
            Some("memory") => BackendMode::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid { name: "BACKEND_MODE", value: other.to_string() })
            }
        };

        let cognito = match (var("COGNITO_CLIENT_ID"), var("COGNITO_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(CognitoConfig { client_id, client_secret }),
            (None, _) if backend_mode == BackendMode::Aws => {
                return Err(ConfigError::Missing("COGNITO_CLIENT_ID"))
            }
            (_, None) if backend_mode == BackendMode::Aws => {
                return Err(ConfigError::Missing("COGNITO_CLIENT_SECRET"))
            }
            _ => None,
        };

        let defaults = SurfaceConfig::default();
        let surface = SurfaceConfig {
            max_width: parse_dimension("SURFACE_MAX_WIDTH", var("SURFACE_MAX_WIDTH"), defaults.max_width)?,
            height: parse_dimension("SURFACE_HEIGHT", var("SURFACE_HEIGHT"), defaults.height)?,
            background_color: match var("SURFACE_BACKGROUND") {
                Some(value) => value
                    .parse::<Color>()
                    .map_err(|_| ConfigError::Invalid { name: "SURFACE_BACKGROUND", value })?,
                None => defaults.background_color,
            },
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|origin| origin.trim().trim_end_matches('/').to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            backend_mode,
            table_name: var("TABLE_NAME").unwrap_or_else(|| "notedmark".to_string()),
            bucket_name: var("S3_BUCKET_NAME").unwrap_or_else(|| "images".to_string()),
            cognito,
            region: var("AWS_REGION"),
            public_base_url: var("STORAGE_PUBLIC_BASE_URL").map(|v| v.trim_end_matches('/').to_string()),
            allowed_origins,
            font_path: var("ANNOTATION_FONT_PATH").map(PathBuf::from),
            surface,
        })
    }
}

fn parse_dimension(name: &'static str, value: Option<String>, default: u32) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => match value.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}
