//! AWS-backed implementations of the NotedMark backends, configuration, and
//! the state handed to every request.

pub mod auth;
pub mod cognito;
pub mod config;
pub mod dynamo;
pub mod s3;

use ab_glyph::FontArc;
use annotations_block::auth_gate::AuthGate;
use annotations_block::session::SessionContext;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use notedmark_atoms::drawing;
use notedmark_atoms::media::{ImageFetcher, ImageTable, ObjectStore};
use notedmark_atoms::memory::{MemoryImageTable, MemoryObjectStore, MemorySessionProvider};
use notedmark_atoms::users::SessionProvider;
use notedmark_atoms::AppError;
use std::sync::Arc;

pub use config::{BackendMode, Config, ConfigError};

/// The service's own message when it sent one, else the SDK's description.
pub(crate) fn backend_error<E>(err: E) -> AppError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let message = err.message().map(str::to_string);
    match message {
        Some(message) if !message.trim().is_empty() => AppError::Backend(message),
        _ => AppError::backend(err),
    }
}

/// Everything a request needs, built once per cold start.
pub struct AppState {
    pub config: Config,
    pub table: Arc<dyn ImageTable>,
    pub store: Arc<dyn ObjectStore>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub gate: AuthGate,
    pub font: FontArc,
}

impl AppState {
    pub async fn from_config(config: Config) -> Result<Self, ConfigError> {
        match config.backend_mode {
            BackendMode::Aws => Self::aws(config).await,
            BackendMode::Memory => Self::in_memory(config),
        }
    }

    async fn aws(config: Config) -> Result<Self, ConfigError> {
        let cognito = config
            .cognito
            .clone()
            .ok_or(ConfigError::Missing("COGNITO_CLIENT_ID"))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .ok_or(ConfigError::Missing("AWS_REGION"))?;
        let public_base_url = config
            .public_base_url
            .clone()
            .unwrap_or_else(|| s3::default_public_base_url(&region));

        let table = Arc::new(dynamo::DynamoImageTable::new(
            aws_sdk_dynamodb::Client::new(&sdk_config),
            config.table_name.clone(),
        ));
        let store = Arc::new(s3::S3ObjectStore::new(
            aws_sdk_s3::Client::new(&sdk_config),
            config.bucket_name.clone(),
            public_base_url,
        ));
        let sessions = Arc::new(cognito::CognitoSessionProvider::new(
            aws_sdk_cognitoidentityprovider::Client::new(&sdk_config),
            cognito.client_id,
            cognito.client_secret,
        ));

        tracing::info!(
            "AWS backends ready: region={}, table={}, bucket={}",
            region,
            config.table_name,
            config.bucket_name
        );
        let font = load_font(&config)?;
        Ok(Self {
            table,
            store: store.clone(),
            fetcher: store,
            gate: AuthGate::new(sessions),
            font,
            config,
        })
    }

    /// In-process backends; nothing leaves the process.
    pub fn in_memory(config: Config) -> Result<Self, ConfigError> {
        let store = Arc::new(match &config.public_base_url {
            Some(base) => MemoryObjectStore::new(base),
            None => MemoryObjectStore::default(),
        });
        let sessions: Arc<dyn SessionProvider> = Arc::new(MemorySessionProvider::new());

        tracing::warn!("Running with in-memory backends; data is lost on restart");
        let font = load_font(&config)?;
        Ok(Self {
            table: Arc::new(MemoryImageTable::new()),
            store: store.clone(),
            fetcher: store,
            gate: AuthGate::new(sessions),
            font,
            config,
        })
    }

    pub fn session_context(&self) -> SessionContext<'_> {
        SessionContext {
            table: self.table.as_ref(),
            store: self.store.as_ref(),
            fetcher: self.fetcher.as_ref(),
            config: &self.config.surface,
            font: Some(&self.font),
        }
    }
}

/// The configured font file, else the bundled one.
fn load_font(config: &Config) -> Result<FontArc, ConfigError> {
    let font = match &config.font_path {
        Some(path) => drawing::load_font(path),
        None => {
            tracing::info!("ANNOTATION_FONT_PATH not set; using the bundled font");
            drawing::bundled_font()
        }
    };
    font.map_err(|e| ConfigError::Font(e.to_string()))
}
