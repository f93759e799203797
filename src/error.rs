use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CatalogError {
    #[error("invalid workspace id: {0}")]
    InvalidWorkspaceId(String),

    #[error("invalid dataset id: {0}")]
    InvalidDatasetId(String),

    #[error("invalid report id: {0}")]
    InvalidReportId(String),

    #[error("missing config file pbi-catalog.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing credential: {0} (set it in pbi-catalog.json or the environment)")]
    MissingCredential(&'static str),

    #[error("token request failed: {0}")]
    AuthHttp(String),

    #[error("token endpoint returned status {status}: {message}")]
    AuthStatus { status: u16, message: String },

    #[error("Power BI API request failed: {0}")]
    ApiHttp(String),

    #[error("Power BI API returned status {status} for {endpoint}: {message}")]
    ApiStatus {
        status: u16,
        endpoint: String,
        message: String,
    },

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("dscmd invocation failed for {workspace}/{dataset}: {message}")]
    DaxTool {
        workspace: String,
        dataset: String,
        message: String,
    },

    #[error("dscmd output is not valid JSON: {0}")]
    DaxOutputParse(String),

    #[error("schema mismatch in {entity}: missing required field `{field}`")]
    SchemaMismatch { entity: &'static str, field: String },

    #[error("query batch issued {expected} sub-queries but the tool returned {actual} result tables")]
    ResultTableCount { expected: usize, actual: usize },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
