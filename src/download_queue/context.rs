use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::{CatalogStore, CatalogSync, FormatPreferences};
use crate::tools::{AudioFormat, ToolChain};

use super::folders::UserFolders;
use super::models::JobError;

/// Context provided to job executions.
///
/// Holds the shared collaborators plus the cancellation token of the job
/// currently running. The worker keeps a template instance and derives a
/// per-job copy with [`JobContext::for_job`].
#[derive(Clone)]
pub struct JobContext {
    /// Fires when the user cancels the job or the worker shuts down.
    pub cancellation_token: CancellationToken,

    /// Song lookups and playlist names.
    pub catalog_store: Arc<dyn CatalogStore>,

    /// Retrying writer for the downloaded/local flags.
    pub catalog_sync: CatalogSync,

    pub format_preferences: Arc<dyn FormatPreferences>,

    pub tools: ToolChain,

    pub folders: UserFolders,

    /// Format used when the user has no stored preference.
    pub default_format: AudioFormat,
}

impl JobContext {
    pub fn new(
        catalog_store: Arc<dyn CatalogStore>,
        catalog_sync: CatalogSync,
        format_preferences: Arc<dyn FormatPreferences>,
        tools: ToolChain,
        folders: UserFolders,
        default_format: AudioFormat,
    ) -> Self {
        Self {
            cancellation_token: CancellationToken::new(),
            catalog_store,
            catalog_sync,
            format_preferences,
            tools,
            folders,
            default_format,
        }
    }

    pub fn for_job(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Fails with a cancellation error once the job was cancelled.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            return Err(JobError::cancelled());
        }
        Ok(())
    }

    pub fn preferred_format(&self, user_id: &str) -> Result<AudioFormat, JobError> {
        Ok(self
            .format_preferences
            .get_user_preferred_format(user_id)?
            .unwrap_or(self.default_format))
    }
}
