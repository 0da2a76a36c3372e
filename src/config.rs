use serde::{Deserialize, Serialize};

use crate::error::CrunchError;

pub const MEMORY_URI: &str = ":memory:";

/// Options for opening a connection.
///
/// Arrives as the options argument of an `open` command, so every field has
/// a default and an empty JSON object means an in-memory database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Database file or URI. `None` opens `:memory:`.
    pub path: Option<String>,
    /// Serialized database bytes, staged to a scratch file and opened from
    /// there. Mutually exclusive with `path`.
    pub image: Option<Vec<u8>>,
    pub read_only: bool,
}

impl OpenOptions {
    #[must_use]
    pub fn memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn image(bytes: Vec<u8>) -> Self {
        Self {
            image: Some(bytes),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn builder() -> OpenOptionsBuilder {
        OpenOptionsBuilder::default()
    }

    /// # Errors
    /// Returns `CrunchError::ConfigError` if both `path` and `image` are set.
    pub fn validate(&self) -> Result<(), CrunchError> {
        if self.path.is_some() && self.image.is_some() {
            return Err(CrunchError::ConfigError(
                "`path` and `image` cannot both be set".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`OpenOptions`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptionsBuilder {
    opts: OpenOptions,
}

impl OpenOptionsBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.opts.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn image(mut self, bytes: Vec<u8>) -> Self {
        self.opts.image = Some(bytes);
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.opts.read_only = read_only;
        self
    }

    /// # Errors
    /// Returns `CrunchError::ConfigError` if the combination is invalid.
    pub fn finish(self) -> Result<OpenOptions, CrunchError> {
        self.opts.validate()?;
        Ok(self.opts)
    }
}

/// Settings for the bridge worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub thread_name: String,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            thread_name: "crunch-worker".into(),
        }
    }
}
