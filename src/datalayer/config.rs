use serde::{Deserialize, Serialize};

use crate::error::{LyraError, Result};

/// When listeners run after a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refresh {
    /// Run affected listeners before the write returns.
    #[default]
    Sync,
    /// Do not run listeners. Use [`Datalayer::refresh`](crate::datalayer::Datalayer::refresh)
    /// after a bulk load.
    Skip,
    /// Run affected listeners on the refresh pool and return a handle.
    Background,
}

/// Configuration for a [`Datalayer`](crate::datalayer::Datalayer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatalayerConfig {
    /// Threads in the pool running listener transformations.
    pub refresh_workers: usize,
    /// Documents transformed and written back per listener batch.
    pub listener_batch_size: usize,
    /// Top-level field under which listener outputs are stored.
    pub outputs_field: String,
    /// Refresh mode used by [`Datalayer::execute`](crate::datalayer::Datalayer::execute).
    pub default_refresh: Refresh,
}

impl Default for DatalayerConfig {
    fn default() -> Self {
        Self {
            refresh_workers: num_cpus::get(),
            listener_batch_size: 256,
            outputs_field: "_outputs".to_string(),
            default_refresh: Refresh::Sync,
        }
    }
}

impl DatalayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> DatalayerConfigBuilder {
        DatalayerConfigBuilder::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_workers == 0 {
            return Err(LyraError::invalid_config("refresh_workers must be at least 1"));
        }
        if self.listener_batch_size == 0 {
            return Err(LyraError::invalid_config(
                "listener_batch_size must be at least 1",
            ));
        }
        if self.outputs_field.is_empty() || self.outputs_field.contains('.') {
            return Err(LyraError::invalid_config(format!(
                "outputs_field must be a non-empty top-level name, got '{}'",
                self.outputs_field
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DatalayerConfigBuilder {
    config: DatalayerConfig,
}

impl DatalayerConfigBuilder {
    pub fn refresh_workers(mut self, workers: usize) -> Self {
        self.config.refresh_workers = workers;
        self
    }

    pub fn listener_batch_size(mut self, size: usize) -> Self {
        self.config.listener_batch_size = size;
        self
    }

    pub fn outputs_field(mut self, field: impl Into<String>) -> Self {
        self.config.outputs_field = field.into();
        self
    }

    pub fn default_refresh(mut self, refresh: Refresh) -> Self {
        self.config.default_refresh = refresh;
        self
    }

    pub fn build(self) -> Result<DatalayerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
