use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Where and how the payload is staged before launch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagingConfig {
    /// Parent of the private working directory (system temp dir when unset)
    #[serde(default)]
    pub parent_dir: Option<PathBuf>,

    /// Prefix of the generated directory name
    #[serde(default = "default_staging_prefix")]
    pub prefix: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            parent_dir: None,
            prefix: default_staging_prefix(),
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct SupervisorConfig {
    /// Name used in log records for the supervised binary
    pub name: String,
    /// How long `stop()` waits after the graceful signal before killing
    #[builder(default = "default_grace_period()")]
    pub grace_period: Duration,
    #[builder(default)]
    pub staging: StagingConfig,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
}

impl SupervisorConfig {
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::default()
    }
}

impl SupervisorConfigBuilder {
    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// 500 ms, the window a cache server gets to flush and exit on its own
pub fn default_grace_period() -> Duration {
    Duration::from_millis(500)
}

fn default_staging_prefix() -> String {
    "cachevisor-".to_string()
}
