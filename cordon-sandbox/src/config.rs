//! Sandbox policy and engine configuration

use crate::error::{Result, SandboxError};
use crate::limits::parse_memory;
use crate::runtime::{docker::DockerOptions, gvisor::GvisorOptions, nsjail::NsjailOptions, Backend};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the engine config file
pub const CONFIG_ENV: &str = "CORDON_CONFIG";

/// Network access granted to the sandboxed process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    None,
    Host,
    Restricted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub mode: NetworkMode,

    /// Hosts reachable in `restricted` mode
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// Default working directory inside the sandbox
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Extra host paths exposed to the sandbox
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            read_only: true,
            work_dir: None,
            allowed_paths: Vec::new(),
        }
    }
}

/// Immutable policy for one sandbox instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Memory limit such as `"256Mi"` (None = backend default)
    #[serde(default = "default_memory")]
    pub memory: Option<String>,

    /// Fractional core count (None = backend default)
    #[serde(default = "default_cpus")]
    pub cpus: Option<f64>,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Cap applied to stdout and stderr independently
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub filesystem: FilesystemConfig,

    #[serde(default)]
    pub user: Option<String>,

    /// Linux capabilities to retain, with or without the `CAP_` prefix
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_memory() -> Option<String> {
    Some("256Mi".to_string())
}

fn default_cpus() -> Option<f64> {
    Some(1.0)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
            timeout: default_timeout(),
            max_output_bytes: default_max_output_bytes(),
            network: NetworkConfig::default(),
            filesystem: FilesystemConfig::default(),
            user: None,
            capabilities: Vec::new(),
        }
    }
}

impl SandboxConfig {
    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    pub fn with_cpus(mut self, cpus: f64) -> Self {
        self.cpus = Some(cpus);
        self
    }

    /// Drop memory and CPU limits, leaving backend defaults
    pub fn without_resource_limits(mut self) -> Self {
        self.memory = None;
        self.cpus = None;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_network(mut self, mode: NetworkMode) -> Self {
        self.network.mode = mode;
        self
    }

    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.network.allowed_hosts.push(host.into());
        self
    }

    pub fn writable(mut self) -> Self {
        self.filesystem.read_only = false;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.filesystem.work_dir = Some(dir.into());
        self
    }

    pub fn allow_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.filesystem.allowed_paths.push(path.into());
        self
    }

    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_capability(mut self, cap: impl Into<String>) -> Self {
        self.capabilities.push(cap.into());
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Parsed memory limit in bytes
    pub fn memory_bytes(&self) -> Result<Option<u64>> {
        self.memory.as_deref().map(parse_memory).transpose()
    }

    /// Capability names normalized to `CAP_<NAME>`
    pub fn capability_names(&self) -> Vec<String> {
        self.capabilities
            .iter()
            .map(|cap| {
                let upper = cap.trim().to_ascii_uppercase();
                if upper.starts_with("CAP_") {
                    upper
                } else {
                    format!("CAP_{}", upper)
                }
            })
            .collect()
    }

    /// Reject configs no backend could honor.
    pub fn validate(&self) -> Result<()> {
        // Docker reads a zero memory limit as unlimited
        if self.memory_bytes()? == Some(0) {
            return Err(SandboxError::InvalidConfig(format!(
                "memory limit must be greater than zero, got {:?}",
                self.memory.as_deref().unwrap_or_default()
            )));
        }

        if let Some(cpus) = self.cpus {
            if !cpus.is_finite() || cpus <= 0.0 {
                return Err(SandboxError::InvalidConfig(format!(
                    "cpus must be a positive number, got {}",
                    cpus
                )));
            }
        }

        if self.timeout.is_zero() {
            return Err(SandboxError::InvalidConfig(
                "timeout must be greater than zero".to_string(),
            ));
        }

        if self.max_output_bytes == 0 {
            return Err(SandboxError::InvalidConfig(
                "max_output_bytes must be greater than zero".to_string(),
            ));
        }

        if !self.network.allowed_hosts.is_empty() && self.network.mode != NetworkMode::Restricted {
            return Err(SandboxError::InvalidConfig(
                "allowed_hosts requires network mode 'restricted'".to_string(),
            ));
        }

        if let Some(dir) = &self.filesystem.work_dir {
            if !dir.is_absolute() {
                return Err(SandboxError::InvalidConfig(format!(
                    "work_dir must be absolute: {}",
                    dir.display()
                )));
            }
        }

        if let Some(path) = self.filesystem.allowed_paths.iter().find(|p| !p.is_absolute()) {
            return Err(SandboxError::InvalidConfig(format!(
                "allowed path must be absolute: {}",
                path.display()
            )));
        }

        for cap in self.capability_names() {
            let valid = cap.len() > 4
                && cap.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_');
            if !valid {
                return Err(SandboxError::InvalidConfig(format!(
                    "invalid capability name '{}'",
                    cap
                )));
            }
        }

        Ok(())
    }
}

/// Engine-wide settings, usually read from a TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bound on each availability probe
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Preferred backend (None = strongest available)
    #[serde(default)]
    pub backend: Option<Backend>,

    /// Permit the unsandboxed process driver
    #[serde(default)]
    pub allow_unsandboxed: bool,

    #[serde(default)]
    pub gvisor: GvisorOptions,

    #[serde(default)]
    pub nsjail: NsjailOptions,

    #[serde(default)]
    pub docker: DockerOptions,

    #[serde(default)]
    pub default_profile: Option<String>,

    #[serde(default)]
    pub profiles: BTreeMap<String, SandboxConfig>,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_timeout: default_probe_timeout(),
            backend: None,
            allow_unsandboxed: false,
            gvisor: GvisorOptions::default(),
            nsjail: NsjailOptions::default(),
            docker: DockerOptions::default(),
            default_profile: None,
            profiles: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`, else `$CORDON_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        };

        let Some(path) = path else {
            tracing::debug!("No engine config given, using defaults");
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(&path).map_err(|e| SandboxError::ConfigFile {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let config = Self::from_toml_str(&content).map_err(|e| match e {
            SandboxError::ConfigFile { message, .. } => SandboxError::ConfigFile {
                path: path.clone(),
                message,
            },
            other => other,
        })?;

        tracing::info!(path = %path.display(), profiles = config.profiles.len(), "Loaded engine config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| SandboxError::ConfigFile {
                path: PathBuf::new(),
                message: e.to_string(),
            })?;

        for (name, profile) in &config.profiles {
            profile.validate().map_err(|e| {
                SandboxError::InvalidConfig(format!("profile '{}': {}", name, e))
            })?;
        }

        if let Some(name) = &config.default_profile {
            if !config.profiles.contains_key(name) {
                return Err(SandboxError::InvalidConfig(format!(
                    "default_profile '{}' is not defined",
                    name
                )));
            }
        }

        Ok(config)
    }

    /// Resolve a named profile, falling back to the default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<SandboxConfig> {
        match name.or(self.default_profile.as_deref()) {
            Some(name) => self.profiles.get(name).cloned().ok_or_else(|| {
                SandboxError::InvalidConfig(format!("unknown profile '{}'", name))
            }),
            None => Ok(SandboxConfig::default()),
        }
    }
}
