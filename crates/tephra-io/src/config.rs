//! Output configuration and the runtime environment switches.
//!
//! The environment is read exactly once, into an [`OutputConfig`] that is
//! then passed explicitly to the writer and the fusion coordinator.

use std::path::PathBuf;

use crate::error::OutputConfigError;

/// Enables partitioned (subfiled) output.
pub const ENV_SUBFILING: &str = "TEPHRA_SUBFILING";
/// Stripe alignment in bytes for subfile payloads.
pub const ENV_STRIPE_SIZE: &str = "TEPHRA_SUBFILING_STRIPE_SIZE";
/// Enables background subfile fusion.
pub const ENV_FUSE: &str = "TEPHRA_FUSE";
/// Selects per-node fusion instead of one job-wide fuser.
pub const ENV_FUSE_LOCAL: &str = "TEPHRA_FUSE_LOCAL";
/// Directory the subfiling config files are written to.
pub const ENV_CONFIG_DIR: &str = "TEPHRA_SUBFILING_CONFIG_DIR";
/// Path of the fuse utility.
pub const ENV_FUSE_PROGRAM: &str = "TEPHRA_FUSE_PROGRAM";

/// Which ranks launch fusers, and what they merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FusionTopology {
    /// World rank 0 launches one fuser over every subfile (`-g`).
    Global,
    /// Each node leader launches one fuser over its node's subfiles (`-n`).
    NodeLocal,
}

impl FusionTopology {
    /// Mode flag passed to the fuse utility.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Global => "-g",
            Self::NodeLocal => "-n",
        }
    }
}

/// Where and how particle output is written.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputConfig {
    /// Directory artifacts and subfiles are written to. Default: `.`.
    pub dir: PathBuf,
    /// Artifact base name. Default: `particles`.
    pub base_name: String,
    /// Partition binary output into one subfile per node.
    pub partitioned: bool,
    /// Stripe alignment for subfile payloads, in bytes.
    pub stripe_size: Option<u64>,
    /// Background fusion topology; `None` disables fusion.
    pub fusion: Option<FusionTopology>,
    /// Directory for subfiling config files. Default: `.`.
    pub config_dir: PathBuf,
    /// Fuse utility. Default: `./tephra-fuse`.
    pub fuse_program: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            base_name: "particles".to_string(),
            partitioned: false,
            stripe_size: None,
            fusion: None,
            config_dir: PathBuf::from("."),
            fuse_program: PathBuf::from("./tephra-fuse"),
        }
    }
}

impl OutputConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, OutputConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    ///
    /// Switches are presence flags: a set variable enables the feature
    /// whatever its value.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, OutputConfigError> {
        let mut config = Self {
            partitioned: lookup(ENV_SUBFILING).is_some(),
            ..Self::default()
        };
        if let Some(raw) = lookup(ENV_STRIPE_SIZE) {
            let size = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|&s| s > 0)
                .ok_or(OutputConfigError::InvalidStripeSize { value: raw })?;
            config.stripe_size = Some(size);
        }
        if lookup(ENV_FUSE).is_some() {
            config.fusion = Some(if lookup(ENV_FUSE_LOCAL).is_some() {
                FusionTopology::NodeLocal
            } else {
                FusionTopology::Global
            });
        }
        if let Some(dir) = lookup(ENV_CONFIG_DIR) {
            config.config_dir = PathBuf::from(dir);
        }
        if let Some(program) = lookup(ENV_FUSE_PROGRAM) {
            config.fuse_program = PathBuf::from(program);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the writer cannot use.
    pub fn validate(&self) -> Result<(), OutputConfigError> {
        if self.base_name.is_empty() || self.base_name.contains(['/', '\\']) {
            return Err(OutputConfigError::InvalidBaseName {
                name: self.base_name.clone(),
            });
        }
        if self.stripe_size == Some(0) {
            return Err(OutputConfigError::InvalidStripeSize {
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Fusion runs only over partitioned output.
    pub fn fusion_active(&self) -> bool {
        self.partitioned && self.fusion.is_some()
    }
}
