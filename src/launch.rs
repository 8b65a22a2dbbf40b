//! Execution-mode selection and distributed launch plumbing.
//!
//! A run is either single-device or multi-process. The decision itself is a
//! pure function of a [`LaunchEnv`] value; reading the ambient process
//! environment is confined to [`LaunchEnv::from_env`], so callers can pass an
//! explicit mode and skip environment sniffing entirely.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{InferError, Result};

/// Environment variable holding the world size under a distributed launcher.
pub const WORLD_SIZE_ENV: &str = "WORLD_SIZE";
/// Environment variable holding the global rank under a distributed launcher.
pub const RANK_ENV: &str = "RANK";
/// Environment variable holding the local rank under a distributed launcher.
pub const LOCAL_RANK_ENV: &str = "LOCAL_RANK";
/// Shells record the invoking executable here; a distributed launcher leaves
/// its own path behind.
pub const LAUNCHER_ENV: &str = "_";

/// Substring identifying the multi-process launcher in [`LAUNCHER_ENV`].
const LAUNCHER_MARKER: &str = "mpirun";
/// World sizes above this imply a multi-node run even without a launcher
/// marker.
const MULTI_NODE_WORLD_SIZE: usize = 8;

/// How this process participates in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ExecutionMode {
    /// One process, one device.
    SingleDevice,
    /// One of several cooperating processes sharding the model.
    MultiProcess,
}

/// Snapshot of the launch-relevant process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchEnv {
    /// Contents of [`LAUNCHER_ENV`], if set.
    pub launcher: Option<String>,
    /// Parsed [`WORLD_SIZE_ENV`], if set and numeric.
    pub world_size: Option<usize>,
    /// Parsed [`RANK_ENV`], if set and numeric.
    pub rank: Option<usize>,
    /// Parsed [`LOCAL_RANK_ENV`], if set and numeric.
    pub local_rank: Option<usize>,
}

impl LaunchEnv {
    /// Capture the launch environment of the current process.
    pub fn from_env() -> Self {
        Self {
            launcher: std::env::var(LAUNCHER_ENV).ok(),
            world_size: read_numeric(WORLD_SIZE_ENV),
            rank: read_numeric(RANK_ENV),
            local_rank: read_numeric(LOCAL_RANK_ENV),
        }
    }

    /// Decide the execution mode from this snapshot.
    ///
    /// Multi-process when the launcher marker is present or the world size
    /// exceeds the multi-node threshold. An incorrect decision surfaces later
    /// as a distributed initialization failure, not here.
    pub fn execution_mode(&self) -> ExecutionMode {
        let launched = self
            .launcher
            .as_deref()
            .map_or(false, |launcher| launcher.contains(LAUNCHER_MARKER));
        let multi_node = self.world_size.map_or(false, |n| n > MULTI_NODE_WORLD_SIZE);
        if launched || multi_node {
            ExecutionMode::MultiProcess
        } else {
            ExecutionMode::SingleDevice
        }
    }
}

fn read_numeric(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Set accelerator tuning variables that multi-process runs rely on, without
/// clobbering values the launcher already exported.
pub fn apply_tuning_defaults() {
    for (name, value) in [
        ("CUDA_DEVICE_MAX_CONNECTIONS", "1"),
        ("NCCL_ASYNC_ERROR_HANDLING", "1"),
    ] {
        if std::env::var_os(name).is_none() {
            std::env::set_var(name, value);
        }
    }
}

/// World/rank information for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistContext {
    /// Total number of cooperating processes.
    pub world_size: usize,
    /// Global rank of this process.
    pub rank: usize,
    /// Rank of this process on its node, used as the device ordinal.
    pub local_rank: usize,
}

impl DistContext {
    /// Whether this process should emit run-level status lines.
    pub fn is_main(&self) -> bool {
        self.rank == 0
    }
}

/// Initialize the process group for the requested mode.
///
/// Single-device runs get a trivial context. Multi-process runs need a
/// collective-communication backend that is not part of this build; asking for
/// one fails fast rather than hanging on a barrier later.
pub fn initialize(mode: ExecutionMode, local_rank_arg: i64) -> Result<DistContext> {
    match mode {
        ExecutionMode::SingleDevice => {
            info!("Single-device run.");
            Ok(DistContext {
                world_size: 1,
                rank: 0,
                local_rank: local_rank_arg.max(0) as usize,
            })
        }
        ExecutionMode::MultiProcess => Err(InferError::MissingDependency {
            message: "multi-process execution requires a collective-communication \
                      backend, which is not included in this build"
                .to_string(),
        }),
    }
}
