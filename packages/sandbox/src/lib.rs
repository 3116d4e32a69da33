// ABOUTME: Sandbox infrastructure for running coding agents in an isolated container
// ABOUTME: Docker runtime, network topology, egress proxy, credential bridge and stack lifecycle

pub mod credentials;
pub mod docker;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod network;
pub mod proxy;
pub mod runtime;
pub mod stack;

pub use credentials::{agent_config_dir, CredentialBridge};
pub use docker::DockerRuntime;
pub use error::{Result, SandboxError};
pub use network::{ensure_network, ensure_topology};
pub use proxy::{ensure_proxy, normalize_domains, render_proxy_config};
pub use runtime::{
    BindMount, ContainerSpec, ContainerState, ExecResult, ExecSpec, ExecStream, OutputChunk,
    SandboxRuntime, StreamType, VolumeMount,
};
pub use stack::{SandboxHealth, SandboxStack};
