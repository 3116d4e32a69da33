// ABOUTME: Strongly typed configuration for the Codebox sandbox subsystem
// ABOUTME: Defaults, environment loading and one-shot validation of every recognized option

pub mod constants;

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use codebox_core::{codebox_dir, database_file, PathTranslator};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::constants::*;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How the agent CLI authenticates inside the sandbox
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CredentialMode {
    /// Passed to the agent as `ANTHROPIC_API_KEY`; no credential files are copied
    ApiKey { key: String },
    /// Refreshable OAuth credentials file on the host, copied into the container
    #[serde(rename = "oauth")]
    OAuth { credentials_path: PathBuf },
}

impl CredentialMode {
    pub fn is_api_key(&self) -> bool {
        matches!(self, CredentialMode::ApiKey { .. })
    }
}

impl fmt::Debug for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialMode::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("key", &"<redacted>")
                .finish(),
            CredentialMode::OAuth { credentials_path } => f
                .debug_struct("OAuth")
                .field("credentials_path", credentials_path)
                .finish(),
        }
    }
}

impl Default for CredentialMode {
    fn default() -> Self {
        CredentialMode::OAuth {
            credentials_path: default_credentials_path(),
        }
    }
}

fn default_credentials_path() -> PathBuf {
    let home = env::var(HOME).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));
    home.join(".claude").join(".credentials.json")
}

/// Sandbox container image, identity and resource caps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub image: String,
    pub dockerfile: PathBuf,
    pub build_context: PathBuf,
    pub container_name: String,
    /// Named volume mounted at `<home_dir>/.claude`
    pub config_volume: String,
    pub home_dir: String,
    pub uid: u32,
    pub gid: u32,
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: i64,
    pub tmp_size_mb: u64,
    pub home_size_mb: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "codebox-sandbox:latest".to_string(),
            dockerfile: PathBuf::from("docker/sandbox/Dockerfile"),
            build_context: PathBuf::from("docker/sandbox"),
            container_name: "codebox-sandbox".to_string(),
            config_volume: "codebox-agent-config".to_string(),
            home_dir: "/home/agent".to_string(),
            uid: 1000,
            gid: 1000,
            memory_mb: 4096,
            cpus: 2.0,
            pids_limit: 512,
            tmp_size_mb: 1024,
            home_size_mb: 512,
        }
    }
}

impl SandboxConfig {
    pub fn user(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// No route to the internet; the sandbox lives here
    pub internal: String,
    /// Internet-facing; only the proxy joins it
    pub external: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            internal: "codebox-internal".to_string(),
            external: "codebox-external".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub image: String,
    pub container_name: String,
    pub port: u16,
    /// Host directory holding the generated squid.conf
    pub config_dir: PathBuf,
    /// Allowed destination domains. A leading `.` also matches subdomains.
    pub allowed_domains: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            image: "ubuntu/squid:latest".to_string(),
            container_name: "codebox-proxy".to_string(),
            port: 3128,
            config_dir: codebox_dir().join("proxy"),
            allowed_domains: [
                ".anthropic.com",
                ".claude.ai",
                ".github.com",
                ".githubusercontent.com",
                "registry.npmjs.org",
                "pypi.org",
                "files.pythonhosted.org",
                "crates.io",
                "static.crates.io",
                "index.crates.io",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
        }
    }
}

impl ProxyConfig {
    /// `http://<container>:<port>` as seen from the internal network
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.container_name, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_concurrent_tasks: usize,
    /// Per user, soft-deleted projects excluded
    pub max_projects: usize,
    pub timeout_minutes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            max_projects: 10,
            timeout_minutes: 30,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub cli_path: String,
    pub model: String,
    pub allowed_tools: Vec<String>,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,
    pub git_token: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            model: "sonnet".to_string(),
            allowed_tools: ["Bash", "Read", "Write", "Edit", "Glob", "Grep", "WebFetch"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            git_user_name: None,
            git_user_email: None,
            git_token: None,
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("cli_path", &self.cli_path)
            .field("model", &self.model)
            .field("allowed_tools", &self.allowed_tools)
            .field("git_user_name", &self.git_user_name)
            .field("git_user_email", &self.git_user_email)
            .field("git_token", &self.git_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Project directories as this process sees them
    pub local_root: PathBuf,
    /// Same directory as the Docker daemon sees it. Defaults to `local_root`.
    pub mount_root: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            local_root: codebox_dir().join("workspace"),
            mount_root: None,
        }
    }
}

impl WorkspaceConfig {
    pub fn translator(&self) -> PathTranslator {
        match &self.mount_root {
            Some(mount_root) => PathTranslator::new(self.local_root.clone(), mount_root.clone()),
            None => PathTranslator::identity(self.local_root.clone()),
        }
    }
}

/// Every option the sandbox subsystem recognizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeboxConfig {
    pub sandbox: SandboxConfig,
    pub network: NetworkConfig,
    pub proxy: ProxyConfig,
    pub limits: LimitsConfig,
    pub agent: AgentConfig,
    pub credentials: CredentialMode,
    pub workspace: WorkspaceConfig,
    pub database_path: PathBuf,
}

impl Default for CodeboxConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            network: NetworkConfig::default(),
            proxy: ProxyConfig::default(),
            limits: LimitsConfig::default(),
            agent: AgentConfig::default(),
            credentials: CredentialMode::default(),
            workspace: WorkspaceConfig::default(),
            database_path: database_file(),
        }
    }
}

impl CodeboxConfig {
    /// Builds a configuration from `CODEBOX_*` environment variables on top of
    /// the defaults, then validates it.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = env_var(CODEBOX_DATABASE_PATH) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(path) = env_var(CODEBOX_WORKSPACE_DIR) {
            config.workspace.local_root = PathBuf::from(path);
        }
        config.workspace.mount_root = env_var(CODEBOX_WORKSPACE_MOUNT_DIR).map(PathBuf::from);

        let sandbox = &mut config.sandbox;
        if let Some(image) = env_var(CODEBOX_SANDBOX_IMAGE) {
            sandbox.image = image;
        }
        if let Some(path) = env_var(CODEBOX_SANDBOX_DOCKERFILE) {
            sandbox.dockerfile = PathBuf::from(path);
        }
        if let Some(path) = env_var(CODEBOX_SANDBOX_BUILD_CONTEXT) {
            sandbox.build_context = PathBuf::from(path);
        }
        if let Some(name) = env_var(CODEBOX_SANDBOX_CONTAINER) {
            sandbox.container_name = name;
        }
        sandbox.memory_mb = env_parse(CODEBOX_SANDBOX_MEMORY_MB, sandbox.memory_mb)?;
        sandbox.cpus = env_parse(CODEBOX_SANDBOX_CPUS, sandbox.cpus)?;
        sandbox.pids_limit = env_parse(CODEBOX_SANDBOX_PIDS_LIMIT, sandbox.pids_limit)?;
        sandbox.tmp_size_mb = env_parse(CODEBOX_SANDBOX_TMP_SIZE_MB, sandbox.tmp_size_mb)?;
        sandbox.home_size_mb = env_parse(CODEBOX_SANDBOX_HOME_SIZE_MB, sandbox.home_size_mb)?;

        if let Some(name) = env_var(CODEBOX_INTERNAL_NETWORK) {
            config.network.internal = name;
        }
        if let Some(name) = env_var(CODEBOX_EXTERNAL_NETWORK) {
            config.network.external = name;
        }

        let proxy = &mut config.proxy;
        if let Some(image) = env_var(CODEBOX_PROXY_IMAGE) {
            proxy.image = image;
        }
        if let Some(name) = env_var(CODEBOX_PROXY_CONTAINER) {
            proxy.container_name = name;
        }
        proxy.port = env_parse(CODEBOX_PROXY_PORT, proxy.port)?;
        if let Some(dir) = env_var(CODEBOX_PROXY_CONFIG_DIR) {
            proxy.config_dir = PathBuf::from(dir);
        }
        if let Some(domains) = env_var(CODEBOX_ALLOWED_DOMAINS) {
            proxy.allowed_domains = split_list(&domains);
        }

        let limits = &mut config.limits;
        limits.max_concurrent_tasks =
            env_parse(CODEBOX_MAX_CONCURRENT_TASKS, limits.max_concurrent_tasks)?;
        limits.max_projects = env_parse(CODEBOX_MAX_PROJECTS, limits.max_projects)?;
        limits.timeout_minutes = env_parse(CODEBOX_TIMEOUT_MINUTES, limits.timeout_minutes)?;

        let agent = &mut config.agent;
        if let Some(cli) = env_var(CODEBOX_AGENT_CLI) {
            agent.cli_path = cli;
        }
        if let Some(model) = env_var(CODEBOX_AGENT_MODEL) {
            agent.model = model;
        }
        if let Some(tools) = env_var(CODEBOX_AGENT_ALLOWED_TOOLS) {
            agent.allowed_tools = split_list(&tools);
        }
        agent.git_user_name = env_var(CODEBOX_GIT_USER_NAME);
        agent.git_user_email = env_var(CODEBOX_GIT_USER_EMAIL);
        agent.git_token = env_var(CODEBOX_GIT_TOKEN);

        // An API key wins over the OAuth file when both are present
        config.credentials = match env_var(ANTHROPIC_API_KEY) {
            Some(key) => CredentialMode::ApiKey { key },
            None => CredentialMode::OAuth {
                credentials_path: env_var(CODEBOX_CREDENTIALS_PATH)
                    .map(PathBuf::from)
                    .unwrap_or_else(default_credentials_path),
            },
        };

        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Rejects configurations the subsystem cannot run with
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.max_concurrent_tasks == 0 {
            return Err(invalid("limits.max_concurrent_tasks must be at least 1"));
        }
        if limits.max_projects == 0 {
            return Err(invalid("limits.max_projects must be at least 1"));
        }
        if limits.timeout_minutes == 0 {
            return Err(invalid("limits.timeout_minutes must be at least 1"));
        }

        let sandbox = &self.sandbox;
        if sandbox.memory_mb == 0 {
            return Err(invalid("sandbox.memory_mb must be greater than 0"));
        }
        if !sandbox.cpus.is_finite() || sandbox.cpus <= 0.0 {
            return Err(invalid("sandbox.cpus must be a positive number"));
        }
        if sandbox.pids_limit <= 0 {
            return Err(invalid("sandbox.pids_limit must be greater than 0"));
        }
        if sandbox.tmp_size_mb == 0 || sandbox.home_size_mb == 0 {
            return Err(invalid("tmpfs sizes must be greater than 0"));
        }
        if !sandbox.home_dir.starts_with('/') {
            return Err(invalid("sandbox.home_dir must be an absolute path"));
        }

        for (field, value) in [
            ("sandbox.image", &sandbox.image),
            ("sandbox.container_name", &sandbox.container_name),
            ("sandbox.config_volume", &sandbox.config_volume),
            ("network.internal", &self.network.internal),
            ("network.external", &self.network.external),
            ("proxy.image", &self.proxy.image),
            ("proxy.container_name", &self.proxy.container_name),
            ("agent.cli_path", &self.agent.cli_path),
            ("agent.model", &self.agent.model),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(&format!("{} must not be empty", field)));
            }
        }

        if self.network.internal == self.network.external {
            return Err(invalid("internal and external networks must have different names"));
        }
        if sandbox.container_name == self.proxy.container_name {
            return Err(invalid("sandbox and proxy containers must have different names"));
        }
        if self.proxy.port == 0 {
            return Err(invalid("proxy.port must be between 1 and 65535"));
        }

        if self.proxy.allowed_domains.is_empty() {
            return Err(invalid("proxy.allowed_domains must list at least one domain"));
        }
        if let Some(bad) = self
            .proxy
            .allowed_domains
            .iter()
            .find(|d| !is_valid_domain(d))
        {
            return Err(invalid(&format!("malformed allowed domain: {:?}", bad)));
        }

        if let CredentialMode::ApiKey { key } = &self.credentials {
            if key.trim().is_empty() {
                return Err(invalid("API key must not be empty"));
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

/// Non-empty value of an environment variable
fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env_var(name) {
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            var: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Hostname with an optional leading `.` for subdomain matching
pub fn is_valid_domain(domain: &str) -> bool {
    let host = domain.strip_prefix('.').unwrap_or(domain);
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = CodeboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.max_concurrent_tasks, 3);
        assert_eq!(config.limits.timeout_minutes, 30);
        assert_eq!(config.sandbox.user(), "1000:1000");
        assert_eq!(config.proxy.url(), "http://codebox-proxy:3128");
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = CodeboxConfig::default();
        config.limits.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());

        let mut config = CodeboxConfig::default();
        config.limits.max_projects = 0;
        assert!(config.validate().is_err());

        let mut config = CodeboxConfig::default();
        config.limits.timeout_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resource_caps_rejected() {
        let mut config = CodeboxConfig::default();
        config.sandbox.cpus = 0.0;
        assert!(config.validate().is_err());

        let mut config = CodeboxConfig::default();
        config.sandbox.cpus = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = CodeboxConfig::default();
        config.sandbox.pids_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_names_must_differ() {
        let mut config = CodeboxConfig::default();
        config.network.external = config.network.internal.clone();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("different names"));
    }

    #[test]
    fn test_allow_list_validation() {
        let mut config = CodeboxConfig::default();
        config.proxy.allowed_domains.clear();
        assert!(config.validate().is_err());

        config.proxy.allowed_domains = vec!["example.com/path".to_string()];
        assert!(config.validate().is_err());

        config.proxy.allowed_domains = vec![".example.com".to_string(), "api.x.io".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_domain_syntax() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain(".example.com"));
        assert!(is_valid_domain("registry.npmjs.org"));
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain("."));
        assert!(!is_valid_domain("a..b"));
        assert!(!is_valid_domain("-a.com"));
        assert!(!is_valid_domain("exa mple.com"));
        assert!(!is_valid_domain("example.com:443"));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let config = CodeboxConfig {
            credentials: CredentialMode::ApiKey { key: "  ".to_string() },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let mut config = CodeboxConfig {
            credentials: CredentialMode::ApiKey {
                key: "sk-ant-secret".to_string(),
            },
            ..Default::default()
        };
        config.agent.git_token = Some("ghp_secret".to_string());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-ant-secret"));
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CodeboxConfig = serde_json::from_str(
            r#"{
                "limits": { "max_concurrent_tasks": 5 },
                "credentials": { "mode": "api_key", "key": "k" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.limits.max_concurrent_tasks, 5);
        assert_eq!(config.limits.max_projects, 10);
        assert!(config.credentials.is_api_key());
        assert_eq!(config.sandbox.image, "codebox-sandbox:latest");
    }

    #[test]
    fn test_oauth_mode_deserializes() {
        let mode: CredentialMode =
            serde_json::from_str(r#"{ "mode": "oauth", "credentials_path": "/tmp/c.json" }"#)
                .unwrap();
        assert_eq!(
            mode,
            CredentialMode::OAuth {
                credentials_path: PathBuf::from("/tmp/c.json")
            }
        );
    }

    #[test]
    fn test_workspace_translator() {
        let ws = WorkspaceConfig {
            local_root: PathBuf::from("/data/ws"),
            mount_root: Some(PathBuf::from("/host/ws")),
        };
        let t = ws.translator();
        assert_eq!(
            t.to_mount_path(std::path::Path::new("/data/ws/demo")),
            PathBuf::from("/host/ws/demo")
        );

        let ws = WorkspaceConfig {
            local_root: PathBuf::from("/data/ws"),
            mount_root: None,
        };
        assert_eq!(ws.translator().mount_root(), std::path::Path::new("/data/ws"));
    }

    #[test]
    fn test_split_list_trims_and_drops_empties() {
        assert_eq!(
            split_list(" a.com, ,b.org ,"),
            vec!["a.com".to_string(), "b.org".to_string()]
        );
    }
}
