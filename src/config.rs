use config::{Config as SettingsLoader, Environment};
use serde::Deserialize;
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobStorageBackend {
    Local,
    S3,
}

impl BlobStorageBackend {
    fn from_str(value: &str) -> Self {
        if value.eq_ignore_ascii_case("s3") {
            Self::S3
        } else {
            Self::Local
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3BlobStorageConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub prefix: String,
    pub force_path_style: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStorageConfig {
    pub backend: BlobStorageBackend,
    pub s3: Option<S3BlobStorageConfig>,
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        Self {
            backend: BlobStorageBackend::Local,
            s3: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    /// Raw API key -> username. Keys are digested before use; the raw values
    /// never leave config loading.
    pub api_keys: HashMap<String, String>,
    pub read_only: bool,
    pub require_secure_transport: bool,
    pub trust_proxy: bool,
    pub max_body_size: usize,
    pub lookup_timeout_ms: u64,
    pub stats_channel_capacity: usize,
    pub status_enabled: bool,
    pub tool_path: Option<PathBuf>,
    pub tool_cache_seconds: u64,
    /// Optional text file whose contents are served as the service alert.
    pub alert_path: Option<PathBuf>,
    pub log_level: String,
    pub blob_storage: BlobStorageConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawEnvConfig {
    config: Option<String>,
    bind: Option<String>,
    data_dir: Option<String>,
    api_keys: Option<String>,
    read_only: Option<String>,
    require_secure_transport: Option<String>,
    trust_proxy: Option<String>,
    max_body_size: Option<String>,
    lookup_timeout_ms: Option<String>,
    stats_channel_capacity: Option<String>,
    status_enabled: Option<String>,
    tool_path: Option<String>,
    tool_cache_seconds: Option<String>,
    alert_path: Option<String>,
    log_level: Option<String>,
    blob_backend: Option<String>,
    s3_bucket: Option<String>,
    s3_region: Option<String>,
    s3_endpoint: Option<String>,
    s3_access_key_id: Option<String>,
    s3_secret_access_key: Option<String>,
    s3_prefix: Option<String>,
    s3_force_path_style: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_cfg = load_pakhus_env()?;
        let mut cfg = Self::defaults();
        cfg.apply_env_config_file_if_present(&env_cfg)?;
        cfg.apply_env_overrides(&env_cfg);
        cfg.apply_port_override(load_process_env_value("port")?);
        Ok(cfg)
    }

    pub fn from_env_with_config_file(config_path: PathBuf) -> Result<Self, String> {
        let env_cfg = load_pakhus_env()?;
        let mut cfg = Self::defaults();
        cfg.apply_yaml_overrides(Self::from_yaml_file(config_path)?);
        cfg.apply_env_overrides(&env_cfg);
        cfg.apply_port_override(load_process_env_value("port")?);
        Ok(cfg)
    }

    /// Baseline configuration for tests and embedding callers.
    pub fn defaults_for_examples() -> Self {
        Self::defaults()
    }

    fn defaults() -> Self {
        let bind: SocketAddr = "127.0.0.1:5959".parse().expect("valid default bind");

        Self {
            bind,
            data_dir: PathBuf::from(".pakhus-data"),
            api_keys: HashMap::new(),
            read_only: false,
            // TLS termination normally happens in front of this server, so
            // the gate is opt-in and needs trust_proxy to see the scheme.
            require_secure_transport: false,
            trust_proxy: false,
            max_body_size: 50 * 1024 * 1024,
            lookup_timeout_ms: 5_000,
            stats_channel_capacity: 256,
            status_enabled: true,
            tool_path: None,
            tool_cache_seconds: 600,
            alert_path: None,
            log_level: "info".to_string(),
            blob_storage: BlobStorageConfig::default(),
        }
    }

    fn apply_env_config_file_if_present(&mut self, env_cfg: &RawEnvConfig) -> Result<(), String> {
        let Some(path) = env_cfg
            .config
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return Ok(());
        };
        let loaded = Self::from_yaml_file(PathBuf::from(path))
            .map_err(|err| format!("failed to load PAKHUS_CONFIG={path}: {err}"))?;
        self.apply_yaml_overrides(loaded);
        Ok(())
    }

    fn apply_env_overrides(&mut self, env_cfg: &RawEnvConfig) {
        if let Some(bind) = parse_env_value::<SocketAddr>(env_cfg.bind.as_deref()) {
            self.bind = bind;
        }
        if let Some(raw_data_dir) = env_cfg.data_dir.as_deref() {
            self.data_dir = PathBuf::from(raw_data_dir);
        }
        if let Some(raw_keys) = env_cfg.api_keys.as_deref() {
            self.api_keys = parse_api_keys(raw_keys);
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.read_only.as_deref()) {
            self.read_only = parsed;
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.require_secure_transport.as_deref())
        {
            self.require_secure_transport = parsed;
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.trust_proxy.as_deref()) {
            self.trust_proxy = parsed;
        }
        if let Some(value) = env_cfg.max_body_size.as_deref()
            && let Some(parsed) = parse_body_size(value)
        {
            self.max_body_size = parsed;
        }
        if let Some(parsed) = parse_env_value::<u64>(env_cfg.lookup_timeout_ms.as_deref()) {
            self.lookup_timeout_ms = parsed;
        }
        if let Some(parsed) = parse_env_value::<usize>(env_cfg.stats_channel_capacity.as_deref()) {
            self.stats_channel_capacity = parsed;
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.status_enabled.as_deref()) {
            self.status_enabled = parsed;
        }
        if let Some(value) = env_cfg.tool_path.as_deref() {
            self.tool_path = if value.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        if let Some(parsed) = parse_env_value::<u64>(env_cfg.tool_cache_seconds.as_deref()) {
            self.tool_cache_seconds = parsed;
        }
        if let Some(value) = env_cfg.alert_path.as_deref() {
            self.alert_path = if value.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        if let Some(value) = env_cfg.log_level.as_deref()
            && !value.trim().is_empty()
        {
            self.log_level = value.to_string();
        }

        self.apply_storage_env_overrides(env_cfg);
    }

    fn apply_port_override(&mut self, port_value: Option<String>) {
        // PaaS compatibility: honor injected PORT and force a public bind address.
        if let Some(port) = parse_env_value::<u16>(port_value.as_deref()) {
            self.bind = SocketAddr::from(([0, 0, 0, 0], port));
        }
    }

    fn apply_storage_env_overrides(&mut self, env_cfg: &RawEnvConfig) {
        if let Some(value) = env_cfg.blob_backend.as_deref() {
            self.blob_storage.backend = BlobStorageBackend::from_str(value);
        }

        if self.blob_storage.backend == BlobStorageBackend::Local {
            self.blob_storage.s3 = None;
            return;
        }

        let mut s3 = self
            .blob_storage
            .s3
            .clone()
            .unwrap_or_else(default_s3_storage_config);

        if let Some(value) = env_cfg.s3_bucket.as_deref()
            && !value.is_empty()
        {
            s3.bucket = value.to_string();
        }
        if let Some(value) = env_cfg.s3_region.as_deref()
            && !value.is_empty()
        {
            s3.region = value.to_string();
        }
        if let Some(value) = env_cfg.s3_endpoint.as_deref() {
            s3.endpoint = empty_string_to_none(value.to_string());
        }
        if let Some(value) = env_cfg.s3_access_key_id.as_deref() {
            s3.access_key_id = empty_string_to_none(value.to_string());
        }
        if let Some(value) = env_cfg.s3_secret_access_key.as_deref() {
            s3.secret_access_key = empty_string_to_none(value.to_string());
        }
        if let Some(value) = env_cfg.s3_prefix.as_deref() {
            s3.prefix = value.to_string();
        }
        if let Some(parsed) = parse_env_value::<bool>(env_cfg.s3_force_path_style.as_deref()) {
            s3.force_path_style = parsed;
        }

        self.blob_storage.s3 = Some(s3);
    }

    fn apply_yaml_overrides(&mut self, loaded: Self) {
        *self = loaded;
    }

    pub fn from_yaml_file(path: PathBuf) -> Result<Self, String> {
        let text = std::fs::read_to_string(&path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        Self::from_yaml_str(&path.display().to_string(), &text)
    }

    fn from_yaml_str(source: &str, text: &str) -> Result<Self, String> {
        let parsed = serde_yaml::from_str::<YamlConfig>(text)
            .map_err(|err| format!("failed to parse {source}: {err}"))?;
        Self::from_yaml_config(parsed)
    }

    fn from_yaml_config(parsed: YamlConfig) -> Result<Self, String> {
        let defaults = Self::defaults();
        let bind = match parsed.listen.as_deref() {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .map_err(|err| format!("invalid listen address {raw}: {err}"))?,
            None => defaults.bind,
        };

        let data_dir = parsed
            .data_dir
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let max_body_size = parsed
            .max_body_size
            .as_deref()
            .and_then(parse_body_size)
            .unwrap_or(defaults.max_body_size);
        let trust_proxy = parsed
            .server
            .as_ref()
            .and_then(|server| server.trust_proxy)
            .unwrap_or(defaults.trust_proxy);
        let log_level = parsed
            .log
            .and_then(|log| log.level)
            .unwrap_or(defaults.log_level);

        Ok(Self {
            bind,
            data_dir,
            api_keys: parsed.api_keys.unwrap_or_default(),
            read_only: parsed.read_only.unwrap_or(defaults.read_only),
            require_secure_transport: parsed
                .require_secure_transport
                .unwrap_or(defaults.require_secure_transport),
            trust_proxy,
            max_body_size,
            lookup_timeout_ms: parsed
                .lookup_timeout_ms
                .unwrap_or(defaults.lookup_timeout_ms),
            stats_channel_capacity: parsed
                .stats
                .as_ref()
                .and_then(|stats| stats.channel_capacity)
                .unwrap_or(defaults.stats_channel_capacity),
            status_enabled: parsed
                .status
                .as_ref()
                .and_then(|status| status.enable)
                .unwrap_or(defaults.status_enabled),
            tool_path: parsed
                .tool
                .as_ref()
                .and_then(|tool| tool.path.clone())
                .map(PathBuf::from),
            tool_cache_seconds: parsed
                .tool
                .and_then(|tool| tool.cache_seconds)
                .unwrap_or(defaults.tool_cache_seconds),
            alert_path: parsed
                .alert
                .and_then(|alert| alert.path)
                .map(PathBuf::from),
            log_level,
            blob_storage: parse_storage_from_yaml(parsed.storage),
        })
    }
}

fn load_pakhus_env() -> Result<RawEnvConfig, String> {
    let settings = SettingsLoader::builder()
        .add_source(Environment::with_prefix("PAKHUS").try_parsing(false))
        .build()
        .map_err(|err| format!("failed to load PAKHUS_* environment: {err}"))?;

    Ok(RawEnvConfig {
        config: env_value(&settings, "config"),
        bind: env_value(&settings, "bind"),
        data_dir: env_value(&settings, "data_dir"),
        api_keys: env_value(&settings, "api_keys"),
        read_only: env_value(&settings, "read_only"),
        require_secure_transport: env_value(&settings, "require_secure_transport"),
        trust_proxy: env_value(&settings, "trust_proxy"),
        max_body_size: env_value(&settings, "max_body_size"),
        lookup_timeout_ms: env_value(&settings, "lookup_timeout_ms"),
        stats_channel_capacity: env_value(&settings, "stats_channel_capacity"),
        status_enabled: env_value(&settings, "status_enabled"),
        tool_path: env_value(&settings, "tool_path"),
        tool_cache_seconds: env_value(&settings, "tool_cache_seconds"),
        alert_path: env_value(&settings, "alert_path"),
        log_level: env_value(&settings, "log_level"),
        blob_backend: env_value(&settings, "blob_backend"),
        s3_bucket: env_value(&settings, "s3_bucket"),
        s3_region: env_value(&settings, "s3_region"),
        s3_endpoint: env_value(&settings, "s3_endpoint"),
        s3_access_key_id: env_value(&settings, "s3_access_key_id"),
        s3_secret_access_key: env_value(&settings, "s3_secret_access_key"),
        s3_prefix: env_value(&settings, "s3_prefix"),
        s3_force_path_style: env_value(&settings, "s3_force_path_style"),
    })
}

fn load_process_env_value(key: &str) -> Result<Option<String>, String> {
    let settings = SettingsLoader::builder()
        .add_source(Environment::default().try_parsing(false))
        .build()
        .map_err(|err| format!("failed to load process environment: {err}"))?;
    Ok(env_value(&settings, key))
}

fn env_value(settings: &SettingsLoader, key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| settings.get_string(&key.to_ascii_uppercase()).ok())
}

fn parse_env_value<T>(raw: Option<&str>) -> Option<T>
where
    T: std::str::FromStr,
{
    raw.and_then(|value| value.parse::<T>().ok())
}

/// `key:user` pairs separated by commas.
fn parse_api_keys(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, user) = pair.split_once(':')?;
            let key = key.trim();
            let user = user.trim();
            if key.is_empty() || user.is_empty() {
                return None;
            }
            Some((key.to_string(), user.to_string()))
        })
        .collect()
}

fn parse_body_size(value: &str) -> Option<usize> {
    let value = value.trim().to_ascii_lowercase();
    if let Some(number) = value.strip_suffix("gb") {
        return number.trim().parse::<usize>().ok().map(|n| n * 1024 * 1024 * 1024);
    }
    if let Some(number) = value.strip_suffix("mb") {
        return number.trim().parse::<usize>().ok().map(|n| n * 1024 * 1024);
    }
    if let Some(number) = value.strip_suffix("kb") {
        return number.trim().parse::<usize>().ok().map(|n| n * 1024);
    }
    value.parse::<usize>().ok()
}

fn default_s3_storage_config() -> S3BlobStorageConfig {
    S3BlobStorageConfig {
        bucket: String::new(),
        region: "us-east-1".to_string(),
        endpoint: None,
        access_key_id: None,
        secret_access_key: None,
        prefix: String::new(),
        force_path_style: true,
    }
}

fn empty_string_to_none(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn parse_storage_from_yaml(storage: Option<YamlStorage>) -> BlobStorageConfig {
    let Some(storage) = storage else {
        return BlobStorageConfig::default();
    };

    let backend = storage
        .backend
        .as_deref()
        .map(BlobStorageBackend::from_str)
        .unwrap_or(BlobStorageBackend::Local);

    match backend {
        BlobStorageBackend::Local => BlobStorageConfig::default(),
        BlobStorageBackend::S3 => {
            let s3 = storage.s3.unwrap_or_default();
            BlobStorageConfig {
                backend,
                s3: Some(S3BlobStorageConfig {
                    bucket: s3.bucket.unwrap_or_default(),
                    region: s3.region.unwrap_or_else(|| "us-east-1".to_string()),
                    endpoint: s3.endpoint,
                    access_key_id: s3.access_key_id,
                    secret_access_key: s3.secret_access_key,
                    prefix: s3.prefix.unwrap_or_default(),
                    force_path_style: s3.force_path_style.unwrap_or(true),
                }),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct YamlConfig {
    listen: Option<String>,
    #[serde(rename = "dataDir", alias = "data_dir")]
    data_dir: Option<String>,
    #[serde(rename = "apiKeys", alias = "api_keys")]
    api_keys: Option<HashMap<String, String>>,
    #[serde(rename = "readOnly", alias = "read_only")]
    read_only: Option<bool>,
    #[serde(rename = "requireSecureTransport", alias = "require_secure_transport")]
    require_secure_transport: Option<bool>,
    #[serde(rename = "maxBodySize", alias = "max_body_size")]
    max_body_size: Option<String>,
    #[serde(rename = "lookupTimeoutMs", alias = "lookup_timeout_ms")]
    lookup_timeout_ms: Option<u64>,
    stats: Option<YamlStats>,
    status: Option<YamlStatus>,
    tool: Option<YamlTool>,
    alert: Option<YamlAlert>,
    server: Option<YamlServer>,
    log: Option<YamlLog>,
    storage: Option<YamlStorage>,
}

#[derive(Debug, Deserialize)]
struct YamlStats {
    #[serde(rename = "channelCapacity", alias = "channel_capacity")]
    channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct YamlStatus {
    enable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct YamlTool {
    path: Option<String>,
    #[serde(rename = "cacheSeconds", alias = "cache_seconds")]
    cache_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct YamlAlert {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YamlServer {
    #[serde(rename = "trustProxy", alias = "trust_proxy")]
    trust_proxy: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct YamlLog {
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YamlStorage {
    backend: Option<String>,
    s3: Option<YamlStorageS3>,
}

#[derive(Debug, Deserialize, Default)]
struct YamlStorageS3 {
    bucket: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
    #[serde(rename = "accessKeyId")]
    access_key_id: Option<String>,
    #[serde(rename = "secretAccessKey")]
    secret_access_key: Option<String>,
    prefix: Option<String>,
    #[serde(rename = "forcePathStyle")]
    force_path_style: Option<bool>,
}
