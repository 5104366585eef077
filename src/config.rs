use chrono::Duration;
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Server wide configuration
pub struct Config {
    /// Address clients reach this server on; doubles as the DHCP server id
    /// and the siaddr handed to PXE clients.
    pub server_ip: Ipv4Addr,
    pub server_name: String,
    /// Boot file name announced in DHCP/PXE replies.
    pub boot_filename: String,
    /// Bootloader blob served for every TFTP request.
    pub boot_file: PathBuf,
    /// Root of the kernel/initramfs/config tree served over HTTP.
    pub workspace: PathBuf,
    /// Root path of the filesystem-backed lease store.
    pub store_root: PathBuf,
    /// Directory used by this deployment inside the store.
    pub store_dir: String,
    pub lease_start: Ipv4Addr,
    pub lease_range: u32,
    pub lease_duration: Duration,
    pub subnet: Ipv4Net,
    pub router: Ipv4Addr,
    pub dns: Vec<Ipv4Addr>,
    pub log_level: tracing::Level,
    pub events_address: Option<SocketAddr>,
    pub mgmt_address: Option<SocketAddr>,
    pub dhcp_bind_address: SocketAddrV4,
    pub tftp_bind_address: SocketAddrV4,
    pub pxe_bind_address: SocketAddrV4,
    pub http_bind_address: SocketAddrV4,
}

/// Server wide configuration, used to deserialize the config.json file
/// before transforming to `Config`
#[derive(Deserialize)]
struct ServerConfig {
    server_ip: Ipv4Addr,
    server_name: Option<String>,
    boot_filename: Option<String>,
    boot_file: PathBuf,
    workspace: PathBuf,
    store_root: PathBuf,
    store_dir: Option<String>,
    lease_start: Ipv4Addr,
    lease_range: u32,
    lease_duration_secs: i64,
    subnet: Ipv4Net,
    router: Ipv4Addr,
    #[serde(default)]
    dns: Vec<Ipv4Addr>,
    log_level: Option<String>,
    events_address: Option<SocketAddr>,
    mgmt_address: Option<SocketAddr>,
    dhcp_bind_address: Option<SocketAddrV4>,
    tftp_bind_address: Option<SocketAddrV4>,
    pxe_bind_address: Option<SocketAddrV4>,
    http_bind_address: Option<SocketAddrV4>,
}

#[derive(Debug)]
pub enum ConfigError {
    Parsing {
        err: serde_json::Error,
        path: PathBuf,
    },
    Io {
        err: std::io::Error,
        path: PathBuf,
    },
    LogLevel(String),
    LeaseRange(u32),
    LeaseDuration(i64),
}

trait PathContext<T> {
    fn context<P: AsRef<Path>>(self, path: P) -> Result<T, ConfigError>;
}

impl<T> PathContext<T> for serde_json::Result<T> {
    fn context<P: AsRef<Path>>(self, path: P) -> Result<T, ConfigError> {
        self.map_err(|e| ConfigError::Parsing {
            err: e,
            path: path.as_ref().to_path_buf(),
        })
    }
}

impl<T> PathContext<T> for std::io::Result<T> {
    fn context<P: AsRef<Path>>(self, path: P) -> Result<T, ConfigError> {
        self.map_err(|e| ConfigError::Io {
            err: e,
            path: path.as_ref().to_path_buf(),
        })
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parsing { err, path } => {
                write!(f, "Parsing `{}`: {err}", path.to_string_lossy())
            }
            ConfigError::Io { err, path } => write!(f, "`{}`: {err}", path.to_string_lossy()),
            ConfigError::LogLevel(value) => write!(
                f,
                r#"Unexpected log level {value}. Expected one of [trace, debug, info, warn, error]"#
            ),
            ConfigError::LeaseRange(value) => {
                write!(f, "lease_range must be positive, got {value}")
            }
            ConfigError::LeaseDuration(value) => {
                write!(f, "lease_duration_secs must be positive, got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_ip: Ipv4Addr::UNSPECIFIED,
            server_name: "bootforge".to_string(),
            boot_filename: "pxelinux.0".to_string(),
            boot_file: PathBuf::from("pxelinux.0"),
            workspace: PathBuf::from("/workspace"),
            store_root: PathBuf::from("/var/lib/bootforge"),
            store_dir: "bootforge".to_string(),
            lease_start: Ipv4Addr::UNSPECIFIED,
            lease_range: 0,
            lease_duration: Duration::hours(1),
            subnet: "0.0.0.0/0".parse().unwrap(),
            router: Ipv4Addr::UNSPECIFIED,
            dns: vec![],
            log_level: tracing::Level::INFO,
            events_address: None,
            mgmt_address: None,
            dhcp_bind_address: "0.0.0.0:67".parse().unwrap(),
            tftp_bind_address: "0.0.0.0:69".parse().unwrap(),
            pxe_bind_address: "0.0.0.0:4011".parse().unwrap(),
            http_bind_address: "0.0.0.0:8080".parse().unwrap(),
        }
    }
}

impl Config {
    /// Load server config from `config.json` in `config_dir`.
    pub fn load_from_files<P: AsRef<Path>>(config_dir: P) -> Result<Config, ConfigError> {
        let server_config_path = config_dir.as_ref().join("config.json");
        let server_config: ServerConfig = serde_json::from_reader(
            std::fs::File::open(&server_config_path).context(&server_config_path)?,
        )
        .context(&server_config_path)?;

        if server_config.lease_range == 0 {
            return Err(ConfigError::LeaseRange(server_config.lease_range));
        }
        if server_config.lease_duration_secs <= 0 {
            return Err(ConfigError::LeaseDuration(server_config.lease_duration_secs));
        }

        let log_level = match server_config.log_level {
            Some(s) if !s.is_empty() => {
                tracing::Level::from_str(&s).map_err(|_| ConfigError::LogLevel(s))?
            }
            _ => tracing::Level::INFO,
        };

        let defaults = Config::default();
        Ok(Config {
            server_ip: server_config.server_ip,
            server_name: server_config.server_name.unwrap_or(defaults.server_name),
            boot_filename: server_config
                .boot_filename
                .unwrap_or(defaults.boot_filename),
            boot_file: server_config.boot_file,
            workspace: server_config.workspace,
            store_root: server_config.store_root,
            store_dir: server_config.store_dir.unwrap_or(defaults.store_dir),
            lease_start: server_config.lease_start,
            lease_range: server_config.lease_range,
            lease_duration: Duration::seconds(server_config.lease_duration_secs),
            subnet: server_config.subnet,
            router: server_config.router,
            dns: server_config.dns,
            log_level,
            events_address: server_config.events_address,
            mgmt_address: server_config.mgmt_address,
            dhcp_bind_address: server_config
                .dhcp_bind_address
                .unwrap_or(defaults.dhcp_bind_address),
            tftp_bind_address: server_config
                .tftp_bind_address
                .unwrap_or(defaults.tftp_bind_address),
            pxe_bind_address: server_config
                .pxe_bind_address
                .unwrap_or(defaults.pxe_bind_address),
            http_bind_address: server_config
                .http_bind_address
                .unwrap_or(defaults.http_bind_address),
        })
    }
}
