use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const RDSH_DEF_SVR_INTFACE: &str = "0.0.0.0";
pub const RDSH_DEF_CLI_CONNECT: &str = "127.0.0.1";
pub const RDSH_DEF_PORT: u16 = 1234;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RshConfig {
	pub server: ServerConfig,
	pub shell: ShellConfig,
	pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
	/// Serve every client on its own thread.
	pub threaded: bool,
	/// Set `SO_REUSEADDR` so a restarted server can rebind right away.
	pub reuse_address: bool,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: RDSH_DEF_SVR_INTFACE.to_string(),
			port: RDSH_DEF_PORT,
			threaded: false,
			reuse_address: true,
		}
	}
}

impl ServerConfig {
	pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
		let ip: IpAddr = self.host.parse()
			.map_err(|_| ConfigError::InvalidAddress(format!("{}:{}", self.host, self.port)))?;
		Ok(SocketAddr::new(ip, self.port))
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
	/// Where a bare `cd` goes. Defaults to the user's home directory.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub home: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
	pub level: String,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self { level: "info".to_string() }
	}
}

pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<RshConfig, ConfigError> {
	let path = path.as_ref();
	let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
		path: path.to_path_buf(),
		source: e,
	})?;
	parse_yaml(&content)
}

pub fn parse_yaml(content: &str) -> Result<RshConfig, ConfigError> {
	if content.trim().is_empty() {
		return Ok(RshConfig::default());
	}
	Ok(serde_yaml::from_str(content)?)
}

/// Splits `ADDR:PORT`. Either half may be left out (`:5678`, `10.0.0.1`,
/// `10.0.0.1:`); missing parts come from `default_host` and
/// [`RDSH_DEF_PORT`]. IPv6 addresses go in brackets: `[::1]:5678`.
pub fn parse_addr(spec: &str, default_host: &str) -> Result<(String, u16), ConfigError> {
	let invalid = || ConfigError::InvalidAddress(spec.to_string());
	let spec = spec.trim();
	let (host, port) = if let Some(rest) = spec.strip_prefix('[') {
		let close = rest.find(']').ok_or_else(invalid)?;
		let port = rest[close + 1 ..].strip_prefix(':').unwrap_or(&rest[close + 1 ..]);
		(&rest[.. close], port)
	} else if spec.matches(':').count() > 1 {
		// IPv6 needs brackets, as in `[::1]:1234`.
		return Err(invalid());
	} else {
		match spec.rfind(':') {
			Some(i) => (&spec[.. i], &spec[i + 1 ..]),
			None => (spec, ""),
		}
	};
	let host = if host.is_empty() { default_host.to_string() } else { host.to_string() };
	let port = if port.is_empty() {
		RDSH_DEF_PORT
	} else {
		port.parse().map_err(|_| invalid())?
	};
	host.parse::<IpAddr>().map_err(|_| invalid())?;
	Ok((host, port))
}
