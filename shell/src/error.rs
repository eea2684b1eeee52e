use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::CMD_MAX;

pub type RshResult<T> = Result<T, RshError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
	#[error("error: piping limited to {} commands", CMD_MAX)]
	TooManyCommands,

	#[error("error: command or arguments too big")]
	CmdOrArgsTooBig,

	#[error("error: empty command in pipeline")]
	EmptyCommand,

	#[error("error: input redirection needs a file and is only allowed on the first command")]
	BadRedirect,
}

#[derive(Debug, Error)]
pub enum ExecError {
	#[error("Nix error: {0}")]
	Nix(#[from] nix::Error),

	#[error("IO error: {0}")]
	Io(#[from] io::Error),

	#[error("empty pipeline")]
	EmptyPipeline,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("Failed to read config file {path}: {source}")]
	ReadFile {
		path: PathBuf,
		source: io::Error,
	},

	#[error("Failed to parse YAML: {0}")]
	ParseYaml(#[from] serde_yaml::Error),

	#[error("Invalid address '{0}': expected ADDR:PORT")]
	InvalidAddress(String),
}

#[derive(Debug, Error)]
pub enum RshError {
	/// Socket setup, accept, or client stream failure.
	#[error("communication error: {0}")]
	Communication(#[source] io::Error),

	#[error(transparent)]
	Config(#[from] ConfigError),
}

impl RshError {
	pub fn communication<E: Into<io::Error>>(e: E) -> RshError {
		RshError::Communication(e.into())
	}
}
