use std::fmt;

/// Maximum number of `|`-separated stages in one command line.
pub const CMD_MAX: usize = 8;
/// Executable names must be strictly shorter than this many bytes.
pub const EXE_MAX: usize = 64;
/// The single-space-joined argument text must be strictly shorter than this.
pub const ARG_MAX: usize = 256;
/// Maximum number of argument tokens after the executable name.
pub const ARGV_MAX: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
	pub name: String,
	pub arguments: Vec<String>,
	pub input: Option<String>,
}

impl Command {
	pub fn new<S: Into<String>>(name: S) -> Command {
		Command { name: name.into(), arguments: vec![], input: None }
	}

	pub fn arg<S: Into<String>>(mut self, arg: S) -> Command {
		self.arguments.push(arg.into());
		self
	}

	/// Argument tokens joined by exactly one space.
	pub fn args_text(&self) -> String {
		self.arguments.join(" ")
	}
}

fn needs_quotes(token: &str) -> bool {
	token.is_empty() || token.bytes().any(|c| matches!(c, b' ' | b'\t' | b'\n' | b'\r' | b'|' | b'<'))
}

fn write_token(f: &mut fmt::Formatter, token: &str) -> fmt::Result {
	if needs_quotes(token) {
		write!(f, "\"{}\"", token)
	} else {
		f.write_str(token)
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write_token(f, &self.name)?;
		for arg in &self.arguments {
			f.write_str(" ")?;
			write_token(f, arg)?;
		}
		if let Some(ref input) = self.input {
			f.write_str(" < ")?;
			write_token(f, input)?;
		}
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandList {
	pub commands: Vec<Command>,
}

impl CommandList {
	pub fn len(&self) -> usize {
		self.commands.len()
	}

	pub fn is_empty(&self) -> bool {
		self.commands.is_empty()
	}
}

impl fmt::Display for CommandList {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, command) in self.commands.iter().enumerate() {
			if i != 0 {
				f.write_str(" | ")?;
			}
			write!(f, "{}", command)?;
		}
		Ok(())
	}
}
