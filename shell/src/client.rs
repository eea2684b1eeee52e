use std::io::{self, BufRead, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use crate::protocol::{RDSH_COMM_BUFF_SZ, RDSH_EOF_CHAR, RDSH_REQ_TERM};

pub const SH_PROMPT: &str = "rsh4> ";

/// One response from the server.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Response {
	pub output: Vec<u8>,
	/// Whether the server closed the connection after this response.
	pub closed: bool,
}

pub struct Client {
	stream: TcpStream,
	/// Bytes read past the end of the last response.
	pending: Vec<u8>,
}

impl Client {
	pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Client> {
		Ok(Client { stream: TcpStream::connect(addr)?, pending: vec![] })
	}

	pub fn peer_addr(&self) -> io::Result<SocketAddr> {
		self.stream.peer_addr()
	}

	/// Sends one command line with its NUL terminator.
	pub fn send_command(&mut self, line: &str) -> io::Result<()> {
		self.send_raw(line.as_bytes())?;
		self.send_raw(&[RDSH_REQ_TERM])
	}

	pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
		self.stream.write_all(bytes)?;
		self.stream.flush()
	}

	/// Reads until the end-of-response byte. The sentinel itself is not part
	/// of the returned output; anything after it is kept for the next call.
	pub fn read_response(&mut self) -> io::Result<Response> {
		let mut chunk = [0u8; RDSH_COMM_BUFF_SZ];
		loop {
			if let Some(end) = self.pending.iter().position(|&c| c == RDSH_EOF_CHAR) {
				let output = self.pending.drain(..= end).take(end).collect();
				return Ok(Response { output, closed: false });
			}
			let n = match self.stream.read(&mut chunk) {
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
				Ok(n) => n,
			};
			if n == 0 {
				let output = std::mem::take(&mut self.pending);
				return Ok(Response { output, closed: true });
			}
			self.pending.extend_from_slice(&chunk[.. n]);
		}
	}

	pub fn exec(&mut self, line: &str) -> io::Result<Response> {
		self.send_command(line)?;
		self.read_response()
	}

	pub fn shutdown(&self) -> io::Result<()> {
		self.stream.shutdown(std::net::Shutdown::Both)
	}
}

/// Interactive loop: reads lines from `input`, prints responses to `out`,
/// stops after `exit`, `stop-server`, end of input, or a closed connection.
pub fn exec_remote_cmd_loop<R: BufRead, W: Write>(client: &mut Client, mut input: R, out: &mut W) -> io::Result<()> {
	loop {
		out.write_all(SH_PROMPT.as_bytes())?;
		out.flush()?;
		let mut line = String::new();
		if input.read_line(&mut line)? == 0 {
			out.write_all(b"\n")?;
			return Ok(());
		}
		let line = line.trim_end_matches(|c| c == '\n' || c == '\r');

		let response = client.exec(line)?;
		out.write_all(&response.output)?;
		out.flush()?;
		if response.closed {
			return Ok(());
		}
		match line.trim() {
			"exit" | "stop-server" => return Ok(()),
			_ => {},
		}
	}
}
