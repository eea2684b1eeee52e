//! Wire format between client and server.
//!
//! A request is the command line followed by one NUL byte, at most
//! [`RDSH_COMM_BUFF_SZ`] bytes including the NUL. A response is whatever the
//! command wrote, followed by one [`RDSH_EOF_CHAR`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsFd;

use crate::error::{RshError, RshResult};
use crate::eval::{self, Endpoints, Status};
use crate::global;
use crate::parser;

pub const RDSH_COMM_BUFF_SZ: usize = 4096;
pub const RDSH_EOF_CHAR: u8 = 0x04;
pub const RDSH_REQ_TERM: u8 = 0x00;

pub const CMD_WARN_NO_CMD: &str = "warning: no commands provided\n";
pub const CMD_ERR_TOO_LARGE: &str = "error: command too large\n";
pub const MSG_CLIENT_EXIT: &str = "Client exiting...\n";
pub const MSG_SERVER_STOP: &str = "Server stopping...\n";

#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
	Command(String),
	Oversized,
	Closed,
}

/// Splits a byte stream into NUL-terminated frames. Bytes after a NUL are
/// kept for the next frame.
pub struct FrameReader<R> {
	inner: R,
	buf: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
	pub fn new(inner: R) -> FrameReader<R> {
		FrameReader { inner, buf: Vec::with_capacity(RDSH_COMM_BUFF_SZ) }
	}

	pub fn get_ref(&self) -> &R {
		&self.inner
	}

	fn fill(&mut self) -> io::Result<usize> {
		let mut chunk = [0u8; RDSH_COMM_BUFF_SZ];
		loop {
			match self.inner.read(&mut chunk) {
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
				Ok(n) => {
					self.buf.extend_from_slice(&chunk[.. n]);
					return Ok(n);
				},
			}
		}
	}

	/// Reads the next frame. A full buffer with no NUL in it is dropped and
	/// reported as `Oversized`; whatever arrives after it starts a new frame.
	pub fn next_frame(&mut self) -> io::Result<Frame> {
		loop {
			let window = self.buf.len().min(RDSH_COMM_BUFF_SZ);
			if let Some(end) = self.buf[.. window].iter().position(|&c| c == RDSH_REQ_TERM) {
				let frame: Vec<u8> = self.buf.drain(..= end).take(end).collect();
				return Ok(Frame::Command(String::from_utf8_lossy(&frame).into_owned()));
			}
			if self.buf.len() >= RDSH_COMM_BUFF_SZ {
				self.buf.drain(.. RDSH_COMM_BUFF_SZ);
				return Ok(Frame::Oversized);
			}
			if self.fill()? == 0 {
				return Ok(Frame::Closed);
			}
		}
	}
}

pub fn send_message_string<W: Write>(w: &mut W, message: &str) -> io::Result<()> {
	w.write_all(message.as_bytes())
}

pub fn send_message_eof<W: Write>(w: &mut W) -> io::Result<()> {
	w.write_all(&[RDSH_EOF_CHAR])?;
	w.flush()
}

/// How a client session came to an end.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SessionEnd {
	ClientExit,
	StopServer,
	Disconnected,
}

fn respond(stream: &mut TcpStream, message: &str) -> io::Result<()> {
	send_message_string(stream, message)?;
	send_message_eof(stream)
}

fn close(stream: &TcpStream) {
	if let Err(e) = stream.shutdown(Shutdown::Both) {
		tracing::debug!(error = %e, "shutdown after session end");
	}
}

/// Serves commands from one client until it exits, asks the server to
/// stop, or goes away.
pub fn serve_connection(stream: TcpStream, state: &mut global::State) -> RshResult<SessionEnd> {
	let mut writer = stream.try_clone().map_err(RshError::communication)?;
	let mut reader = FrameReader::new(stream);

	loop {
		let line = match reader.next_frame().map_err(RshError::communication)? {
			Frame::Closed => {
				tracing::debug!("client disconnected");
				return Ok(SessionEnd::Disconnected);
			},
			Frame::Oversized => {
				tracing::warn!(limit = RDSH_COMM_BUFF_SZ, "command too large");
				respond(&mut writer, CMD_ERR_TOO_LARGE).map_err(RshError::communication)?;
				continue;
			},
			Frame::Command(line) => line,
		};

		let list = match parser::parse(&line) {
			Ok(Some(list)) => list,
			Ok(None) => {
				respond(&mut writer, CMD_WARN_NO_CMD).map_err(RshError::communication)?;
				continue;
			},
			Err(e) => {
				tracing::debug!(command = %line, error = %e, "parse failed");
				respond(&mut writer, &format!("{}\n", e)).map_err(RshError::communication)?;
				continue;
			},
		};
		tracing::debug!(command = %list, stages = list.len(), "executing");

		let status = {
			let endpoints = Endpoints::single(reader.get_ref().as_fd());
			eval::execute(state, &list, &endpoints)
		};
		match status {
			Ok(Status::Exited(code)) => {
				state.last_status = code;
				send_message_eof(&mut writer).map_err(RshError::communication)?;
			},
			Ok(Status::Exit) => {
				respond(&mut writer, MSG_CLIENT_EXIT).map_err(RshError::communication)?;
				close(&writer);
				return Ok(SessionEnd::ClientExit);
			},
			Ok(Status::StopServer) => {
				respond(&mut writer, MSG_SERVER_STOP).map_err(RshError::communication)?;
				close(&writer);
				return Ok(SessionEnd::StopServer);
			},
			Err(e) => {
				tracing::warn!(command = %list, error = %e, "pipeline failed");
				respond(&mut writer, &format!("error: {}\n", e)).map_err(RshError::communication)?;
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn reader(bytes: &[u8]) -> FrameReader<&[u8]> {
		FrameReader::new(bytes)
	}

	/// Hands out its input a few bytes at a time, like a slow socket.
	struct Trickle<'a> {
		data: &'a [u8],
		step: usize,
	}

	impl<'a> Read for Trickle<'a> {
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			let n = self.step.min(buf.len()).min(self.data.len());
			buf[.. n].copy_from_slice(&self.data[.. n]);
			self.data = &self.data[n ..];
			Ok(n)
		}
	}

	#[test]
	fn frames_split_on_nul() {
		let mut r = reader(b"ls -l\0echo hi\0");
		assert_eq!(r.next_frame().unwrap(), Frame::Command("ls -l".to_string()));
		assert_eq!(r.next_frame().unwrap(), Frame::Command("echo hi".to_string()));
		assert_eq!(r.next_frame().unwrap(), Frame::Closed);
	}

	#[test]
	fn empty_frame() {
		let mut r = reader(b"\0");
		assert_eq!(r.next_frame().unwrap(), Frame::Command(String::new()));
	}

	#[test]
	fn partial_frame_then_eof_is_closed() {
		let mut r = reader(b"ls -l");
		assert_eq!(r.next_frame().unwrap(), Frame::Closed);
	}

	#[test]
	fn frames_arrive_in_pieces() {
		let mut r = FrameReader::new(Trickle { data: b"cat file | wc -l\0pwd\0", step: 3 });
		assert_eq!(r.next_frame().unwrap(), Frame::Command("cat file | wc -l".to_string()));
		assert_eq!(r.next_frame().unwrap(), Frame::Command("pwd".to_string()));
		assert_eq!(r.next_frame().unwrap(), Frame::Closed);
	}

	#[test]
	fn largest_frame_fits() {
		let mut data = vec![b'x'; RDSH_COMM_BUFF_SZ - 1];
		data.push(0);
		let mut r = FrameReader::new(Trickle { data: &data, step: 1000 });
		match r.next_frame().unwrap() {
			Frame::Command(line) => assert_eq!(line.len(), RDSH_COMM_BUFF_SZ - 1),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn full_buffer_is_dropped_and_next_command_read() {
		let mut data = vec![b'x'; RDSH_COMM_BUFF_SZ];
		data.extend_from_slice(b"echo ok\0");
		let mut r = FrameReader::new(Trickle { data: &data, step: 700 });
		assert_eq!(r.next_frame().unwrap(), Frame::Oversized);
		assert_eq!(r.next_frame().unwrap(), Frame::Command("echo ok".to_string()));
		assert_eq!(r.next_frame().unwrap(), Frame::Closed);
	}

	#[test]
	fn each_full_buffer_is_reported() {
		let mut data = vec![b'x'; RDSH_COMM_BUFF_SZ * 2];
		data.extend_from_slice(b"pwd\0");
		let mut r = FrameReader::new(Trickle { data: &data, step: 3000 });
		assert_eq!(r.next_frame().unwrap(), Frame::Oversized);
		assert_eq!(r.next_frame().unwrap(), Frame::Oversized);
		assert_eq!(r.next_frame().unwrap(), Frame::Command("pwd".to_string()));
	}

	#[test]
	fn messages_end_with_sentinel() {
		let mut out = vec![];
		send_message_string(&mut out, CMD_WARN_NO_CMD).unwrap();
		send_message_eof(&mut out).unwrap();
		assert_eq!(out.last(), Some(&RDSH_EOF_CHAR));
		assert_eq!(&out[.. out.len() - 1], CMD_WARN_NO_CMD.as_bytes());
	}
}
