use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use nix::sys::socket::{self, sockopt, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, SockaddrIn6};

use crate::config::ServerConfig;
use crate::error::{RshError, RshResult};
use crate::global::{self, WorkDir};
use crate::protocol::{self, SessionEnd};

const LISTEN_BACKLOG: i32 = 20;

/// What every session of one server shares.
#[derive(Debug, Clone)]
pub struct Context {
	pub work_dir: WorkDir,
	pub home: PathBuf,
}

impl Context {
	pub fn new(work_dir: PathBuf, home: PathBuf) -> Context {
		Context { work_dir: WorkDir::new(work_dir), home }
	}

	fn session(&self) -> global::State {
		global::State::new(self.work_dir.clone(), self.home.clone())
	}
}

/// Creates the listening socket: `socket`, `SO_REUSEADDR`, `bind`, `listen`.
pub fn boot_server(addr: SocketAddr, reuse_address: bool) -> nix::Result<TcpListener> {
	let family = match addr {
		SocketAddr::V4(_) => AddressFamily::Inet,
		SocketAddr::V6(_) => AddressFamily::Inet6,
	};
	let fd = socket::socket(family, SockType::Stream, SockFlag::SOCK_CLOEXEC, None)?;
	if reuse_address {
		socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;
	}
	match addr {
		SocketAddr::V4(v4) => socket::bind(fd.as_raw_fd(), &SockaddrIn::from(v4))?,
		SocketAddr::V6(v6) => socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(v6))?,
	}
	socket::listen(&fd, Backlog::new(LISTEN_BACKLOG)?)?;
	Ok(TcpListener::from(fd))
}

struct Shutdown {
	requested: AtomicBool,
	wake_addr: SocketAddr,
}

impl Shutdown {
	/// Marks the server as stopping and pokes the accept loop, which is
	/// blocked in `accept`, with a throwaway connection.
	fn request(&self) {
		self.requested.store(true, Ordering::SeqCst);
		if let Err(e) = TcpStream::connect(self.wake_addr) {
			tracing::warn!(error = %e, "could not wake accept loop");
		}
	}

	fn is_requested(&self) -> bool {
		self.requested.load(Ordering::SeqCst)
	}
}

fn wake_addr(local: SocketAddr) -> SocketAddr {
	match local.ip() {
		IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port()),
		IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local.port()),
		_ => local,
	}
}

pub struct Server {
	listener: TcpListener,
	threaded: bool,
	context: Context,
}

impl Server {
	pub fn bind(config: &ServerConfig, context: Context) -> RshResult<Server> {
		let addr = config.socket_addr()?;
		let listener = boot_server(addr, config.reuse_address).map_err(|e| {
			tracing::error!(%addr, error = %e, "cannot start server");
			RshError::communication(e)
		})?;
		tracing::info!(addr = %listener.local_addr().map_err(RshError::communication)?,
		               threaded = config.threaded, "server listening");
		Ok(Server { listener, threaded: config.threaded, context })
	}

	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.listener.local_addr()
	}

	/// Accepts clients until one of them sends `stop-server`.
	pub fn run(self) -> RshResult<()> {
		let result = if self.threaded {
			self.process_cli_requests_threaded()
		} else {
			self.process_cli_requests()
		};
		tracing::info!("server stopped");
		result
	}

	fn accept(&self) -> RshResult<(TcpStream, SocketAddr)> {
		self.listener.accept().map_err(|e| {
			tracing::error!(error = %e, "accept failed");
			RshError::communication(e)
		})
	}

	fn process_cli_requests(&self) -> RshResult<()> {
		loop {
			let (stream, peer) = self.accept()?;
			tracing::info!(%peer, "client connected");
			let mut state = self.context.session();
			match protocol::serve_connection(stream, &mut state) {
				Ok(SessionEnd::StopServer) => {
					tracing::info!(%peer, "stop-server requested");
					return Ok(());
				},
				Ok(end) => tracing::info!(%peer, ?end, "client session ended"),
				Err(e) => tracing::warn!(%peer, error = %e, "client session aborted"),
			}
		}
	}

	fn process_cli_requests_threaded(&self) -> RshResult<()> {
		let shutdown = Arc::new(Shutdown {
			requested: AtomicBool::new(false),
			wake_addr: wake_addr(self.local_addr().map_err(RshError::communication)?),
		});
		loop {
			let (stream, peer) = self.accept()?;
			if shutdown.is_requested() {
				return Ok(());
			}
			tracing::info!(%peer, "client connected");

			let mut state = self.context.session();
			let worker_shutdown = Arc::clone(&shutdown);
			let spawned = thread::Builder::new()
				.name(format!("rsh-client-{}", peer))
				.spawn(move || {
					match protocol::serve_connection(stream, &mut state) {
						Ok(SessionEnd::StopServer) => {
							tracing::info!(%peer, "stop-server requested");
							worker_shutdown.request();
						},
						Ok(end) => tracing::info!(%peer, ?end, "client session ended"),
						Err(e) => tracing::warn!(%peer, error = %e, "client session aborted"),
					}
				});
			if let Err(e) = spawned {
				tracing::error!(%peer, error = %e, "cannot start client thread");
			}
		}
	}
}
