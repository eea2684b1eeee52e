use std::io::{self, BufRead, Write};
use std::process;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rsh::client::{self, Client};
use rsh::config::{self, RshConfig};
use rsh::eval::{self, Status};
use rsh::global::{self, WorkDir};
use rsh::server::{Context, Server};
use rsh::{parser, RshError};

/// Runs piped command lines locally, or serves them to remote clients.
#[derive(Parser)]
#[command(name = "rsh")]
#[command(about = "Remote pipeline shell")]
struct Args {
	/// Run as a client connected to ADDR:PORT
	#[arg(short = 'c', long = "client", value_name = "ADDR:PORT", num_args = 0..=1,
	      default_missing_value = "", conflicts_with = "server")]
	client: Option<String>,

	/// Run as a server listening on ADDR:PORT
	#[arg(short = 's', long = "server", value_name = "ADDR:PORT", num_args = 0..=1,
	      default_missing_value = "")]
	server: Option<String>,

	/// Serve each client on its own thread
	#[arg(short = 'x', long = "threaded")]
	threaded: bool,

	/// Path to configuration file
	#[arg(long = "config", env = "RSH_CONFIG")]
	config: Option<String>,

	/// Log filter, e.g. `info` or `rsh=debug`
	#[arg(long = "log-level")]
	log_level: Option<String>,
}

fn init_logging(level: &str) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
	tracing_subscriber::registry()
		.with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
		.with(filter)
		.init();
}

fn exec_local_cmd_loop(config: &RshConfig) -> i32 {
	let home = config.shell.home.clone().unwrap_or_else(global::default_home);
	let cwd = match std::env::current_dir() {
		Ok(cwd) => cwd,
		Err(e) => {
			eprintln!("rsh: cannot read current directory: {}", e);
			return 1;
		},
	};
	let mut state = global::State::new(WorkDir::new(cwd), home);

	let mut stdout = io::stdout();
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	loop {
		if let Err(e) = stdout.write_all(client::SH_PROMPT.as_bytes()).and_then(|_| stdout.flush()) {
			tracing::debug!(error = %e, "prompt");
		}
		let mut line = String::new();
		match stdin_locked.read_line(&mut line) {
			Ok(0) => {
				println!();
				return 0;
			},
			Ok(_) => {},
			Err(e) => {
				eprintln!("rsh: {}", e);
				return 1;
			},
		}

		let list = match parser::parse(&line) {
			Ok(Some(list)) => list,
			Ok(None) => {
				print!("{}", rsh::protocol::CMD_WARN_NO_CMD);
				continue;
			},
			Err(e) => {
				println!("{}", e);
				continue;
			},
		};
		match eval::execute_local(&mut state, &list) {
			Ok(Status::Exited(code)) => state.last_status = code,
			Ok(Status::Exit) | Ok(Status::StopServer) => return state.last_status,
			Err(e) => eprintln!("rsh: {}", e),
		}
	}
}

fn start_client(addr: &str) -> Result<(), RshError> {
	let (host, port) = config::parse_addr(addr, config::RDSH_DEF_CLI_CONNECT)?;
	let mut client = Client::connect((host.as_str(), port)).map_err(RshError::communication)?;
	tracing::debug!(peer = %client.peer_addr().map_err(RshError::communication)?, "connected");
	let stdin = io::stdin();
	client::exec_remote_cmd_loop(&mut client, stdin.lock(), &mut io::stdout())
		.map_err(RshError::communication)?;
	if let Err(e) = client.shutdown() {
		tracing::debug!(error = %e, "shutdown after session end");
	}
	Ok(())
}

fn start_server(addr: &str, config: &mut RshConfig) -> Result<(), RshError> {
	if !addr.is_empty() {
		let (host, port) = config::parse_addr(addr, &config.server.host)?;
		config.server.host = host;
		config.server.port = port;
	}
	let cwd = std::env::current_dir().map_err(RshError::communication)?;
	let home = config.shell.home.clone().unwrap_or_else(global::default_home);
	let server = Server::bind(&config.server, Context::new(cwd, home))?;
	server.run()
}

fn main() {
	let args = Args::parse();

	let mut config = match args.config {
		Some(ref path) => config::load_from_file(path).unwrap_or_else(|e| {
			eprintln!("Error: Failed to load config from {}: {}", path, e);
			process::exit(1);
		}),
		None => RshConfig::default(),
	};
	if args.threaded {
		config.server.threaded = true;
	}
	if let Some(ref level) = args.log_level {
		config.logging.level = level.clone();
	}
	init_logging(&config.logging.level);

	let result = if let Some(ref addr) = args.client {
		start_client(addr)
	} else if let Some(ref addr) = args.server {
		start_server(addr, &mut config)
	} else {
		process::exit(exec_local_cmd_loop(&config));
	};

	if let Err(e) = result {
		eprintln!("rsh: {}", e);
		process::exit(1);
	}
}
