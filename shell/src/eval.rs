use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;
use std::process::{self, Stdio};

use nix::fcntl::OFlag;
use nix::unistd::{self, Pid};

use crate::builtin::{self, Outcome, Scope};
use crate::error::ExecError;
use crate::global;
use crate::job::{self, Job};
use crate::search;
use crate::types::{Command, CommandList};

/// Status a stage reports to end the client session.
///
/// A program that happens to exit with this code is read the same way;
/// nothing on the wire tells the two apart.
pub const EXIT_SC: i32 = 99;
/// Status a stage reports to shut the server down. Shares the ambiguity of
/// [`EXIT_SC`].
pub const STOP_SERVER_SC: i32 = 200;

/// Status of an input file that could not be opened.
const INPUT_FAILURE: i32 = 1;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Status {
	Exited(i32),
	Exit,
	StopServer,
}

impl Status {
	fn from_code(code: i32) -> Status {
		match code {
			EXIT_SC => Status::Exit,
			STOP_SERVER_SC => Status::StopServer,
			code => Status::Exited(code),
		}
	}

	pub fn code(self) -> i32 {
		match self {
			Status::Exited(code) => code,
			Status::Exit => EXIT_SC,
			Status::StopServer => STOP_SERVER_SC,
		}
	}
}

/// The streams a pipeline reads from and writes to: the terminal for a
/// local session, the client socket for a remote one.
#[derive(Debug, Clone, Copy)]
pub struct Endpoints<'a> {
	pub stdin: BorrowedFd<'a>,
	pub stdout: BorrowedFd<'a>,
	pub stderr: BorrowedFd<'a>,
}

impl<'a> Endpoints<'a> {
	/// All three streams on one descriptor, as for a socket.
	pub fn single(fd: BorrowedFd<'a>) -> Endpoints<'a> {
		Endpoints { stdin: fd, stdout: fd, stderr: fd }
	}
}

enum Source {
	Endpoint,
	File(String),
	Pipe(OwnedFd),
}

enum Sink {
	Endpoint,
	Pipe(OwnedFd),
	Inherit,
}

struct StageIo {
	stdin: Source,
	stdout: Sink,
	stderr: Sink,
}

struct Launch<'a, 'b> {
	endpoints: &'b Endpoints<'a>,
	work_dir: &'b Path,
}

impl<'a, 'b> Launch<'a, 'b> {
	fn output(&self, sink: &Sink) -> io::Result<Box<dyn Write>> {
		Ok(match *sink {
			Sink::Endpoint => Box::new(File::from(self.endpoints.stdout.try_clone_to_owned()?)),
			Sink::Pipe(ref fd) => Box::new(File::from(fd.try_clone()?)),
			Sink::Inherit => Box::new(io::stdout()),
		})
	}

	fn report(&self, sink: &Sink, message: &str) {
		let written = match *sink {
			Sink::Endpoint => self.endpoints.stderr.try_clone_to_owned()
				.and_then(|fd| File::from(fd).write_all(message.as_bytes())),
			Sink::Pipe(ref fd) => fd.try_clone()
				.and_then(|fd| File::from(fd).write_all(message.as_bytes())),
			Sink::Inherit => io::stderr().write_all(message.as_bytes()),
		};
		if let Err(e) = written {
			tracing::warn!(error = %e, message = message.trim_end(), "could not report stage failure");
		}
	}

	fn stdin(&self, source: Source) -> io::Result<Stdio> {
		Ok(match source {
			Source::Endpoint => Stdio::from(self.endpoints.stdin.try_clone_to_owned()?),
			Source::File(name) => Stdio::from(File::open(self.work_dir.join(name))?),
			Source::Pipe(fd) => Stdio::from(fd),
		})
	}

	fn sink(&self, sink: Sink, endpoint: BorrowedFd) -> io::Result<Stdio> {
		Ok(match sink {
			Sink::Endpoint => Stdio::from(endpoint.try_clone_to_owned()?),
			Sink::Pipe(fd) => Stdio::from(fd),
			Sink::Inherit => Stdio::inherit(),
		})
	}

	/// Starts one external stage. Failures are written to the stage's own
	/// error stream and turned into a finished stage with a failure status.
	fn spawn(&self, command: &Command, io: StageIo, job: &mut Job) {
		let program = match search::lookup(&command.name, self.work_dir) {
			Some(program) => program,
			None => {
				self.report(&io.stderr, &format!("command not found: {}\n", command.name));
				job.push_done(job::LAUNCH_FAILURE);
				return;
			},
		};

		let input = match io.stdin {
			Source::File(ref name) => Some(name.clone()),
			_ => None,
		};
		let stdin = match self.stdin(io.stdin) {
			Ok(stdin) => stdin,
			Err(e) => {
				let name = input.unwrap_or_default();
				self.report(&io.stderr, &format!("{}: {}\n", name, e));
				job.push_done(INPUT_FAILURE);
				return;
			},
		};

		let stderr_report = match io.stderr {
			Sink::Endpoint => Sink::Endpoint,
			_ => Sink::Inherit,
		};
		let spawned = self.sink(io.stdout, self.endpoints.stdout)
			.and_then(|stdout| Ok((stdout, self.sink(io.stderr, self.endpoints.stderr)?)))
			.and_then(|(stdout, stderr)| {
				process::Command::new(&program)
					.args(&command.arguments)
					.current_dir(self.work_dir)
					.stdin(stdin)
					.stdout(stdout)
					.stderr(stderr)
					.spawn()
			});
		match spawned {
			Ok(child) => job.push_running(Pid::from_raw(child.id() as i32)),
			Err(e) => {
				self.report(&stderr_report, &format!("{}: {}\n", command.name, e));
				job.push_done(job::LAUNCH_FAILURE);
			},
		}
	}

	/// Runs a builtin as one stage of a longer pipeline.
	fn run_builtin(&self, state: &mut global::State, command: &Command, io: StageIo, job: &mut Job) {
		let mut out: Box<dyn Write> = match self.output(&io.stdout) {
			Ok(out) => out,
			Err(e) => {
				self.report(&io.stderr, &format!("{}: {}\n", command.name, e));
				job.push_done(job::LAUNCH_FAILURE);
				return;
			},
		};
		let status = match builtin::classify(state, command, &mut out, Scope::Pipeline) {
			Outcome::Executed(code) => code,
			Outcome::Exit => EXIT_SC,
			Outcome::StopServer => STOP_SERVER_SC,
			Outcome::NotBuiltin => job::LAUNCH_FAILURE,
		};
		job.push_done(status);
	}
}

// Builtin stages run after every external stage has been started, so their
// output always has a reader on the other end of the pipe.
fn spawn_commands(state: &mut global::State, list: &CommandList, endpoints: &Endpoints,
                  job: &mut Job) -> Result<(), ExecError> {
	let work_dir = state.work_dir.get();
	let launch = Launch { endpoints, work_dir: &work_dir };
	let last = list.len() - 1;
	let mut deferred: Vec<(usize, StageIo)> = vec![];
	let mut stage_ios: Vec<StageIo> = Vec::with_capacity(list.len());

	let mut pipe_stdin: Option<OwnedFd> = None;
	for (i, command) in list.commands.iter().enumerate() {
		let stdin = match pipe_stdin.take() {
			Some(fd) => Source::Pipe(fd),
			None => match command.input {
				Some(ref name) => Source::File(name.clone()),
				None => Source::Endpoint,
			},
		};
		let (stdout, stderr) = if i == last {
			(Sink::Endpoint, Sink::Endpoint)
		} else {
			let (pipe_read, pipe_write) = unistd::pipe2(OFlag::O_CLOEXEC)?;
			pipe_stdin = Some(pipe_read);
			(Sink::Pipe(pipe_write), Sink::Inherit)
		};
		stage_ios.push(StageIo { stdin, stdout, stderr });
	}

	for (i, (command, io)) in list.commands.iter().zip(stage_ios).enumerate() {
		if builtin::match_builtin(&command.name).is_some() {
			job.push_done(job::LAUNCH_FAILURE);
			deferred.push((i, io));
		} else {
			launch.spawn(command, io, job);
		}
	}

	for (i, io) in deferred {
		let mut stage = Job::new(1);
		launch.run_builtin(state, &list.commands[i], io, &mut stage);
		if let Some(done) = stage.processes.pop() {
			job.processes[i] = done;
		}
	}
	Ok(())
}

fn fold_statuses(statuses: &[i32]) -> Status {
	let mut code = statuses.last().copied().unwrap_or(job::LAUNCH_FAILURE);
	if statuses.contains(&EXIT_SC) {
		code = EXIT_SC;
	}
	if statuses.contains(&STOP_SERVER_SC) {
		code = STOP_SERVER_SC;
	}
	Status::from_code(code)
}

/// Runs a parsed command line and returns the status of its last stage.
///
/// A lone builtin runs in-process against the shared working directory.
/// Otherwise each stage gets its own process, wired stdin to stdout with
/// pipes; the first stage reads `endpoints.stdin` (or its input file) and
/// the last writes `endpoints.stdout`/`endpoints.stderr`. If any stage ends
/// with a reserved control status, that status is the result.
pub fn execute(state: &mut global::State, list: &CommandList, endpoints: &Endpoints) -> Result<Status, ExecError> {
	let first = match list.commands.first() {
		Some(first) => first,
		None => return Err(ExecError::EmptyPipeline),
	};
	if list.len() == 1 && builtin::match_builtin(&first.name).is_some() {
		return run_lone_builtin(state, first, endpoints);
	}

	let mut job = Job::new(list.len());
	let spawned = spawn_commands(state, list, endpoints, &mut job);
	let statuses = job.wait();
	spawned?;

	let status = fold_statuses(&statuses);
	tracing::debug!(stages = list.len(), ?statuses, ?status, "pipeline finished");
	Ok(status)
}

// The input file of a lone builtin is never read, but it still has to open.
fn run_lone_builtin(state: &mut global::State, command: &Command, endpoints: &Endpoints) -> Result<Status, ExecError> {
	if let Some(ref name) = command.input {
		if let Err(e) = File::open(state.work_dir.resolve(name)) {
			let mut err = File::from(endpoints.stderr.try_clone_to_owned()?);
			writeln!(err, "{}: {}", name, e)?;
			return Ok(Status::Exited(INPUT_FAILURE));
		}
	}
	let mut out = File::from(endpoints.stdout.try_clone_to_owned()?);
	Ok(match builtin::classify(state, command, &mut out, Scope::Session) {
		Outcome::Executed(code) => Status::Exited(code),
		Outcome::Exit => Status::Exit,
		Outcome::StopServer => Status::StopServer,
		Outcome::NotBuiltin => Status::Exited(job::LAUNCH_FAILURE),
	})
}

/// Runs a pipeline on this process's own standard streams.
pub fn execute_local(state: &mut global::State, list: &CommandList) -> Result<Status, ExecError> {
	let stdin = io::stdin();
	let stdout = io::stdout();
	let stderr = io::stderr();
	if let Err(e) = io::stdout().flush() {
		tracing::debug!(error = %e, "flush before pipeline");
	}
	let endpoints = Endpoints { stdin: stdin.as_fd(), stdout: stdout.as_fd(), stderr: stderr.as_fd() };
	execute(state, list, &endpoints)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::global::WorkDir;
	use crate::parser;
	use std::fs;
	use std::io::{Read, Seek, SeekFrom};

	struct Harness {
		dir: tempfile::TempDir,
		state: global::State,
		stdin: File,
		stdout: File,
	}

	impl Harness {
		fn new(input: &[u8]) -> Harness {
			let dir = tempfile::tempdir().unwrap();
			let path = fs::canonicalize(dir.path()).unwrap();
			let state = global::State::new(WorkDir::new(path.clone()), path);
			let mut stdin = tempfile::tempfile().unwrap();
			stdin.write_all(input).unwrap();
			stdin.seek(SeekFrom::Start(0)).unwrap();
			let stdout = tempfile::tempfile().unwrap();
			Harness { dir, state, stdin, stdout }
		}

		fn run(&mut self, line: &str) -> Status {
			let list = parser::parse(line).unwrap().unwrap();
			let endpoints = Endpoints {
				stdin: self.stdin.as_fd(),
				stdout: self.stdout.as_fd(),
				stderr: self.stdout.as_fd(),
			};
			execute(&mut self.state, &list, &endpoints).unwrap()
		}

		fn output(&mut self) -> Vec<u8> {
			let mut buf = vec![];
			self.stdout.seek(SeekFrom::Start(0)).unwrap();
			self.stdout.read_to_end(&mut buf).unwrap();
			buf
		}
	}

	#[test]
	fn single_stage_status_passes_through() {
		let mut h = Harness::new(b"");
		for code in [0, 1, 3, 42, 127].iter() {
			assert_eq!(h.run(&format!("sh -c \"exit {}\"", code)), Status::Exited(*code));
		}
		assert_eq!(h.run("true"), Status::Exited(0));
		assert_eq!(h.run("false"), Status::Exited(1));
	}

	#[test]
	fn single_stage_writes_to_stdout_endpoint() {
		let mut h = Harness::new(b"");
		assert_eq!(h.run("echo \"a  b\" c"), Status::Exited(0));
		assert_eq!(h.output(), b"a  b c\n");
	}

	#[test]
	fn three_pass_through_stages_preserve_input() {
		let input: Vec<u8> = (0 .. 200_000u32).map(|i| (i % 251) as u8).collect();
		let mut h = Harness::new(&input);
		assert_eq!(h.run("cat | cat | cat"), Status::Exited(0));
		assert_eq!(h.output(), input);
	}

	#[test]
	fn pipeline_transforms_and_counts() {
		let mut h = Harness::new(b"one\ntwo\nthree\n");
		assert_eq!(h.run("cat | tr a-z A-Z | sort"), Status::Exited(0));
		assert_eq!(h.output(), b"ONE\nTHREE\nTWO\n");
	}

	#[test]
	fn last_stage_status_wins() {
		let mut h = Harness::new(b"");
		assert_eq!(h.run("false | true"), Status::Exited(0));
		assert_eq!(h.run("true | sh -c \"exit 7\""), Status::Exited(7));
	}

	#[test]
	fn control_status_from_any_stage_wins() {
		let mut h = Harness::new(b"");
		assert_eq!(h.run(&format!("sh -c \"exit {}\" | true", EXIT_SC)), Status::Exit);
		assert_eq!(h.run(&format!("true | sh -c \"exit {}\"", STOP_SERVER_SC)), Status::StopServer);
		assert_eq!(h.run("echo hi | exit"), Status::Exit);
		assert_eq!(h.run("stop-server | cat"), Status::StopServer);
		assert_eq!(Status::Exit.code(), EXIT_SC);
		assert_eq!(Status::StopServer.code(), STOP_SERVER_SC);
	}

	#[test]
	fn lone_builtins_short_circuit() {
		let mut h = Harness::new(b"");
		assert_eq!(h.run("exit"), Status::Exit);
		assert_eq!(h.run("stop-server"), Status::StopServer);
		fs::create_dir(h.dir.path().join("inner")).unwrap();
		assert_eq!(h.run("cd inner"), Status::Exited(0));
		assert!(h.state.work_dir.get().ends_with("inner"));
		assert_eq!(h.run("pwd"), Status::Exited(0));
		let out = String::from_utf8(h.output()).unwrap();
		assert!(out.trim_end().ends_with("inner"), "{}", out);
	}

	#[test]
	fn lone_builtin_with_input_file() {
		let mut h = Harness::new(b"");
		fs::create_dir(h.dir.path().join("inner")).unwrap();
		let before = h.state.work_dir.get();
		assert_eq!(h.run("cd inner < nope.txt"), Status::Exited(INPUT_FAILURE));
		assert_eq!(h.state.work_dir.get(), before);
		assert!(String::from_utf8(h.output()).unwrap().starts_with("nope.txt: "));

		fs::write(h.dir.path().join("data.txt"), b"x\n").unwrap();
		assert_eq!(h.run("cd inner < data.txt"), Status::Exited(0));
		assert!(h.state.work_dir.get().ends_with("inner"));
	}

	#[test]
	fn empty_list_is_an_error() {
		let mut h = Harness::new(b"");
		let endpoints = Endpoints::single(h.stdout.as_fd());
		let list = CommandList { commands: vec![] };
		match execute(&mut h.state, &list, &endpoints) {
			Err(ExecError::EmptyPipeline) => {},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn builtin_stage_feeds_the_pipeline() {
		let mut h = Harness::new(b"");
		h.state.last_status = 5;
		assert_eq!(h.run("rc | cat"), Status::Exited(0));
		assert_eq!(h.output(), b"5\n");
	}

	#[test]
	fn cd_inside_pipeline_keeps_directory() {
		let mut h = Harness::new(b"");
		fs::create_dir(h.dir.path().join("inner")).unwrap();
		let before = h.state.work_dir.get();
		assert_eq!(h.run("cd inner | true"), Status::Exited(0));
		assert_eq!(h.state.work_dir.get(), before);
	}

	#[test]
	fn missing_program_reports_and_fails() {
		let mut h = Harness::new(b"");
		assert_eq!(h.run("no-such-program-rsh arg"), Status::Exited(job::LAUNCH_FAILURE));
		assert_eq!(h.output(), b"command not found: no-such-program-rsh\n");
	}

	#[test]
	fn missing_program_mid_pipeline_still_completes() {
		let mut h = Harness::new(b"");
		assert_eq!(h.run("no-such-program-rsh | cat"), Status::Exited(0));
	}

	#[test]
	fn input_redirection_reads_file_in_work_dir() {
		let mut h = Harness::new(b"ignored\n");
		fs::write(h.dir.path().join("data.txt"), b"b\na\nc\n").unwrap();
		assert_eq!(h.run("sort < data.txt | head -n 2"), Status::Exited(0));
		assert_eq!(h.output(), b"a\nb\n");
	}

	#[test]
	fn missing_input_file() {
		let mut h = Harness::new(b"");
		assert_eq!(h.run("cat < nope.txt"), Status::Exited(INPUT_FAILURE));
		assert!(String::from_utf8(h.output()).unwrap().starts_with("nope.txt: "));
	}

	#[test]
	fn relative_programs_resolve_in_work_dir() {
		let mut h = Harness::new(b"");
		let bin = h.dir.path().join("bin");
		fs::create_dir(&bin).unwrap();
		let echo = search::lookup("echo", Path::new("/")).unwrap();
		std::os::unix::fs::symlink(echo, bin.join("echo")).unwrap();
		assert_eq!(h.run("./bin/echo hello from bin"), Status::Exited(0));
		assert_eq!(h.output(), b"hello from bin\n");
		assert_eq!(h.run("./missing/echo"), Status::Exited(job::LAUNCH_FAILURE));
	}

	#[test]
	fn fold_prefers_stop_server() {
		assert_eq!(fold_statuses(&[EXIT_SC, STOP_SERVER_SC, 0]), Status::StopServer);
		assert_eq!(fold_statuses(&[0, 0, 4]), Status::Exited(4));
		assert_eq!(fold_statuses(&[0, EXIT_SC, 4]), Status::Exit);
	}
}
