use nix::errno::Errno;
use nix::sys::wait::{self, WaitStatus};
use nix::unistd::Pid;

/// Status of a stage that could not be started.
pub const LAUNCH_FAILURE: i32 = 127;

pub trait WaitStatusExt {
	fn code(self) -> Option<i32>;
}

impl WaitStatusExt for WaitStatus {
	fn code(self) -> Option<i32> {
		match self {
			WaitStatus::Exited(_, code) => Some(code),
			WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
			_ => None,
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Process {
	Running(Pid),
	Done(i32),
}

/// The stages of one pipeline, in pipeline order.
#[derive(Debug, Default)]
pub struct Job {
	pub processes: Vec<Process>,
}

fn wait_for(pid: Pid) -> nix::Result<i32> {
	loop {
		match wait::waitpid(pid, None) {
			Err(Errno::EINTR) => continue,
			Err(e) => return Err(e),
			Ok(status) => if let Some(code) = status.code() {
				return Ok(code);
			},
		}
	}
}

impl Job {
	pub fn new(size_hint: usize) -> Job {
		Job { processes: Vec::with_capacity(size_hint) }
	}

	pub fn push_running(&mut self, pid: Pid) {
		self.processes.push(Process::Running(pid));
	}

	pub fn push_done(&mut self, status: i32) {
		self.processes.push(Process::Done(status));
	}

	/// Reaps every running stage. Each stage is waited for by pid, so the
	/// order the children finish in does not matter.
	pub fn wait(&mut self) -> Vec<i32> {
		self.processes.iter_mut().map(|pr| {
			if let Process::Running(pid) = *pr {
				let status = wait_for(pid).unwrap_or_else(|e| {
					tracing::warn!(pid = pid.as_raw(), error = %e, "waitpid failed");
					LAUNCH_FAILURE
				});
				*pr = Process::Done(status);
			}
			match *pr {
				Process::Done(status) => status,
				Process::Running(_) => LAUNCH_FAILURE,
			}
		}).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::process::Command;

	fn spawn(script: &str) -> Pid {
		let child = Command::new("sh").arg("-c").arg(script).spawn().unwrap();
		Pid::from_raw(child.id() as i32)
	}

	#[test]
	fn collects_statuses_in_stage_order() {
		let mut job = Job::new(3);
		job.push_running(spawn("sleep 0.2; exit 3"));
		job.push_done(LAUNCH_FAILURE);
		job.push_running(spawn("exit 5"));
		assert_eq!(job.wait(), vec![3, LAUNCH_FAILURE, 5]);
		assert!(job.processes.iter().all(|pr| matches!(pr, Process::Done(_))));
	}

	#[test]
	fn signal_death_maps_above_128() {
		let mut job = Job::new(1);
		job.push_running(spawn("kill -9 $$"));
		assert_eq!(job.wait(), vec![128 + 9]);
	}
}
