use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// The working directory every pipeline of a server runs in.
///
/// One `WorkDir` is shared by all sessions of a server, so a `cd` in one
/// session is seen by every other session. In threaded mode two sessions
/// changing directory at the same time interleave in no particular order;
/// that race is accepted, the lock only keeps each read and write whole.
#[derive(Debug, Clone)]
pub struct WorkDir {
	imp: Arc<RwLock<PathBuf>>,
}

impl WorkDir {
	pub fn new<P: Into<PathBuf>>(path: P) -> WorkDir {
		WorkDir { imp: Arc::new(RwLock::new(path.into())) }
	}

	pub fn get(&self) -> PathBuf {
		self.imp.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	pub fn set(&self, path: PathBuf) {
		*self.imp.write().unwrap_or_else(PoisonError::into_inner) = path;
	}

	/// Resolves `path` against the current directory.
	pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
		self.get().join(path)
	}
}

pub struct State {
	pub work_dir: WorkDir,
	pub home: PathBuf,
	pub last_status: i32,
}

impl State {
	pub fn new(work_dir: WorkDir, home: PathBuf) -> State {
		State { work_dir, home, last_status: 0 }
	}
}

/// Target of a bare `cd`: the user's home, or `/tmp` when there is none.
pub fn default_home() -> PathBuf {
	dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}
