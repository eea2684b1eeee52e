use std::env;
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const PATH_KEY: &str = "PATH";
const DEFAULT_PATH: &str = "/usr/bin:/bin";

fn is_executable(path: &Path) -> bool {
	match fs::metadata(path) {
		Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
		Err(_) => false,
	}
}

fn search_path() -> OsString {
	match env::var_os(PATH_KEY) {
		Some(ref path) if !path.is_empty() => path.clone(),
		_ => OsString::from(DEFAULT_PATH),
	}
}

/// Finds the program a stage should run.
///
/// Names containing `/` are taken relative to `work_dir`; bare names are
/// looked up in `PATH`, where relative entries are also taken relative to
/// `work_dir`.
pub fn lookup(name: &str, work_dir: &Path) -> Option<PathBuf> {
	if name.contains('/') {
		let path = work_dir.join(name);
		return if is_executable(&path) { Some(path) } else { None };
	}
	env::split_paths(&search_path())
		.map(|dir| work_dir.join(dir).join(name))
		.find(|path| is_executable(path))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs::File;

	#[test]
	fn finds_programs_on_path() {
		let found = lookup("sh", Path::new("/")).expect("sh on PATH");
		assert!(found.ends_with("sh"));
		assert!(found.is_absolute());
	}

	#[test]
	fn missing_program() {
		assert_eq!(lookup("definitely-not-a-program-rsh", Path::new("/")), None);
	}

	#[test]
	fn relative_program_uses_work_dir() {
		let tmp = tempfile::tempdir().unwrap();
		let script = tmp.path().join("run.sh");
		File::create(&script).unwrap();
		assert_eq!(lookup("./run.sh", tmp.path()), None);

		fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
		assert_eq!(lookup("./run.sh", tmp.path()), Some(tmp.path().join("./run.sh")));
	}

	#[test]
	fn directories_are_not_programs() {
		let tmp = tempfile::tempdir().unwrap();
		fs::create_dir(tmp.path().join("bin")).unwrap();
		assert_eq!(lookup("./bin", tmp.path()), None);
	}
}
