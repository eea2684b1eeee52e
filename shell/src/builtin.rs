use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::global;
use crate::types::Command;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Builtin { Exit, StopServer, Cd, Dragon, Rc }

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Outcome {
	NotBuiltin,
	Executed(i32),
	Exit,
	StopServer,
}

/// Where a builtin runs. Inside a multi-stage pipeline `cd` behaves like a
/// subshell and leaves the shared directory alone.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Scope { Session, Pipeline }

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"exit" => Some(Builtin::Exit),
		"stop-server" => Some(Builtin::StopServer),
		"cd" => Some(Builtin::Cd),
		"dragon" => Some(Builtin::Dragon),
		"rc" => Some(Builtin::Rc),
		_ => None,
	}
}

const DRAGON: &str = r#"
                 __====-_  _-====___
           _--^^^#####//      \\#####^^^--_
        _-^##########// (    ) \\##########^-_
       -############//  |\^^/|  \\############-
     _/############//   (@::@)   \\############\_
    /#############((     \\//     ))#############\
   -###############\\    (oo)    //###############-
  -#################\\  / VV \  //#################-
 -###################\\/      \//###################-
_#/|##########/\######(   /\   )######/\##########|\#_
|/ |#/\#/\#/\/  \#/\##\  |  |  /##/\#/  \/\#/\#/\#| \|
`  |/  V  V  `   V  \#\| |  | |/#/  V   '  V  V  \|  '
   `   `  `      `   / | |  | | \   '      '  '   '
                    (  | |  | |  )
                   __\ | |  | | /__
                  (vvv(VVV)(VVV)vvv)
"#;

fn builtin_cd(state: &mut global::State, args: &[String], out: &mut dyn Write, scope: Scope) -> i32 {
	let target: PathBuf = match args.first() {
		Some(dir) => state.work_dir.resolve(dir),
		None => state.home.clone(),
	};
	let shown = args.first().map_or_else(|| state.home.display().to_string(), |s| s.clone());
	let checked = fs::canonicalize(&target).and_then(|path| {
		if fs::metadata(&path)?.is_dir() {
			Ok(path)
		} else {
			Err(io::Error::new(io::ErrorKind::Other, "Not a directory"))
		}
	});
	match checked {
		Ok(path) => {
			if scope == Scope::Session {
				tracing::debug!(dir = %path.display(), "changed directory");
				state.work_dir.set(path);
			}
			0
		},
		Err(e) => {
			if let Err(e) = writeln!(out, "cd: {}: {}", shown, e).and_then(|_| out.flush()) {
				tracing::debug!(error = %e, "could not report cd failure");
			}
			1
		},
	}
}

fn builtin_dragon(out: &mut dyn Write) -> i32 {
	match out.write_all(DRAGON.as_bytes()).and_then(|_| out.flush()) {
		Ok(()) => 0,
		Err(_) => 1,
	}
}

fn builtin_rc(state: &global::State, out: &mut dyn Write) -> i32 {
	match writeln!(out, "{}", state.last_status).and_then(|_| out.flush()) {
		Ok(()) => 0,
		Err(_) => 1,
	}
}

/// Runs `command` if it is a builtin. `exit` and `stop-server` are never
/// run here; they come back as control outcomes for the caller.
pub fn classify(state: &mut global::State, command: &Command, out: &mut dyn Write, scope: Scope) -> Outcome {
	match match_builtin(&command.name) {
		None => Outcome::NotBuiltin,
		Some(Builtin::Exit) => Outcome::Exit,
		Some(Builtin::StopServer) => Outcome::StopServer,
		Some(Builtin::Cd) => Outcome::Executed(builtin_cd(state, &command.arguments, out, scope)),
		Some(Builtin::Dragon) => Outcome::Executed(builtin_dragon(out)),
		Some(Builtin::Rc) => Outcome::Executed(builtin_rc(state, out)),
	}
}
