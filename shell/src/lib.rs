//! rsh - a small shell that runs piped command lines, locally or for
//! clients over TCP.

pub mod builtin;
pub mod client;
pub mod config;
pub mod error;
pub mod eval;
pub mod global;
pub mod job;
pub mod parser;
pub mod protocol;
pub mod search;
pub mod server;
pub mod types;


pub use error::{RshError, RshResult};
pub use eval::{execute, Endpoints, Status};
pub use parser::parse;
pub use types::{Command, CommandList};
