//! The thin argv front-end over the `tdbx` engine: parse a config path and
//! a single command off the command line, construct one `tdbx::Engine`,
//! dispatch, print the result, exit.
//!
//! Kept as a library too so the dispatch logic in [`command`] can be
//! exercised without spawning the `tdbx` binary.

pub mod command;
pub mod trace;
