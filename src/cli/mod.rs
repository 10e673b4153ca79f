//! # CLI Module
//!
//! The `bini` command line.
//!
//! ## Commands
//!
//! | Command | Does |
//! |---------|------|
//! | `dev` | development server with hot reload and verbose errors |
//! | `start` | production server over the build output |
//! | `build-api --target vercel,netlify [--out DIR]` | emit platform functions |
//! | `routes` | list API routes as `{path, file}` records |
//! | `invoke <route>` | run one handler locally and print the result |
//!
//! Every command takes `--root` (default `.`), the project directory holding
//! `bini.toml` and the API tree.
//!
//! ```bash
//! bini dev --port 4000 --verbose
//! bini invoke users/list --method POST --data '{"name":"Ada"}' --header x-team:core
//! bini invoke hello --event event.json
//! ```

mod commands;

pub use commands::{parse_header, run, run_cli, Cli, Commands};

#[cfg(test)]
mod tests;
