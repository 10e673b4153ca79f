//! # Handler Resolver
//!
//! Maps a route name to a loaded handler module.
//!
//! ## Resolution
//!
//! 1. A cached module younger than the TTL is returned as-is (production) or
//!    after checking the file is unchanged (development)
//! 2. Otherwise the first existing file among `<route>.js`, `.ts`, `.mjs`,
//!    `.cjs` is read
//! 3. Plain scripts load with [`LoadStrategy::Direct`]; typed sources try the
//!    configured strategies in order, usually direct then transpile
//! 4. The module is cached under the route name
//!
//! ## Errors
//!
//! | Failure | Result |
//! |---------|--------|
//! | no candidate file | 404 `API route not found` |
//! | default export is not a function | 500, no further strategies tried |
//! | every strategy failed | 500 naming the route and the missing tool |
//!
//! Invalidation is by route prefix ([`Resolver::invalidate_prefix`]) and is
//! driven by the file watcher in development.

mod cache;
mod core;
mod loader;

pub use cache::HandlerCache;
pub use core::{HandlerModule, ResolveError, Resolver, ResolverOptions, SourceFingerprint};
pub use loader::{HandlerSource, LoadError, LoadStrategy, ModuleLoader};
