//! # Platform Emitters
//!
//! `bini build-api` turns every handler under the API directory into a
//! self-contained module for a deployment target. Each module embeds the
//! shared response shim and dispatch helpers, then the handler source (types
//! stripped, default export rebound), then a small adapter translating the
//! platform's request shape into the canonical request and back.
//!
//! | Target       | Output                                 |
//! |--------------|----------------------------------------|
//! | `vercel`     | `api/<route>.js`                       |
//! | `netlify`    | `netlify/functions/<route-flat>.mjs`   |
//! | `cloudflare` | `worker/api/<route>.js`, `worker/index.js`, `wrangler.toml` |
//! | `verbs`      | `dist/api/<route>.js`                  |
//!
//! Output is deterministic and files are only rewritten when their content
//! changes, so repeated builds leave timestamps alone.

mod core;
mod platform;
mod templates;

pub use core::{
    discover, emit, prepare_source, read_project_name, render_module, render_worker_index, render_wrangler,
    write_if_changed, BuildFailure, BuildReport, DiscoveredRoute, EmitError, Emitter, RouteRecord,
    COMPATIBILITY_DATE, DEFAULT_PROJECT_NAME, WORKER_ENTRY, WRANGLER_FILE,
};
pub use platform::Platform;
pub use templates::RouteModule;
