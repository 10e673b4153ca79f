use askama::Template;

/// Fields shared by every per-route template.
#[derive(Debug, Clone, Copy)]
pub struct RouteModule<'a> {
    /// Route name, e.g. `users/list`.
    pub route: &'a str,
    /// Handler file relative to the project root.
    pub source_file: &'a str,
    /// Handler source with its default export rebound.
    pub handler_source: &'a str,
}

#[derive(Template)]
#[template(path = "emit/vercel.js.txt", escape = "none")]
pub struct VercelTemplate<'a> {
    pub route: &'a str,
    pub source_file: &'a str,
    pub handler_source: &'a str,
}

#[derive(Template)]
#[template(path = "emit/netlify.mjs.txt", escape = "none")]
pub struct NetlifyTemplate<'a> {
    pub route: &'a str,
    pub source_file: &'a str,
    pub handler_source: &'a str,
    /// JSON string literal of the route's public path.
    pub url_path_literal: String,
}

#[derive(Template)]
#[template(path = "emit/cloudflare.js.txt", escape = "none")]
pub struct CloudflareTemplate<'a> {
    pub route: &'a str,
    pub source_file: &'a str,
    pub handler_source: &'a str,
}

#[derive(Template)]
#[template(path = "emit/verbs.js.txt", escape = "none")]
pub struct VerbsTemplate<'a> {
    pub route: &'a str,
    pub source_file: &'a str,
    pub handler_source: &'a str,
}

/// One route imported by the Cloudflare worker entry point.
#[derive(Debug, Clone)]
pub struct WorkerRoute {
    pub ident: String,
    pub import_literal: String,
    pub url_literal: String,
}

#[derive(Template)]
#[template(path = "emit/worker_index.js.txt", escape = "none")]
pub struct WorkerIndexTemplate<'a> {
    pub project_name: &'a str,
    pub routes: Vec<WorkerRoute>,
}

#[derive(Template)]
#[template(path = "emit/wrangler.toml.txt", escape = "none")]
pub struct WranglerTemplate<'a> {
    /// TOML string literal of the project name.
    pub project_name_literal: String,
    pub compatibility_date: &'a str,
}
