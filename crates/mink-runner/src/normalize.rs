//! Request id normalization and path mapping
//!
//! Ids arrive in the forms a dev server hands out (`/@id/...`, `/@fs/...`,
//! `file://` URLs, cache-busting queries) and are reduced to one canonical
//! key per module.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Node builtins that are only reachable with the `node:` prefix
const PREFIXED_BUILTINS: &[&str] = &["node:sea", "node:sqlite", "node:test", "node:test/reporters"];

const NODE_BUILTINS: &[&str] = &[
    "assert",
    "assert/strict",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "dns/promises",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "path/posix",
    "path/win32",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "readline/promises",
    "repl",
    "stream",
    "stream/consumers",
    "stream/promises",
    "stream/web",
    "string_decoder",
    "sys",
    "timers",
    "timers/promises",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "util/types",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// Dev-server internal modules, answered by request stubs
pub const INTERNAL_REQUESTS: &[&str] = &["@vite/client", "@vite/env"];

/// Prefix of ids that are already resolved
pub const VALID_ID_PREFIX: &str = "/@id/";

const NULL_BYTE_PLACEHOLDER: &str = "__x00__";

/// Cache-key prefix for mocked modules
pub const MOCK_PREFIX: &str = "mock:";

static QUERY_NOISE: LazyLock<[(Regex, &'static str); 7]> = LazyLock::new(|| {
    let re = |pattern: &str| Regex::new(pattern).expect("valid regex");
    [
        (re(r"\?v=\w+"), "?"),
        (re(r"&v=\w+"), ""),
        (re(r"\?t=\w+"), "?"),
        (re(r"&t=\w+"), ""),
        (re(r"\?import"), "?"),
        (re(r"&import"), ""),
        (re(r"\?&"), "?"),
    ]
});

static TRAILING_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?+$").expect("valid regex"));

static LEADING_SLASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/+").expect("valid regex"));

/// Forward slashes only
pub fn slash(path: &str) -> String {
    path.replace('\\', "/")
}

/// `path` with exactly one trailing `/`
pub fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Drop the query string and hash
pub fn clean_url(url: &str) -> &str {
    match url.find(['?', '#']) {
        Some(index) => &url[..index],
        None => url,
    }
}

/// Whether `id` is a dev-server internal module
pub fn is_internal_request(id: &str) -> bool {
    INTERNAL_REQUESTS.iter().any(|internal| {
        id.starts_with(internal) || id.strip_prefix('/').is_some_and(|rest| rest.starts_with(internal))
    })
}

/// Whether `id` names a Node builtin, with or without the `node:` prefix
pub fn is_builtin(id: &str) -> bool {
    if PREFIXED_BUILTINS.contains(&id) {
        return true;
    }
    let bare = id.strip_prefix("node:").unwrap_or(id);
    NODE_BUILTINS.contains(&bare)
}

/// Whether `id` is an inline `data:` module
pub fn is_data_url(id: &str) -> bool {
    id.starts_with("data:")
}

/// Reduce a request id to its canonical form.
///
/// Strips the public `base`, the `/@id/` prefix (decoding the null-byte
/// placeholder), the browser-external marker, `file://` and cache-busting
/// query parameters.
pub fn normalize_request_id(id: &str, base: Option<&str>) -> String {
    let mut id = id.to_string();

    if let Some(base) = base
        && base != "/"
        && id.starts_with(&with_trailing_slash(base))
    {
        id = id.replacen(base.trim_end_matches('/'), "", 1);
    }

    if let Some(rest) = id.strip_prefix("/@id/__x00__") {
        id = format!("\0{}", rest);
    } else if let Some(rest) = id.strip_prefix(VALID_ID_PREFIX) {
        id = rest.to_string();
    }

    if let Some(rest) = id.strip_prefix("__vite-browser-external:") {
        id = rest.to_string();
    }
    if let Some(rest) = id.strip_prefix("file:/") {
        id = format!("/{}", rest);
    }
    id = LEADING_SLASHES.replace(&id, "/").into_owned();

    for (pattern, replacement) in QUERY_NOISE.iter() {
        id = pattern.replacen(&id, 1, *replacement).into_owned();
    }
    TRAILING_QUERY.replace(&id, "").into_owned()
}

/// Canonical cache key of a resolved path
pub fn normalize_module_id(id: &str) -> String {
    if PREFIXED_BUILTINS.contains(&id) || id.is_empty() {
        return id.to_string();
    }
    let mut id = slash(id);
    if let Some(rest) = id.strip_prefix("/@fs/") {
        id = format!("/{}", rest);
    }
    if let Some(rest) = id.strip_prefix("file:/") {
        id = format!("/{}", rest);
    }
    if let Some(rest) = id.strip_prefix("node:") {
        id = rest.to_string();
    }
    if let Some(rest) = id.strip_prefix(NULL_BYTE_PLACEHOLDER) {
        id = format!("\0{}", rest);
    }
    LEADING_SLASHES.replace(&id, "/").into_owned()
}

/// Filesystem location of a normalized id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    /// Absolute path, or the id itself when nothing exists on disk
    pub path: String,
    /// Whether the file exists
    pub exists: bool,
}

/// Map an id onto the filesystem.
///
/// `/@fs/` marks an absolute path. Other `/`-anchored ids are tried relative
/// to `root` first, then as absolute paths under it.
pub fn to_file_path(id: &str, root: &str) -> FilePath {
    let root_prefix = with_trailing_slash(root);

    let (mut path, exists) = if let Some(rest) = id.strip_prefix("/@fs/") {
        (format!("/{}", rest), true)
    } else if !id.starts_with(&root_prefix) && id.starts_with('/') {
        let candidate = format!("{}{}", root_prefix, &id[1..]);
        if Path::new(clean_url(&candidate)).exists() {
            (candidate, true)
        } else {
            (id.to_string(), false)
        }
    } else if id.starts_with(&root_prefix) && Path::new(clean_url(id)).exists() {
        (id.to_string(), true)
    } else {
        (id.to_string(), false)
    };

    if path.starts_with("//") {
        path.remove(0);
    }
    FilePath { path, exists }
}

/// Cache key a mock of `path` is stored under
pub fn mock_key(path: &str) -> String {
    format!("{}{}", MOCK_PREFIX, path)
}

/// Blank out a leading `#!` line, keeping offsets intact
pub fn strip_shebang(code: &str) -> String {
    if !code.starts_with("#!") {
        return code.to_string();
    }
    let end = code.find('\n').unwrap_or(code.len());
    format!("{}{}", " ".repeat(end), &code[end..])
}

/// `file://` URL for a module path
pub fn file_url(path: &str) -> String {
    if path.starts_with('/') {
        format!("file://{}", path)
    } else {
        format!("file:///{}", path)
    }
}

/// Directory part of a module path
pub fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(index) => path[..index].to_string(),
        None => ".".to_string(),
    }
}
