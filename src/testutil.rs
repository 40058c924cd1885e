//! In-process "Index of" web server for tests.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Redirect, Response};
use tokio::task::JoinHandle;
use url::Url;

#[derive(Clone)]
enum Resource {
    Page(String),
    File(Bytes),
    /// Sent chunked, without a Content-Length.
    Streamed(Vec<Bytes>),
    Status(StatusCode),
    Redirect(String),
}

/// Builder for a synthetic site. Paths are matched verbatim against the
/// request path, so percent-encoded paths must be registered encoded.
#[derive(Default)]
pub struct TestSite {
    resources: HashMap<String, Resource>,
}

impl TestSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves an Apache-style listing at `path` (which should end in `/`).
    /// Entries ending in `/` are subdirectories, everything else is a file.
    pub fn listing(self, path: &str, entries: &[&str]) -> Self {
        let html = listing_html(path, entries);
        self.page(path, &html)
    }

    /// Serves arbitrary HTML at `path`.
    pub fn page(mut self, path: &str, html: &str) -> Self {
        self.resources
            .insert(path.to_string(), Resource::Page(html.to_string()));
        self
    }

    pub fn file(mut self, path: &str, body: Vec<u8>) -> Self {
        self.resources
            .insert(path.to_string(), Resource::File(Bytes::from(body)));
        self
    }

    pub fn streamed_file(mut self, path: &str, chunks: &[&[u8]]) -> Self {
        let chunks = chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect();
        self.resources
            .insert(path.to_string(), Resource::Streamed(chunks));
        self
    }

    pub fn status(mut self, path: &str, status: StatusCode) -> Self {
        self.resources
            .insert(path.to_string(), Resource::Status(status));
        self
    }

    /// Answers `path` with a temporary redirect to `to`.
    pub fn redirect(mut self, path: &str, to: &str) -> Self {
        self.resources
            .insert(path.to_string(), Resource::Redirect(to.to_string()));
        self
    }

    /// Binds an ephemeral port on localhost and starts serving.
    pub async fn serve(self) -> TestServer {
        let state = Arc::new(SiteState {
            resources: self.resources,
            hits: Mutex::new(HashMap::new()),
        });
        let app = Router::new()
            .fallback(serve_resource)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base: Url::parse(&format!("http://{addr}/")).unwrap(),
            state,
            task,
        }
    }
}

struct SiteState {
    resources: HashMap<String, Resource>,
    hits: Mutex<HashMap<String, usize>>,
}

async fn serve_resource(State(state): State<Arc<SiteState>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    match state.resources.get(&path).cloned() {
        Some(Resource::Page(html)) => {
            ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
        }
        Some(Resource::File(bytes)) => bytes.into_response(),
        Some(Resource::Streamed(chunks)) => {
            let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
            Body::from_stream(stream).into_response()
        }
        Some(Resource::Status(status)) => status.into_response(),
        Some(Resource::Redirect(to)) => Redirect::temporary(&to).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// A running [`TestSite`]. The server stops when this is dropped.
pub struct TestServer {
    base: Url,
    state: Arc<SiteState>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }

    /// Requests received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().unwrap().values().sum()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Renders the listing Apache produces for `path`, column-sort links and
/// parent link included.
pub fn listing_html(path: &str, entries: &[&str]) -> String {
    let mut html = format!(
        "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 3.2 Final//EN\">\n\
         <html>\n<head>\n<title>Index of {path}</title>\n</head>\n<body>\n\
         <h1>Index of {path}</h1>\n<pre>\
         <a href=\"?C=N;O=D\">Name</a> <a href=\"?C=M;O=A\">Last modified</a> \
         <a href=\"?C=S;O=A\">Size</a>\n<hr>\
         <a href=\"../\">Parent Directory</a>                             -\n"
    );
    for entry in entries {
        let size = if entry.ends_with('/') { "-" } else { "1.0K" };
        let _ = writeln!(
            html,
            "<a href=\"{entry}\">{entry}</a>    2023-01-15 10:30  {size}"
        );
    }
    html.push_str("<hr></pre>\n</body></html>\n");
    html
}

/// A site with a full directory tree: every directory holds `dirs`
/// subdirectories (down to `depth` levels below the root) and `files` files.
///
/// Returns the site and the path of every file, in no particular order.
pub fn tree_site(depth: usize, dirs: usize, files: usize) -> (TestSite, Vec<String>) {
    fn add(
        site: TestSite,
        path: &str,
        level: usize,
        depth: usize,
        dirs: usize,
        files: usize,
        all: &mut Vec<String>,
    ) -> TestSite {
        let mut entries = Vec::new();
        for f in 0..files {
            entries.push(format!("file{f}.bin"));
            all.push(format!("{path}file{f}.bin"));
        }
        if level < depth {
            for d in 0..dirs {
                entries.push(format!("dir{d}/"));
            }
        }

        let refs: Vec<&str> = entries.iter().map(String::as_str).collect();
        let mut site = site.listing(path, &refs);
        for f in 0..files {
            let file_path = format!("{path}file{f}.bin");
            let body = file_path.as_bytes().to_vec();
            site = site.file(&file_path, body);
        }
        if level < depth {
            for d in 0..dirs {
                site = add(site, &format!("{path}dir{d}/"), level + 1, depth, dirs, files, all);
            }
        }
        site
    }

    let mut all = Vec::new();
    let site = add(TestSite::new(), "/", 0, depth, dirs, files, &mut all);
    (site, all)
}

pub fn file_mtime(path: &Path) -> SystemTime {
    std::fs::metadata(path).unwrap().modified().unwrap()
}
