//! Content server with live reload
//!
//! Pages are rendered on request straight from the index, so an edit shows up
//! as soon as the index has it. Browsers are told to reload whenever the
//! index changes.

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::content::{ContentKind, ContentRecord, MarkdownRenderer};
use crate::helpers::{escape_html, link_to, strip_html, time_tag, truncate};
use crate::index::{ContentIndex, IndexChange};
use crate::watcher::ChangeWatcher;
use crate::Site;

/// Live reload script injected into HTML pages
const LIVE_RELOAD_SCRIPT: &str = r#"
<script>
(function() {
    var ws = new WebSocket('ws://' + location.host + '/__livereload');
    ws.onmessage = function(msg) {
        if (msg.data === 'reload') {
            location.reload();
        }
    };
    ws.onclose = function() {
        console.log('Live reload disconnected. Attempting to reconnect...');
        setTimeout(function() { location.reload(); }, 1000);
    };
})();
</script>
</body>
"#;

/// Length of the plain-text excerpt on the blog listing
const EXCERPT_LENGTH: usize = 200;

/// Server state
pub struct AppState {
    pub site_title: String,
    pub index: Arc<ContentIndex>,
    pub renderer: Arc<MarkdownRenderer>,
    pub live_reload: bool,
}

impl AppState {
    /// Wrap `content` in the site layout
    fn layout(&self, title: &str, content: &str) -> String {
        let nav: String = self
            .index
            .entries(ContentKind::Page)
            .iter()
            .map(|page| link_to(&format!("/{}", page.slug), &page.title))
            .collect::<Vec<_>>()
            .join(" ");

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
</head>
<body>
<header>{home} <nav>{nav}</nav></header>
<main>
{content}
</main>
</body>
</html>
"#,
            title = escape_html(title),
            home = link_to("/", &self.site_title),
            nav = nav,
            content = content,
        );

        if self.live_reload {
            inject_live_reload(&html)
        } else {
            html
        }
    }

    /// Render one published record of `kind`, or 404
    fn entry(&self, slug: &str, kind: ContentKind) -> Response {
        let record = match self.index.get_by_slug(slug) {
            Some(record) if record.published && record.kind == kind => record,
            _ => return self.not_found(),
        };

        match self.renderer.render(&record.body) {
            Ok(body) => {
                let content = format!(
                    "<article>\n<h1>{}</h1>\n{}\n{}</article>",
                    escape_html(&record.title),
                    time_tag(&record.date),
                    body
                );
                let title = format!("{} | {}", record.title, self.site_title);
                Html(self.layout(&title, &content)).into_response()
            }
            Err(e) => {
                tracing::error!("Failed to render {:?}: {}", record.source_path, e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Render error").into_response()
            }
        }
    }

    fn excerpt(&self, record: &ContentRecord) -> String {
        let text = match self.renderer.render(&record.body) {
            Ok(html) => strip_html(&html),
            Err(_) => record.body.clone(),
        };
        escape_html(&truncate(text.trim(), EXCERPT_LENGTH, None))
    }

    fn not_found(&self) -> Response {
        let html = self.layout("Not found", "<h1>Not found</h1>");
        (StatusCode::NOT_FOUND, Html(html)).into_response()
    }
}

/// Build the router over `state`
pub fn router(state: Arc<AppState>, static_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/", get(blog_index))
        .route("/blog/:slug", get(blog_entry))
        .route("/api/entries/:kind", get(api_entries))
        .route("/__livereload", get(livereload_handler))
        .route("/:slug", get(page_entry))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server
///
/// Indexes the content directories, starts the change watcher when `watch`
/// is set, and serves until Ctrl+C. The watcher is stopped after the server
/// shuts down.
pub async fn start(site: &Site, ip: &str, port: u16, watch: bool) -> Result<()> {
    let index = site.open_index();

    let watch_handle = if watch && site.config.watch.enable {
        match ChangeWatcher::new(Arc::clone(&index), &site.config.watch).start() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("File watcher error: {}", e);
                None
            }
        }
    } else {
        None
    };

    let state = Arc::new(AppState {
        site_title: site.config.title.clone(),
        index,
        renderer: Arc::new(site.renderer()),
        live_reload: watch_handle.is_some(),
    });
    let app = router(state, &site.static_dir);

    // Parse address - handle "localhost" specially
    let bind_ip = if ip == "localhost" { "127.0.0.1" } else { ip };
    let addr: SocketAddr = format!("{}:{}", bind_ip, port).parse()?;

    println!("Server running at http://{}:{}", ip, port);
    if watch_handle.is_some() {
        println!("Live reload enabled. Watching for changes...");
    }
    println!("Press Ctrl+C to stop.");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = watch_handle {
        handle.stop().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn blog_index(State(state): State<Arc<AppState>>) -> Response {
    let entries = state.index.entries(ContentKind::Blog);

    let mut content = String::from("<ul class=\"entries\">\n");
    for record in &entries {
        content.push_str(&format!(
            "<li>\n{}\n{}\n<p>{}</p>\n</li>\n",
            link_to(&format!("/blog/{}", record.slug), &record.title),
            time_tag(&record.date),
            state.excerpt(record)
        ));
    }
    content.push_str("</ul>");

    Html(state.layout(&state.site_title, &content)).into_response()
}

async fn blog_entry(State(state): State<Arc<AppState>>, Path(slug): Path<String>) -> Response {
    state.entry(&slug, ContentKind::Blog)
}

async fn page_entry(State(state): State<Arc<AppState>>, Path(slug): Path<String>) -> Response {
    state.entry(&slug, ContentKind::Page)
}

/// Published records of one kind as JSON, in listing order
async fn api_entries(State(state): State<Arc<AppState>>, Path(kind): Path<String>) -> Response {
    let kind: ContentKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e })),
            )
                .into_response();
        }
    };

    let entries = state.index.entries(kind);
    let records: Vec<&ContentRecord> = entries.iter().map(|r| r.as_ref()).collect();
    Json(records).into_response()
}

/// WebSocket handler for live reload
async fn livereload_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let changes = state.index.subscribe();
    ws.on_upgrade(move |socket| handle_livereload_socket(socket, changes))
}

/// Tell the client to reload on every index change
async fn handle_livereload_socket(
    mut socket: WebSocket,
    mut changes: broadcast::Receiver<IndexChange>,
) {
    tracing::debug!("Live reload client connected");

    loop {
        tokio::select! {
            result = changes.recv() => {
                match result {
                    Ok(change) => {
                        tracing::debug!("Reloading clients after {:?}", change);
                        if socket.send(Message::Text("reload".to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::debug!("Live reload client disconnected");
}

/// Inject live reload script into HTML content
fn inject_live_reload(html: &str) -> String {
    if html.contains("</body>") {
        html.replacen("</body>", LIVE_RELOAD_SCRIPT, 1)
    } else {
        // If no </body> tag, append to end
        format!("{}{}", html, LIVE_RELOAD_SCRIPT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ContentDirs;
    use std::fs;
    use tempfile::TempDir;

    fn setup(live_reload: bool) -> (TempDir, Arc<AppState>) {
        let temp = TempDir::new().unwrap();
        let blog = temp.path().join("blog");
        let pages = temp.path().join("pages");
        fs::create_dir_all(&blog).unwrap();
        fs::create_dir_all(&pages).unwrap();

        fs::write(
            blog.join("2024-01-01-hello.md"),
            "---\ntitle: Hello <World>\ntype: blog\ndate: 2024-01-01\n---\nSome **bold** text\n",
        )
        .unwrap();
        fs::write(
            blog.join("draft.md"),
            "---\ntitle: Draft\ntype: blog\npublished: false\n---\nNot yet\n",
        )
        .unwrap();
        fs::write(pages.join("about.md"), "---\ntitle: About\n---\nAbout us\n").unwrap();

        let index = Arc::new(ContentIndex::new(ContentDirs::new(
            temp.path(),
            "blog",
            "pages",
        )));
        index.initialize();

        let state = Arc::new(AppState {
            site_title: "Test Site".to_string(),
            index,
            renderer: Arc::new(MarkdownRenderer::new()),
            live_reload,
        });
        (temp, state)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_blog_index_lists_published_posts() {
        let (_temp, state) = setup(false);
        let response = blog_index(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains(r#"<a href="/blog/hello">Hello &lt;World&gt;</a>"#));
        assert!(html.contains("Some bold text"));
        assert!(!html.contains("Draft"));
        assert!(html.contains(r#"<a href="/about">About</a>"#));
        assert!(!html.contains("__livereload"));
    }

    #[tokio::test]
    async fn test_blog_entry_renders_markdown() {
        let (_temp, state) = setup(true);
        let response = blog_entry(State(state), Path("hello".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains("<h1>Hello &lt;World&gt;</h1>"));
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("/__livereload"));
    }

    #[tokio::test]
    async fn test_unpublished_entry_is_not_found() {
        let (_temp, state) = setup(false);
        let response = blog_entry(State(state), Path("draft".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_entry_kind_must_match_route() {
        let (_temp, state) = setup(false);
        let response = blog_entry(State(Arc::clone(&state)), Path("about".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = page_entry(State(state), Path("about".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("About us"));
    }

    #[tokio::test]
    async fn test_api_entries() {
        let (_temp, state) = setup(false);
        let response = api_entries(State(Arc::clone(&state)), Path("blog".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["slug"], "hello");
        assert_eq!(entries[0]["kind"], "blog");
        assert!(entries[0].get("body").is_none());

        let response = api_entries(State(state), Path("newsletter".to_string())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_index_update_is_served_immediately() {
        let (temp, state) = setup(false);
        let path = state.index.dirs().blog.join("2024-01-01-hello.md");
        fs::write(&path, "---\ntitle: Changed\ntype: blog\n---\nNew body\n").unwrap();
        state.index.upsert(&path).unwrap();

        let response = blog_entry(State(state), Path("hello".to_string())).await;
        let html = body_text(response).await;
        assert!(html.contains("<h1>Changed</h1>"));
        drop(temp);
    }

    #[test]
    fn test_inject_live_reload() {
        let html = "<html><body><p>Hi</p></body></html>";
        let injected = inject_live_reload(html);
        assert!(injected.contains("/__livereload"));
        assert!(injected.ends_with("</body>\n</html>"));

        let bare = inject_live_reload("<p>Hi</p>");
        assert!(bare.starts_with("<p>Hi</p>"));
        assert!(bare.contains("/__livereload"));
    }
}
