use axum::response::Html;

static INDEX_HTML: &str = include_str!("../../static/index.html");

/// Serve a minimal demo page at `GET /` that opens the `/ws` socket and
/// prints incoming frames — useful for poking at the gateway by hand.
pub async fn ui_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}
