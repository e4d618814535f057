use axum::response::IntoResponse;

// Undocumented liveness probe at the root path.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
