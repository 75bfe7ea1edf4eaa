use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` and serve a `Router`, as returned by
/// [`setup_metrics_routes`] with any additional routes the caller added.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await
}

/// Adds a `/metrics` Prometheus endpoint to a router. Call last, after all
/// other routes are registered.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();
    router.route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)
        .expect("bucket boundaries are non-empty and finite")
        .install_recorder()
        .expect("a global recorder has not already been installed")
}
