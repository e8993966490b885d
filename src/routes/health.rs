use crate::app::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;

pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    if state.publisher.is_connected() {
        (StatusCode::OK, Json(json!({ "status": "ok", "broker": "up" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "broker": "down" })),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::app::build_router;
    use crate::broker::testing::RecordingSink;
    use crate::broker::Publisher;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn probe(router: axum::Router) -> (StatusCode, serde_json::Value) {
        let res = router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn up_while_worker_runs() {
        let (publisher, _worker) = Publisher::spawn(RecordingSink::default(), 1);
        let (status, body) = probe(build_router(publisher)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["broker"], "up");
    }

    #[tokio::test]
    async fn degraded_after_worker_stops() {
        let (publisher, worker) = Publisher::spawn(RecordingSink::default(), 1);
        worker.abort();
        let _ = worker.await;
        let (status, body) = probe(build_router(publisher)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn degraded_when_broker_connection_drops() {
        let sink = RecordingSink::default();
        let (publisher, _worker) = Publisher::spawn(sink.clone(), 1);
        let router = build_router(publisher);

        let (status, _) = probe(router.clone()).await;
        assert_eq!(status, StatusCode::OK);

        sink.drop_connection();
        let (status, body) = probe(router).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["broker"], "down");
    }
}
