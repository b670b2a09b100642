#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use vigil_core::{Message, Role, VigilError};
    use vigil_llm::mock::MockProvider;
    use vigil_llm::provider::LlmRequest;
    use vigil_llm::router::ModelRouter;

    fn make_request(model: &str) -> LlmRequest {
        LlmRequest::new(model, vec![Message::text(Role::User, "Hello")])
    }

    fn fast_router() -> ModelRouter {
        ModelRouter::new().with_base_delay(Duration::from_millis(1))
    }

    // ── Router resolve / complete ──────────────────────────────

    #[tokio::test]
    async fn test_complete_with_prefix_resolution() {
        let mock = MockProvider::new("testprovider").with_response("Hello from mock!");
        let mut router = fast_router();
        router.add_provider(Arc::new(mock));
        let req = make_request("testprovider/gpt-5-mini");
        let resp = router.complete(&req, None).await.unwrap();
        assert_eq!(resp.text(), "Hello from mock!");
    }

    #[tokio::test]
    async fn test_bare_model_name_resolution() {
        let mock = MockProvider::new("testprovider").with_response("bare");
        let requests = mock.recorded_requests();
        let mut router = fast_router();
        router.add_provider(Arc::new(mock));
        router.complete(&make_request("test-model"), None).await.unwrap();
        assert_eq!(requests.lock()[0].model, "test-model");
    }

    #[tokio::test]
    async fn test_model_not_found() {
        let router = fast_router();
        let result = router.complete(&make_request("nonexistent/model"), None).await;
        assert!(matches!(result.unwrap_err(), VigilError::ModelNotFound(_)));
        assert!(!router.has_providers());
    }

    #[tokio::test]
    async fn test_failover_to_fallback() {
        let primary = MockProvider::new("primary").with_errors(4, "HTTP 500: Internal Server Error");
        let fallback = MockProvider::new("fallback").with_response("Fallback reply");

        let mut router = fast_router();
        router.add_provider(Arc::new(primary));
        router.add_provider(Arc::new(fallback));

        let req = make_request("primary/model");
        let resp = router.complete(&req, Some("fallback/model")).await.unwrap();
        assert_eq!(resp.text(), "Fallback reply");
    }

    #[tokio::test]
    async fn test_primary_error_surfaces_without_fallback() {
        let mock = MockProvider::new("solo").with_error("Invalid API key");
        let mut router = fast_router();
        router.add_provider(Arc::new(mock));
        let err = router.complete(&make_request("solo/model"), None).await.unwrap_err();
        assert!(matches!(err, VigilError::LlmProvider(ref m) if m == "Invalid API key"));
    }

    // ── Retry logic ────────────────────────────────────────────

    #[tokio::test]
    async fn test_retry_on_transient_error() {
        let mock = MockProvider::new("retry_test")
            .with_error("HTTP 429: rate limited")
            .with_response("success after retry");
        let requests = mock.recorded_requests();

        let mut router = fast_router();
        router.add_provider(Arc::new(mock));

        let resp = router.complete(&make_request("retry_test/model"), None).await.unwrap();
        assert_eq!(resp.text(), "success after retry");
        assert_eq!(requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_no_retry_on_non_transient_error() {
        let mock = MockProvider::new("no_retry").with_error("Invalid API key");
        let requests = mock.recorded_requests();

        let mut router = fast_router();
        router.add_provider(Arc::new(mock));

        assert!(router.complete(&make_request("no_retry/model"), None).await.is_err());
        assert_eq!(requests.lock().len(), 1);
    }

    // ── Circuit breaker ────────────────────────────────────────

    #[tokio::test]
    async fn test_circuit_opens_after_repeated_failures() {
        let mock = MockProvider::new("flaky").with_errors(5, "bad request");
        let requests = mock.recorded_requests();
        let mut router = fast_router();
        router.add_provider(Arc::new(mock));

        for _ in 0..5 {
            assert!(router.complete(&make_request("flaky/model"), None).await.is_err());
        }
        let err = router.complete(&make_request("flaky/model"), None).await.unwrap_err();
        assert!(matches!(err, VigilError::UpstreamUnavailable(_)));
        assert_eq!(requests.lock().len(), 5);
    }

    // ── Request recording ──────────────────────────────────────

    #[tokio::test]
    async fn test_request_recording() {
        let mock = MockProvider::new("recorder").with_response("ok");
        let requests = mock.recorded_requests();

        let mut router = fast_router();
        router.add_provider(Arc::new(mock));

        router.complete(&make_request("recorder/model"), None).await.unwrap();

        let recorded = requests.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].messages[0].text_content(), "Hello");
        assert_eq!(recorded[0].model, "model");
    }

    #[tokio::test]
    async fn test_health_reports_each_provider() {
        let mut router = fast_router();
        router.add_provider(Arc::new(MockProvider::new("a")));
        router.add_provider(Arc::new(MockProvider::new("b")));
        let health = router.health().await;
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(router.provider_names(), vec!["a", "b"]);
    }
}
