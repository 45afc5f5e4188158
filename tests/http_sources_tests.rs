//! HTTP client tests against mock OpenCost and Prometheus servers.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cluster_billing::allocation::{AllocationError, AllocationSource, OpencostClient, OpencostConfig};
use cluster_billing::metrics::{
    MetricsBackend, MetricsError, PrometheusClient, PrometheusConfig, QueryValue,
};
use cluster_billing::model::{Granularity, Window};

fn january() -> Window {
    Window::month(2024, 1).unwrap()
}

// ============================================================================
// OpenCost allocation API
// ============================================================================

mod opencost_tests {
    use super::*;

    fn client(server: &MockServer) -> OpencostClient {
        OpencostClient::new(OpencostConfig::new(server.uri()).timeout(Duration::from_secs(5)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_sends_window_and_aggregate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/allocation/compute"))
            .and(query_param("window", "2024-01-01T00:00:00Z,2024-02-01T00:00:00Z"))
            .and(query_param("aggregate", "label:user,namespace,controller"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": [{
                    "u1/ns1/deployment:api": {"cpuCost": 1.5, "ramCost": "2.5", "pvCost": null},
                    "u2/ns9/job:batch": {"cpuCost": "NaN", "ramCost": 1.0, "pvCost": 0.5}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let set = client(&server)
            .fetch(&january(), Granularity::Controller)
            .await
            .unwrap();

        assert_eq!(set.len(), 2);
        let api = &set["u1/ns1/deployment:api"];
        assert_eq!((api.cpu_cost, api.ram_cost, api.pv_cost), (1.5, 2.5, 0.0));
        let batch = &set["u2/ns9/job:batch"];
        assert_eq!(batch.cpu_cost, 0.0);
        assert_eq!(batch.pv_cost, 0.5);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/allocation/compute"))
            .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch(&january(), Granularity::Namespace)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::Status { status: 503, ref body } if body == "warming up"));
    }

    #[tokio::test]
    async fn test_multiple_sets_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/allocation/compute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": [{}, {}]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch(&january(), Granularity::Namespace)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::Shape(_)));
    }

    #[tokio::test]
    async fn test_api_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/allocation/compute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 400,
                "message": "bad window"
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch(&january(), Granularity::Container)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::Api { code: 400, .. }));
    }

    #[tokio::test]
    async fn test_trailing_slash_in_base_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/allocation/compute"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 200, "data": [{}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = OpencostClient::new(OpencostConfig::new(format!("{}/", server.uri()))).unwrap();
        let set = client.fetch(&january(), Granularity::Namespace).await.unwrap();
        assert!(set.is_empty());
    }
}

// ============================================================================
// Prometheus instant queries
// ============================================================================

mod prometheus_tests {
    use super::*;

    fn client(server: &MockServer) -> PrometheusClient {
        PrometheusClient::new(PrometheusConfig::new(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_scalar_query_at_window_end() {
        let server = MockServer::start().await;
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param("query", "scalar(vector(0.25))"))
            .and(query_param("time", at.timestamp().to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "scalar", "result": [1706745600, "0.25"]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let value = client(&server).query("scalar(vector(0.25))", at).await.unwrap();
        assert_eq!(value, QueryValue::Scalar(0.25));
    }

    #[tokio::test]
    async fn test_vector_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "vector", "result": [
                    {"metric": {"process_definition": "invoice"}, "value": [1706745600, "3"]},
                    {"metric": {"process_definition": "order"}, "value": [1706745600, "1"]}
                ]}
            })))
            .mount(&server)
            .await;

        let value = client(&server)
            .query("sum by (process_definition) (runs)", Utc::now())
            .await
            .unwrap();
        match value {
            QueryValue::Vector(samples) => {
                let names: Vec<_> = samples.iter().map(|s| s.name()).collect();
                assert_eq!(names, vec!["invoice", "order"]);
                assert_eq!(samples[0].value, 3.0);
            }
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_request_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "errorType": "bad_data",
                "error": "1:1: parse error"
            })))
            .mount(&server)
            .await;

        let err = client(&server).query("(", Utc::now()).await.unwrap_err();
        assert!(matches!(err, MetricsError::Api { ref error_type, .. } if error_type == "bad_data"));
    }

    #[tokio::test]
    async fn test_non_json_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server).query("up", Utc::now()).await.unwrap_err();
        assert!(matches!(err, MetricsError::Status { status: 502, .. }));
    }
}
