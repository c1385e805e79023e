use api_contract::{ApiResponse, HistoryQuery, ThresholdRequest};

#[test]
fn api_response_success() {
    let response = ApiResponse::success("ok");
    assert!(response.success);
    assert!(response.data.is_some());
    assert!(response.error.is_none());
    let value = serde_json::to_value(&response).expect("serialize");
    assert!(value.get("code").is_none());
}

#[test]
fn api_response_error() {
    let response = ApiResponse::<()>::error("INVALID.REQUEST", "bad input");
    assert!(!response.success);
    let value = serde_json::to_value(&response).expect("serialize");
    assert_eq!(value["code"], "INVALID.REQUEST");
    assert_eq!(value["error"], "bad input");
    assert!(value.get("data").is_none());
}

#[test]
fn history_query_requires_device_for_secondary_filters() {
    let query = HistoryQuery {
        field_name: Some("temperature".to_string()),
        ..HistoryQuery::default()
    };
    assert!(query.validate().is_err());

    let query = HistoryQuery {
        start: Some(10),
        ..HistoryQuery::default()
    };
    assert!(query.validate().is_err());

    let query = HistoryQuery {
        device_id: Some(1),
        field_name: Some(" temperature ".to_string()),
        start: Some(10),
        end: Some(20),
        limit: None,
    };
    let filter = query.validate().expect("valid");
    assert_eq!(filter.field_name.as_deref(), Some("temperature"));
    assert_eq!(filter.limit, 1000);
}

#[test]
fn history_query_rejects_inverted_range() {
    let query = HistoryQuery {
        device_id: Some(1),
        start: Some(20),
        end: Some(10),
        ..HistoryQuery::default()
    };
    assert!(query.validate().is_err());
}

#[test]
fn threshold_request_validates_operator() {
    let payload = r#"{"device_id":1,"field_name":"temperature","operator":">","value":40}"#;
    let req: ThresholdRequest = serde_json::from_str(payload).expect("parse");
    assert!(req.validate().is_ok());
    assert!(req.enabled);
    assert_eq!(req.severity, "warning");

    let payload = r#"{"device_id":1,"field_name":"temperature","operator":"~","value":40}"#;
    let req: ThresholdRequest = serde_json::from_str(payload).expect("parse");
    assert!(req.validate().is_err());
}

#[test]
fn history_limit_is_capped() {
    let query = HistoryQuery {
        device_id: Some(1),
        limit: Some(50_000),
        ..HistoryQuery::default()
    };
    assert_eq!(query.validate().expect("valid").limit, 10_000);
}
