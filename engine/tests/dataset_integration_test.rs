//! Integration tests for the dataset service client, against wiremock

use ccube_engine::dataset::{DatasetClient, DatasetError};
use ccube_sdk::errors::{Phase, WorkerError, WorkerErrorExt};
use ccube_sdk::task::{DatasetSelection, LearnTask};
use ccube_sdk::types::{ClassAttributeType, ClassValue, Parameters};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn selection(class_attribute_type: ClassAttributeType, include_header: bool) -> DatasetSelection {
    DatasetSelection {
        dataset_name: "higgs".to_string(),
        training_rate: 0.5,
        fusion_rate: 0.25,
        sample_rate: Some(0.1),
        class_attribute: "label".to_string(),
        class_attribute_type,
        true_class_value: "1".to_string(),
        include_attributes: vec!["m_jj".to_string(), "m_jjj".to_string()],
        exclude_attributes: vec!["weight".to_string()],
        attributes_rate: 1.0,
        random_seed: 42,
        include_header,
    }
}

#[tokio::test]
async fn test_training_sample_query_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dataset/higgs/split/training/sample"))
        .and(query_param("training_rate", "0.5"))
        .and(query_param("sample_rate", "0.1"))
        .and(query_param("sample_number", "7"))
        .and(query_param("class_attribute", "label"))
        .and(query_param("include_attributes", "m_jj"))
        .and(query_param("include_attributes", "m_jjj"))
        .and(query_param("exclude_attributes", "weight"))
        .and(query_param("attributes_rate", "1.0"))
        .and(query_param("random_seed", "42"))
        .and(query_param("include_header", "True"))
        .respond_with(ResponseTemplate::new(200).set_body_string("m_jj,label\n1.5,1\n"))
        .expect(1)
        .mount(&server)
        .await;

    let task = LearnTask {
        job_name: "gpfunction".to_string(),
        task_number: 7,
        selection: selection(ClassAttributeType::Integer, true),
        duration: 60,
        learn_parameters: Parameters::new(),
    };

    let client = DatasetClient::new(format!("{}/", server.uri()));
    let file = client.training_sample(&task).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(file.path()).unwrap(),
        "m_jj,label\n1.5,1\n"
    );
}

#[tokio::test]
async fn test_split_files_are_removed_on_drop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dataset/higgs/split/test"))
        .and(query_param("fusion_rate", "0.25"))
        .respond_with(ResponseTemplate::new(200).set_body_string("a\nb\n"))
        .mount(&server)
        .await;

    let client = DatasetClient::new(server.uri());
    let file = client
        .test_split(&selection(ClassAttributeType::Integer, false))
        .await
        .unwrap();
    let location = file.path().to_path_buf();
    assert!(location.exists());

    drop(file);
    assert!(!location.exists());
}

#[tokio::test]
async fn test_labels_skip_header_when_requested() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dataset/higgs/split/fusion/class"))
        .respond_with(ResponseTemplate::new(200).set_body_string("label\ns\nb\n\ns\n"))
        .mount(&server)
        .await;

    let client = DatasetClient::new(server.uri());
    let labels = client
        .fusion_labels(&selection(ClassAttributeType::Text, true))
        .await
        .unwrap();

    let text = |s: &str| ClassValue::Text(s.to_string());
    assert_eq!(labels, vec![text("s"), text("b"), text("s")]);
}

#[tokio::test]
async fn test_http_error_is_fetch_phase() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = DatasetClient::new(server.uri());
    let error = client
        .fusion_split(&selection(ClassAttributeType::Integer, false))
        .await
        .unwrap_err();

    assert!(matches!(error, DatasetError::Status { .. }));
    assert_eq!(WorkerError::from(error).phase(), Phase::Fetch);
}

#[tokio::test]
async fn test_unreachable_service_is_fetch_phase() {
    // Nothing listens on the tcpmux port
    let client = DatasetClient::new("http://127.0.0.1:1");
    let error = client
        .test_labels(&selection(ClassAttributeType::Integer, false))
        .await
        .unwrap_err();

    assert_eq!(WorkerError::from(error).phase(), Phase::Fetch);
}

#[tokio::test]
async fn test_mistyped_labels_are_codec_phase() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dataset/higgs/split/test/class"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1\nsignal\n"))
        .mount(&server)
        .await;

    let client = DatasetClient::new(server.uri());
    let error = client
        .test_labels(&selection(ClassAttributeType::Integer, false))
        .await
        .unwrap_err();

    assert!(matches!(error, DatasetError::Labels { .. }));
    assert_eq!(WorkerError::from(error).phase(), Phase::Codec);
}
