//! HTTP-level tests for the inference endpoint, driving the full router
//! in memory with stub embedders standing in for the ONNX extractors.

use std::{collections::BTreeMap, fs, path::Path, sync::Arc};

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use image::RgbImage;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use tract_onnx::prelude::Tensor;

use bonescan_core::{
    CANONICAL_REGIONS, EMBEDDING_DIM, Embedder, ExtractorBank, FusionClassifier, PreprocessConfig,
    Region, ScanAnalyzer,
};
use bonescan_server::{AppState, app};

#[derive(Debug)]
struct ConstantEmbedder;

impl Embedder for ConstantEmbedder {
    fn embed(&self, _input: &Tensor) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.2; EMBEDDING_DIM])
    }
}

fn stub_analyzer(region_root: &Path) -> ScanAnalyzer {
    let mut extractors: BTreeMap<Region, Box<dyn Embedder>> = BTreeMap::new();
    for region in CANONICAL_REGIONS {
        extractors.insert(region, Box::new(ConstantEmbedder));
    }
    let bank = ExtractorBank::from_parts(extractors).expect("complete bank");

    let artifact = json!({
        "kind": "random_forest",
        "n_features": CANONICAL_REGIONS.len() * EMBEDDING_DIM,
        "trees": [{
            "feature": [0, -2, -2],
            "threshold": [0.5, 0.0, 0.0],
            "left": [1, -1, -1],
            "right": [2, -1, -1],
            "value": [[0.0, 0.0], [9.0, 1.0], [1.0, 9.0]]
        }]
    });
    let classifier = FusionClassifier::from_artifact(artifact).expect("valid artifact");

    ScanAnalyzer::from_parts(bank, classifier, PreprocessConfig::default(), region_root)
}

fn write_region_crops(root: &Path, base_name: &str, regions: &[Region]) {
    let mut crop = RgbImage::new(16, 16);
    for pixel in crop.pixels_mut() {
        *pixel = image::Rgb([90, 90, 90]);
    }
    for region in regions {
        let dir = root.join(region.label());
        fs::create_dir_all(&dir).expect("region dir");
        crop.save(dir.join(format!("{base_name}.jpg"))).expect("save crop");
    }
}

struct TestService {
    app: axum::Router,
    upload_dir: TempDir,
    _region_root: TempDir,
}

fn service_with_regions(regions: &[Region]) -> TestService {
    let region_root = TempDir::new().expect("region root");
    write_region_crops(region_root.path(), "patient123", regions);
    let upload_dir = TempDir::new().expect("upload dir");

    let state = AppState {
        analyzer: Arc::new(stub_analyzer(region_root.path())),
        region_root: region_root.path().to_path_buf(),
        upload_dir: upload_dir.path().to_path_buf(),
    };
    TestService {
        app: app(state),
        upload_dir,
        _region_root: region_root,
    }
}

const BOUNDARY: &str = "bonescan-test-boundary";

fn multipart_upload(filename: &str, payload: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}

fn upload_dir_is_empty(dir: &TempDir) -> bool {
    fs::read_dir(dir.path()).expect("read upload dir").next().is_none()
}

#[tokio::test]
async fn predict_returns_probabilities_for_a_complete_scan() {
    let service = service_with_regions(&CANONICAL_REGIONS);

    let response = service
        .app
        .clone()
        .oneshot(multipart_upload("patient123.jpg", b"scan bytes"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let negative = body["probability_negative"].as_f64().expect("negative");
    let positive = body["probability_positive"].as_f64().expect("positive");
    assert!((negative + positive - 1.0).abs() < 1e-9);
    assert_eq!(body["prediction"].as_f64(), Some(positive));
    assert!(upload_dir_is_empty(&service.upload_dir));
}

#[tokio::test]
async fn upload_without_a_file_field_is_a_client_error() {
    let service = service_with_regions(&CANONICAL_REGIONS);

    // a form field with no filename is not a file upload
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request");

    let response = service.app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["detail"].as_str(), Some("no file field in upload"));
}

#[tokio::test]
async fn missing_region_maps_to_bad_request_and_removes_the_upload() {
    let present: Vec<Region> = CANONICAL_REGIONS
        .into_iter()
        .filter(|region| *region != Region::KneeLeftAnt)
        .collect();
    let service = service_with_regions(&present);

    let response = service
        .app
        .clone()
        .oneshot(multipart_upload("patient123.jpg", b"scan bytes"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(
        body["detail"].as_str(),
        Some("missing region image: kneeLANT")
    );
    assert!(upload_dir_is_empty(&service.upload_dir));
}

#[tokio::test]
async fn corrupt_region_image_maps_to_server_error_and_removes_the_upload() {
    let service = service_with_regions(&CANONICAL_REGIONS);
    fs::write(
        service._region_root.path().join("headANT/patient123.jpg"),
        b"definitely not a jpeg",
    )
    .expect("overwrite with garbage");

    let response = service
        .app
        .clone()
        .oneshot(multipart_upload("patient123.jpg", b"scan bytes"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = json_body(response).await;
    let detail = body["detail"].as_str().expect("detail");
    assert!(detail.contains("headANT"), "unexpected detail: {detail}");
    assert!(upload_dir_is_empty(&service.upload_dir));
}

#[tokio::test]
async fn uploads_beyond_the_default_body_limit_are_accepted() {
    let service = service_with_regions(&CANONICAL_REGIONS);

    // 3 MiB, above axum's 2 MB default limit
    let payload = vec![0u8; 3 * 1024 * 1024];
    let response = service
        .app
        .clone()
        .oneshot(multipart_upload("patient123.jpg", &payload))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(upload_dir_is_empty(&service.upload_dir));
}
