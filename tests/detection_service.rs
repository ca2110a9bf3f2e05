//! End-to-end tests for detection entities against a mock detection service.
//!
//! These tests verify that:
//! 1. Frames are posted as multipart `image` uploads
//! 2. Service failures read as a count of zero without escaping
//! 3. Target matches set the count and last detection time
//! 4. Snapshots are written only for frames with matches, and replace
//!    the previous snapshot
//! 5. Matches below the confidence threshold count but are not drawn
//! 6. Boxes outside the frame are clamped instead of aborting the frame

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use mockito::{Matcher, Server, ServerGuard};
use tempfile::TempDir;

use tflite_detect::{
    DetectionService, EntityConfig, FrameOutcome, HttpDetectionClient, ObjectDetectEntity,
    ServiceReply, DATETIME_FORMAT,
};

const DETECTION_PATH: &str = "/v1/object/detection";

/// One person, the sample reply of the service.
const ONE_PERSON: &str =
    r#"{"objects": [{"name":"person","score":0.91,"box":[0.1,0.1,0.5,0.5]}]}"#;

/// Person box in the upper left quadrant.
const PERSON_UPPER_LEFT: &str =
    r#"{"success": true, "objects": [{"name":"person","score":0.91,"box":[0.1,0.1,0.4,0.4]}]}"#;

/// Person box in the lower right quadrant.
const PERSON_LOWER_RIGHT: &str =
    r#"{"success": true, "objects": [{"name":"person","score":0.93,"box":[0.6,0.6,0.9,0.9]}]}"#;

/// Confident person upper left, unsure person lower right, and a car.
const MIXED_CONFIDENCE: &str = r#"{"objects": [
    {"name":"person","score":0.91,"box":[0.1,0.1,0.4,0.4]},
    {"name":"car","score":0.99,"box":[0.0,0.0,1.0,1.0]},
    {"name":"person","score":0.42,"box":[0.6,0.6,0.9,0.9]}
]}"#;

/// Person box whose x_max is far outside the frame.
const RUNAWAY_BOX: &str =
    r#"{"objects": [{"name":"person","score":0.9,"box":[0.0,0.0,1.0,1e9]}]}"#;

const NO_TARGET: &str = r#"{"objects": [{"name":"dog","score":0.88,"box":[0.1,0.1,0.5,0.5]}]}"#;

fn frame() -> Vec<u8> {
    let img = RgbImage::from_pixel(200, 200, Rgb([90, 90, 90]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .expect("encode frame");
    out
}

fn entity_config(server: &ServerGuard, save_dir: Option<&Path>) -> EntityConfig {
    let host_port = server.host_with_port();
    let (host, port) = host_port.rsplit_once(':').expect("host:port");
    EntityConfig {
        ip_address: host.to_string(),
        port: port.parse().expect("port"),
        timeout: Some(Duration::from_secs(10)),
        target: "person".to_string(),
        confidence: 80.0,
        save_file_folder: save_dir.map(Path::to_path_buf),
        label_font: None,
        camera_entity: "camera.front_door".to_string(),
        name: "tflite_front_door".to_string(),
    }
}

fn entity(server: &ServerGuard, save_dir: Option<&Path>) -> ObjectDetectEntity {
    let cfg = entity_config(server, save_dir);
    let client =
        HttpDetectionClient::new(&cfg.ip_address, cfg.port, cfg.timeout).expect("client");
    ObjectDetectEntity::new(cfg, Box::new(client)).expect("entity")
}

fn mock_reply(server: &mut ServerGuard, status: usize, body: &str) -> mockito::Mock {
    server
        .mock("POST", DETECTION_PATH)
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create()
}

fn is_red(pixel: &Rgb<u8>) -> bool {
    pixel[0] > 150 && pixel[1] < 100 && pixel[2] < 100
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn posts_frame_as_multipart_image() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", DETECTION_PATH)
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data; boundary=".to_string()),
        )
        .match_body(Matcher::Regex(r#"name="image""#.to_string()))
        .with_status(200)
        .with_body(r#"{"objects": []}"#)
        .expect(1)
        .create();

    let cfg = entity_config(&server, None);
    let client = HttpDetectionClient::new(&cfg.ip_address, cfg.port, None).expect("client");
    let reply = client.detect(&frame()).expect("detect");

    assert_eq!(reply, ServiceReply::Predictions(vec![]));
    mock.assert();
}

#[test]
fn server_error_reads_as_zero() {
    let mut server = Server::new();
    let _mock = mock_reply(&mut server, 500, "internal error");
    let save_dir = TempDir::new().expect("save dir");
    let mut entity = entity(&server, Some(save_dir.path()));

    let outcome = entity.process_image(&frame());

    assert_eq!(outcome, FrameOutcome::ServiceUnavailable);
    assert_eq!(entity.state(), Some(0));
    assert!(entity.attributes().is_empty());
    assert!(dir_entries(save_dir.path()).is_empty());
}

#[test]
fn malformed_body_is_rejected_without_escaping() {
    let mut server = Server::new();
    let _mock = mock_reply(&mut server, 200, r#"{"predictions": "nope"}"#);
    let mut entity = entity(&server, None);

    assert_eq!(entity.process_image(&frame()), FrameOutcome::Rejected);
    assert_eq!(entity.state(), Some(0));
}

#[test]
fn single_person_sets_count_and_detection_time() {
    let mut server = Server::new();
    let _mock = mock_reply(&mut server, 200, ONE_PERSON);
    let mut entity = entity(&server, None);

    let before = Local::now().naive_local();
    let outcome = entity.process_image(&frame());
    let after = Local::now().naive_local();

    assert_eq!(outcome, FrameOutcome::Counted(1));
    assert_eq!(entity.state(), Some(1));
    assert_eq!(entity.unit_of_measurement(), "person");

    let attrs = entity.attributes();
    assert_eq!(attrs["targets"], serde_json::json!([0.91]));
    let stamp = attrs["last_person_detection"]
        .as_str()
        .expect("timestamp string");
    let parsed = NaiveDateTime::parse_from_str(stamp, DATETIME_FORMAT).expect("timestamp format");
    assert!(parsed >= before - chrono::TimeDelta::seconds(1));
    assert!(parsed <= after);
}

#[test]
fn no_matches_writes_no_snapshot() {
    let mut server = Server::new();
    let _mock = mock_reply(&mut server, 200, NO_TARGET);
    let save_dir = TempDir::new().expect("save dir");
    let mut entity = entity(&server, Some(save_dir.path()));

    assert_eq!(entity.process_image(&frame()), FrameOutcome::Counted(0));
    assert_eq!(entity.state(), Some(0));
    assert!(!entity.attributes().contains_key("last_person_detection"));
    assert!(dir_entries(save_dir.path()).is_empty());
}

#[test]
fn consecutive_matches_keep_only_latest_snapshot() {
    let mut server = Server::new();
    let save_dir = TempDir::new().expect("save dir");
    let mut entity = entity(&server, Some(save_dir.path()));

    let first = mock_reply(&mut server, 200, PERSON_UPPER_LEFT);
    assert_eq!(entity.process_image(&frame()), FrameOutcome::Counted(1));
    first.remove();

    let _second = mock_reply(&mut server, 200, PERSON_LOWER_RIGHT);
    assert_eq!(entity.process_image(&frame()), FrameOutcome::Counted(1));

    assert_eq!(
        dir_entries(save_dir.path()),
        vec!["tflite_front_door_latest_person.jpg".to_string()]
    );

    let saved = image::open(save_dir.path().join("tflite_front_door_latest_person.jpg"))
        .expect("open snapshot")
        .to_rgb8();
    // Bottom edge of the second frame's box: y = 0.9 * 200.
    assert!(is_red(saved.get_pixel(150, 180)));
    // Bottom edge of the first frame's box is not in the file.
    assert!(!is_red(saved.get_pixel(50, 80)));
}

#[test]
fn below_threshold_counts_but_is_not_drawn() {
    let mut server = Server::new();
    let _mock = mock_reply(&mut server, 200, MIXED_CONFIDENCE);
    let save_dir = TempDir::new().expect("save dir");
    let mut entity = entity(&server, Some(save_dir.path()));

    assert_eq!(entity.process_image(&frame()), FrameOutcome::Counted(2));
    assert_eq!(entity.unit_of_measurement(), "persons");
    assert_eq!(
        entity.attributes()["targets"],
        serde_json::json!([0.91, 0.42])
    );

    let saved = image::open(save_dir.path().join("tflite_front_door_latest_person.jpg"))
        .expect("open snapshot")
        .to_rgb8();
    assert!(is_red(saved.get_pixel(50, 80)));
    assert!(!is_red(saved.get_pixel(150, 180)));
    // The car covering the whole frame is not the target.
    assert!(!is_red(saved.get_pixel(1, 100)));
}

#[test]
fn service_recovery_restores_count() {
    let mut server = Server::new();
    let mut entity = entity(&server, None);

    let down = mock_reply(&mut server, 503, "");
    assert_eq!(
        entity.process_image(&frame()),
        FrameOutcome::ServiceUnavailable
    );
    down.remove();

    let _up = mock_reply(&mut server, 200, ONE_PERSON);
    assert_eq!(entity.process_image(&frame()), FrameOutcome::Counted(1));
    assert_eq!(entity.state(), Some(1));
}

#[test]
fn runaway_box_is_clamped_and_saved() {
    let mut server = Server::new();
    let _mock = mock_reply(&mut server, 200, RUNAWAY_BOX);
    let save_dir = TempDir::new().expect("save dir");
    let mut entity = entity(&server, Some(save_dir.path()));

    assert_eq!(entity.process_image(&frame()), FrameOutcome::Counted(1));
    assert_eq!(entity.state(), Some(1));
    assert_eq!(entity.attributes()["targets"], serde_json::json!([0.9]));
    assert_eq!(
        dir_entries(save_dir.path()),
        vec!["tflite_front_door_latest_person.jpg".to_string()]
    );

    let saved = image::open(save_dir.path().join("tflite_front_door_latest_person.jpg"))
        .expect("open snapshot")
        .to_rgb8();
    // The box covers the whole frame; its bottom edge is the last row.
    assert!(is_red(saved.get_pixel(100, 199)));
}
