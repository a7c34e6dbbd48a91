//! Wire-level parsing rejections.

use collabkit::protocol::parse_client_message;

#[tokio::test]
async fn dangerous_path_segments_are_rejected_before_parsing_succeeds() {
    let raw = r#"{"type":"operation","room_id":"r1","operation":{"id":"1","origin":"a","path":["__proto__"],"kind":"set","value":1}}"#;
    assert!(parse_client_message(raw).is_err());
}
