use super::*;

#[test]
fn add_returns_sequential_indices() {
    let mut adapter = MessageAdapter::new();
    assert_eq!(adapter.add(Message::text("a", "Ann")), 0);
    assert_eq!(adapter.add(Message::text("b", "Ben")), 1);
    assert_eq!(adapter.len(), 2);
    assert_eq!(adapter.messages()[1].text.as_deref(), Some("b"));
}

#[test]
fn row_prefers_photo_when_url_present() {
    let mut adapter = MessageAdapter::new();
    adapter.add(Message::photo("https://x/p.jpg", "Ann"));
    assert_eq!(adapter.row(0), Some(MessageRow::Photo { author: "Ann", url: "https://x/p.jpg" }));
}

#[test]
fn row_renders_missing_text_as_empty_body() {
    let mut adapter = MessageAdapter::new();
    adapter.add(Message { text: None, sender_name: "Ann".into(), photo_url: None });
    assert_eq!(adapter.row(0), Some(MessageRow::Text { author: "Ann", body: "" }));
    assert_eq!(adapter.row(0).map(|r| r.author()), Some("Ann"));
}

#[test]
fn clear_reports_whether_rows_were_removed() {
    let mut adapter = MessageAdapter::new();
    assert!(!adapter.clear());
    adapter.add(Message::text("a", "Ann"));
    assert!(adapter.clear());
    assert!(adapter.is_empty());
    assert_eq!(adapter.rows().count(), 0);
}
