use crate::inbox::*;
use crate::protocol::{ChatMessage, UserId};
use chrono::NaiveDate;

fn at(day: u32, hour: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 9, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .expect("valid timestamp")
}

fn received(sender: i64, content: &str, day: u32, hour: u32) -> ChatMessage {
    ChatMessage::new(UserId(sender), UserId(1), content).with_timestamp(at(day, hour))
}

#[test]
fn test_empty_inbox() {
    assert!(latest_per_sender(&[]).is_empty());
}

#[test]
fn test_keeps_latest_per_sender() {
    let messages = vec![
        received(2, "is it available?", 1, 9),
        received(3, "hello", 1, 10),
        received(2, "I can pick it up friday", 2, 8),
        received(3, "older", 1, 7),
    ];

    let entries = latest_per_sender(&messages);
    assert_eq!(entries.len(), 2);

    let from_two = entries.iter().find(|e| e.sender_id == UserId(2)).expect("sender 2");
    assert_eq!(from_two.last_message.content, "I can pick it up friday");

    let from_three = entries.iter().find(|e| e.sender_id == UserId(3)).expect("sender 3");
    assert_eq!(from_three.last_message.content, "hello");
}

#[test]
fn test_sorted_newest_first() {
    let messages = vec![
        received(4, "a", 1, 9),
        received(5, "b", 3, 9),
        received(6, "c", 2, 9),
    ];

    let order: Vec<UserId> = latest_per_sender(&messages).iter().map(|e| e.sender_id).collect();
    assert_eq!(order, vec![UserId(5), UserId(6), UserId(4)]);
}

#[test]
fn test_untimestamped_sorts_last() {
    let messages = vec![
        ChatMessage::new(UserId(7), UserId(1), "no time"),
        received(8, "timed", 1, 1),
    ];

    let entries = latest_per_sender(&messages);
    assert_eq!(entries[0].sender_id, UserId(8));
    assert_eq!(entries[1].sender_id, UserId(7));
}

#[test]
fn test_display_name_falls_back_to_id() {
    let mut named = received(2, "hi", 1, 1);
    named.sender_name = Some("Avery".to_string());
    let unnamed = received(3, "hi", 1, 2);

    let entries = latest_per_sender(&[named, unnamed]);
    let names: Vec<String> = entries.iter().map(|e| e.display_name()).collect();
    assert_eq!(names, vec!["User 3".to_string(), "Avery".to_string()]);
}
