use crate::core::domain::gift::RawGiftEvent;
use crate::core::domain::source_event::{CommentEvent, SourceEvent};
use crate::utils::error::{RelayError, RelayResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireUser {
    #[serde(alias = "uniqueId", alias = "unique_id", alias = "userId", alias = "user_id")]
    id: String,
    #[serde(alias = "nickname", alias = "displayName", alias = "display_name")]
    name: String,
    #[serde(
        alias = "avatarUrl",
        alias = "avatarURL",
        alias = "avatar_url",
        alias = "profilePictureUrl"
    )]
    avatar: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireGiftInfo {
    name: String,
    #[serde(alias = "imageUrl", alias = "imageURL", alias = "image")]
    image_url: String,
    #[serde(alias = "diamondCount", alias = "diamonds")]
    diamond_count: u64,
    #[serde(alias = "repeatCount")]
    repeat_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireGift {
    #[serde(default)]
    user: WireUser,
    #[serde(default)]
    gift: WireGiftInfo,
    /// Some payloads carry the repeat count next to `gift` rather than inside it.
    #[serde(default, alias = "repeatCount")]
    repeat_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireComment {
    #[serde(default)]
    user: WireUser,
    #[serde(default, alias = "text")]
    comment: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireFrame {
    Gift(WireGift),
    Comment(WireComment),
    #[serde(other)]
    Other,
}

/// Parses one text frame from the live-event source.
///
/// Returns `Ok(None)` for frame types the relay does not handle (likes, joins, follows...).
///
/// # Errors
///
/// Returns `RelayError::MalformedEvent` when the frame is not valid JSON or a gift lacks a
/// donor, a gift name or a positive repeat count.
pub fn parse_frame(text: &str, received_at: DateTime<Utc>) -> RelayResult<Option<SourceEvent>> {
    let frame: WireFrame = serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedEvent(format!("undecodable frame: {e}")))?;

    match frame {
        WireFrame::Gift(wire) => {
            let repeat_count = wire
                .gift
                .repeat_count
                .or(wire.repeat_count)
                .ok_or_else(|| {
                    RelayError::MalformedEvent(format!(
                        "gift {:?} from {:?} has no repeat count",
                        wire.gift.name, wire.user.id
                    ))
                })?;
            let gift = RawGiftEvent::new(
                wire.user.id,
                wire.user.name,
                wire.user.avatar,
                wire.gift.name,
                wire.gift.image_url,
                wire.gift.diamond_count,
                repeat_count,
                received_at,
            )?;
            Ok(Some(SourceEvent::Gift(gift)))
        }
        WireFrame::Comment(wire) => {
            if wire.user.id.trim().is_empty() {
                return Err(RelayError::MalformedEvent(
                    "comment without a user id".into(),
                ));
            }
            let display_name = if wire.user.name.trim().is_empty() {
                wire.user.id.clone()
            } else {
                wire.user.name
            };
            Ok(Some(SourceEvent::Comment(CommentEvent {
                donor_id: wire.user.id,
                display_name,
                comment: wire.comment,
                received_at,
            })))
        }
        WireFrame::Other => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> RelayResult<Option<SourceEvent>> {
        parse_frame(text, Utc::now())
    }

    #[test]
    fn test_parse_gift_with_camel_case_fields() {
        let text = r#"{
            "type": "gift",
            "user": {"uniqueId": "u1", "nickname": "Alice", "avatarUrl": "https://a/u1.png"},
            "gift": {"name": "Rose", "imageUrl": "https://g/rose.png", "diamondCount": 1, "repeatCount": 5}
        }"#;

        let Some(SourceEvent::Gift(gift)) = parse(text).unwrap() else {
            panic!("expected a gift");
        };
        assert_eq!(gift.donor_id, "u1");
        assert_eq!(gift.donor_display_name, "Alice");
        assert_eq!(gift.donor_avatar_url, "https://a/u1.png");
        assert_eq!(gift.gift_name, "Rose");
        assert_eq!(gift.gift_image_url, "https://g/rose.png");
        assert_eq!(gift.unit_diamond_value, 1);
        assert_eq!(gift.repeat_count, 5);
    }

    #[test]
    fn test_parse_gift_with_snake_case_and_outer_repeat_count() {
        let text = r#"{
            "type": "gift",
            "user": {"unique_id": "u2", "display_name": "Bob"},
            "gift": {"name": "Lion", "image_url": "https://g/lion.png", "diamond_count": 29999},
            "repeat_count": 1
        }"#;

        let Some(SourceEvent::Gift(gift)) = parse(text).unwrap() else {
            panic!("expected a gift");
        };
        assert_eq!(gift.donor_id, "u2");
        assert_eq!(gift.repeat_count, 1);
        assert_eq!(gift.diamonds(), 29999);
        assert_eq!(gift.donor_avatar_url, "");
    }

    #[test]
    fn test_missing_nickname_falls_back_to_id() {
        let text = r#"{"type":"gift","user":{"uniqueId":"u3"},"gift":{"name":"Rose","repeatCount":1}}"#;
        let Some(SourceEvent::Gift(gift)) = parse(text).unwrap() else {
            panic!("expected a gift");
        };
        assert_eq!(gift.donor_display_name, "u3");
        assert_eq!(gift.unit_diamond_value, 0);
    }

    #[test]
    fn test_gift_without_repeat_count_is_malformed() {
        let text = r#"{"type":"gift","user":{"uniqueId":"u1"},"gift":{"name":"Rose","diamondCount":1}}"#;
        let err = parse(text).unwrap_err();
        assert!(matches!(err, RelayError::MalformedEvent(ref msg) if msg.contains("repeat count")));
    }

    #[test]
    fn test_gift_with_zero_repeat_count_is_malformed() {
        let text = r#"{"type":"gift","user":{"uniqueId":"u1"},"gift":{"name":"Rose","repeatCount":0}}"#;
        assert!(matches!(parse(text), Err(RelayError::MalformedEvent(_))));
    }

    #[test]
    fn test_gift_without_donor_is_malformed() {
        let text = r#"{"type":"gift","gift":{"name":"Rose","repeatCount":1}}"#;
        assert!(matches!(parse(text), Err(RelayError::MalformedEvent(_))));
    }

    #[test]
    fn test_parse_comment() {
        let text = r#"{"type":"comment","user":{"uniqueId":"u1","nickname":"Alice"},"comment":"hello"}"#;
        let Some(SourceEvent::Comment(comment)) = parse(text).unwrap() else {
            panic!("expected a comment");
        };
        assert_eq!(comment.donor_id, "u1");
        assert_eq!(comment.display_name, "Alice");
        assert_eq!(comment.comment, "hello");
    }

    #[test]
    fn test_unknown_frame_types_are_ignored() {
        assert!(parse(r#"{"type":"like","count":12}"#).unwrap().is_none());
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(matches!(parse("not json"), Err(RelayError::MalformedEvent(_))));
        assert!(matches!(parse(r#"{"user":{}}"#), Err(RelayError::MalformedEvent(_))));
    }
}
