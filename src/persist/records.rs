use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::config::ColorTag;
use crate::error::ReminderError;
use crate::posts::{Post, PostId};

/// One element of the persisted array. Every field is optional on the way
/// in so a damaged record can be skipped instead of failing the whole load.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPost {
    id: Option<String>,
    text: Option<String>,
    time: Option<String>,
    #[serde(default)]
    notified: bool,
    color_tag: Option<String>,
}

#[derive(Debug, Default)]
pub struct DecodedPosts {
    pub posts: Vec<Post>,
    pub skipped: Vec<String>,
}

pub fn encode_posts(posts: &[Post]) -> Result<String> {
    let records = posts
        .iter()
        .map(|post| {
            let time = post
                .scheduled_at
                .format(&Rfc3339)
                .with_context(|| format!("formatting time of post {}", post.id))?;
            Ok(StoredPost {
                id: Some(post.id.to_string()),
                text: Some(post.text.clone()),
                time: Some(time),
                notified: post.notified,
                color_tag: Some(post.color.to_string()),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    serde_json::to_string(&records).context("serialising posts")
}

/// Decodes the persisted array. Only a payload that is not a JSON array at
/// all is an error; bad elements are skipped and reported.
pub fn decode_posts(raw: &str, loaded_at: OffsetDateTime) -> Result<DecodedPosts, ReminderError> {
    let values: Vec<Value> = serde_json::from_str(raw)
        .map_err(|err| ReminderError::StorageCorruption(err.to_string()))?;

    let mut decoded = DecodedPosts::default();
    for (index, value) in values.into_iter().enumerate() {
        match decode_record(value, loaded_at) {
            Ok(post) => {
                if decoded.posts.iter().any(|p| p.id == post.id) {
                    decoded
                        .skipped
                        .push(format!("record {index}: duplicate id {}", post.id));
                    continue;
                }
                decoded.posts.push(post);
            }
            Err(reason) => decoded.skipped.push(format!("record {index}: {reason}")),
        }
    }
    Ok(decoded)
}

fn decode_record(value: Value, loaded_at: OffsetDateTime) -> Result<Post, String> {
    let record: StoredPost = serde_json::from_value(value).map_err(|err| err.to_string())?;
    let id = record
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or("missing id")?;
    let text = record
        .text
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
        .ok_or("missing text")?;
    let time = record.time.ok_or("missing time")?;
    let scheduled_at = OffsetDateTime::parse(&time, &Rfc3339)
        .map_err(|err| format!("bad time {time:?}: {err}"))?
        .to_offset(UtcOffset::UTC);
    Ok(Post {
        id: PostId::from(id),
        text,
        scheduled_at,
        // stale flags from an earlier session never suppress a reminder
        notified: false,
        color: ColorTag::from_stored(record.color_tag.as_deref()),
        created_at: loaded_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use time::macros::datetime;

    fn post(id: &str, text: &str, at: OffsetDateTime) -> Post {
        Post {
            id: PostId::from(id),
            text: text.to_owned(),
            scheduled_at: at,
            notified: true,
            color: ColorTag::Mint,
            created_at: at,
        }
    }

    #[test]
    fn persisted_layout_is_stable() -> anyhow::Result<()> {
        let json = encode_posts(&[post(
            "p-1",
            "Ship release",
            datetime!(2024-05-01 12:01:40 UTC),
        )])?;
        insta::assert_snapshot!(
            json,
            @r###"[{"id":"p-1","text":"Ship release","time":"2024-05-01T12:01:40Z","notified":true,"colorTag":"mint"}]"###
        );
        Ok(())
    }

    #[test]
    fn decode_resets_notified_and_normalises_offsets() -> anyhow::Result<()> {
        let raw = r#"[{"id":"a","text":"call mom","time":"2024-05-01T14:00:00+02:00","notified":true}]"#;
        let decoded = decode_posts(raw, datetime!(2024-05-01 10:00 UTC))?;
        assert!(decoded.skipped.is_empty());
        let post = &decoded.posts[0];
        assert!(!post.notified);
        assert_eq!(post.scheduled_at, datetime!(2024-05-01 12:00 UTC));
        assert_eq!(post.color, ColorTag::default());
        Ok(())
    }

    #[test]
    fn decode_skips_incomplete_records() -> anyhow::Result<()> {
        let raw = r#"[
            {"text":"no id","time":"2024-05-01T12:00:00Z"},
            {"id":"b","time":"2024-05-01T12:00:00Z"},
            {"id":"c","text":"  ","time":"2024-05-01T12:00:00Z"},
            {"id":"d","text":"no time"},
            {"id":"e","text":"bad time","time":"tomorrow"},
            {"id":"f","text":42,"time":"2024-05-01T12:00:00Z"},
            "not an object",
            {"id":"g","text":"keeper","time":"2024-05-01T12:00:00Z","colorTag":"rose"},
            {"id":"g","text":"dup","time":"2024-05-01T12:05:00Z"}
        ]"#;
        let decoded = decode_posts(raw, datetime!(2024-05-01 10:00 UTC))?;
        assert_eq!(decoded.posts.len(), 1);
        assert_eq!(decoded.posts[0].text, "keeper");
        assert_eq!(decoded.posts[0].color, ColorTag::Rose);
        assert_eq!(decoded.skipped.len(), 8);
        assert!(decoded.skipped[7].contains("duplicate"));
        Ok(())
    }

    #[test]
    fn non_array_payload_is_corruption() {
        for raw in ["{not json", "{\"id\":\"a\"}", ""] {
            assert_matches!(
                decode_posts(raw, datetime!(2024-05-01 10:00 UTC)),
                Err(ReminderError::StorageCorruption(_))
            );
        }
    }

    #[test]
    fn encode_then_decode_keeps_identity() -> anyhow::Result<()> {
        let at = datetime!(2024-12-31 23:59:59.250 UTC);
        let posts = vec![post("x", "fireworks", at), post("y", "sleep", at)];
        let decoded = decode_posts(&encode_posts(&posts)?, at)?;
        let pairs: Vec<_> = decoded
            .posts
            .iter()
            .map(|p| (p.id.as_str(), p.text.as_str(), p.scheduled_at))
            .collect();
        assert_eq!(pairs, vec![("x", "fireworks", at), ("y", "sleep", at)]);
        Ok(())
    }
}
