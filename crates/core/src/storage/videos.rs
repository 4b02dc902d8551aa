use crate::domain::fault::{Fault, RecordKind};
use crate::domain::video::{RawVideo, VideoRecord};
use anyhow::Context;
use serde_json::Value;
use std::path::Path;

/// Validates every entry on its own so one bad video never sinks the feed.
pub fn parse_videos(values: Vec<Value>) -> (Vec<VideoRecord>, Vec<Fault>) {
    let mut videos = Vec::with_capacity(values.len());
    let mut faults = Vec::new();

    for (idx, value) in values.into_iter().enumerate() {
        let key = value
            .get("videoId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{idx}"));

        let parsed = serde_json::from_value::<RawVideo>(value)
            .context("video does not match the feed schema")
            .and_then(RawVideo::validate_and_into_record);
        match parsed {
            Ok(video) => videos.push(video),
            Err(err) => faults.push(Fault::malformed(RecordKind::Video, key, format!("{err:#}"))),
        }
    }

    (videos, faults)
}

pub fn load_videos(path: &Path) -> anyhow::Result<(Vec<VideoRecord>, Vec<Fault>)> {
    let values: Vec<Value> = super::read_json(path)
        .with_context(|| format!("video feed {} must be a JSON array", path.display()))?;
    Ok(parse_videos(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bad_videos_are_reported_not_fatal() {
        let (videos, faults) = parse_videos(vec![
            json!({"videoId": "a", "channelId": "c", "channelName": "C", "publishedAt": "2025-11-01", "tickersMentioned": ["AAPL"]}),
            json!({"videoId": "b", "publishedAt": "not a date"}),
            json!("just a string"),
            json!({"videoId": "d", "publishedAt": "2025-11-02"}),
        ]);

        assert_eq!(videos.len(), 2);
        assert_eq!(faults.len(), 2);
        assert!(matches!(&faults[0], Fault::MalformedRecord { key, .. } if key == "b"));
        assert!(matches!(&faults[1], Fault::MalformedRecord { key, .. } if key == "#2"));
        assert_eq!(videos[1].channel_name, "Unknown");
    }
}
