//! Stream-list feed: `{ "streamlist": [ {"name", "description", "url"}, ... ] }`.

use tracing::warn;

use crate::protocol::StreamDescriptor;

/// Intermediate struct matching the feed document.  Kept apart from
/// `StreamDescriptor` so the feed schema can grow without touching the
/// core's record.
#[derive(Debug, serde::Deserialize)]
struct FeedFile {
    streamlist: Vec<FeedStream>,
}

#[derive(Debug, serde::Deserialize)]
struct FeedStream {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
}

pub fn parse_feed_str(content: &str) -> anyhow::Result<Vec<StreamDescriptor>> {
    let file: FeedFile = serde_json::from_str(content)?;
    let streams = file
        .streamlist
        .into_iter()
        .filter(|s| {
            let usable = !s.url.trim().is_empty();
            if !usable {
                warn!("feed: skipping '{}' without url", s.name);
            }
            usable
        })
        .map(|s| StreamDescriptor {
            name: s.name,
            description: s.description,
            url: s.url.trim().to_string(),
        })
        .collect();
    Ok(streams)
}

pub fn load_feed_file(path: &std::path::Path) -> anyhow::Result<Vec<StreamDescriptor>> {
    let content = std::fs::read_to_string(path)?;
    parse_feed_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feed() {
        let streams = parse_feed_str(
            r#"{ "streamlist": [
                {"name": "Feeder", "description": "Garden cam", "url": "https://youtu.be/abc"},
                {"name": "Nest", "url": "https://www.twitch.tv/nest"}
            ] }"#,
        )
        .unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].description, "Garden cam");
        assert_eq!(streams[1].description, "");
        assert_eq!(streams[1].url, "https://www.twitch.tv/nest");
    }

    #[test]
    fn test_parse_feed_rejects_wrong_shape() {
        assert!(parse_feed_str(r#"{ "stations": [] }"#).is_err());
        assert!(parse_feed_str("not json").is_err());
    }

    #[test]
    fn test_entries_without_url_are_skipped() {
        let streams = parse_feed_str(
            r#"{ "streamlist": [
                {"name": "Broken", "url": "  "},
                {"name": "Draft"},
                {"name": "Pond", "url": " https://youtu.be/pond "}
            ] }"#,
        )
        .unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].url, "https://youtu.be/pond");
    }

    #[test]
    fn test_load_feed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streams.json");
        std::fs::write(&path, r#"{"streamlist": []}"#).unwrap();
        assert!(load_feed_file(&path).unwrap().is_empty());
        assert!(load_feed_file(&dir.path().join("missing.json")).is_err());
    }
}
