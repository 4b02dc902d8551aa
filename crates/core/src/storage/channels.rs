use crate::domain::channel::ChannelConfig;
use crate::domain::fault::Fault;
use std::collections::BTreeSet;
use std::path::Path;

/// Any problem here is a configuration fault: the run must stop before touching the catalog.
pub fn load_channel_config(path: &Path) -> anyhow::Result<ChannelConfig> {
    let config: ChannelConfig = super::read_json(path).map_err(|e| {
        Fault::Config(format!(
            "channel configuration {} unusable: {e:#}",
            path.display()
        ))
    })?;
    validate_channel_config(&config)?;
    Ok(config)
}

pub fn validate_channel_config(config: &ChannelConfig) -> Result<(), Fault> {
    let mut ids = BTreeSet::new();
    for channel in &config.channels {
        if channel.id.trim().is_empty() || channel.name.trim().is_empty() {
            return Err(Fault::Config(
                "every channel needs a non-empty id and name".to_string(),
            ));
        }
        if !ids.insert(channel.id.as_str()) {
            return Err(Fault::Config(format!("duplicate channel id {}", channel.id)));
        }
    }

    if config.enabled().next().is_none() {
        return Err(Fault::Config("no enabled channels configured".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_config_with_settings_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        let body = json!({
            "channels": [
                {"id": "joseph-carlson", "name": "The Joseph Carlson Show", "handle": "@josephcarlsonshow",
                 "url": "https://www.youtube.com/@josephcarlsonshow/videos", "enabled": true},
                {"id": "other", "name": "Other", "enabled": false, "description": "paused"}
            ],
            "settings": {"maxVideosPerChannel": 5}
        });
        std::fs::write(&path, body.to_string()).unwrap();

        let config = load_channel_config(&path).unwrap();
        assert_eq!(config.enabled_names(), vec!["The Joseph Carlson Show"]);
        assert!(config.is_enabled("joseph-carlson"));
        assert!(!config.feeds_discovery("other"));
        assert!(!config.feeds_discovery("stranger"));
        assert!(config.feeds_discovery("unknown"));
    }

    #[test]
    fn missing_or_empty_config_is_a_config_fault() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        let err = load_channel_config(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<Fault>(), Some(Fault::Config(_))));

        std::fs::write(&path, r#"{"channels": [{"id": "a", "name": "A", "enabled": false}]}"#).unwrap();
        let err = load_channel_config(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<Fault>(), Some(Fault::Config(_))));
    }
}
