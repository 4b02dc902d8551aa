use crate::domain::video::UNKNOWN_CHANNEL_ID;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channels: Vec<ChannelRecord>,
    /// Scraper settings; carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

impl ChannelConfig {
    pub fn enabled(&self) -> impl Iterator<Item = &ChannelRecord> {
        self.channels.iter().filter(|c| c.enabled)
    }

    pub fn is_enabled(&self, channel_id: &str) -> bool {
        self.enabled().any(|c| c.id == channel_id)
    }

    /// Videos feed discovery only from enabled channels, or when attribution is missing.
    pub fn feeds_discovery(&self, channel_id: &str) -> bool {
        channel_id == UNKNOWN_CHANNEL_ID || self.is_enabled(channel_id)
    }

    pub fn enabled_names(&self) -> Vec<String> {
        self.enabled().map(|c| c.name.clone()).collect()
    }
}
