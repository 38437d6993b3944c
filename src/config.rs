//! Engine Configuration

use serde::{Deserialize, Serialize};

/// Order in which the update phase visits live objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum EvaluationOrder {
    /// Insertion order
    #[default]
    Stable,

    /// A fresh seeded permutation every frame. Results must not change;
    /// used to check that objects do not depend on sibling order.
    Shuffled { seed: u64 },
}

/// Audio format handed to audio-bearing objects at creation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: f64,
    pub block_size: usize,
    pub channels: u16,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_size: 512,
            channels: 2,
        }
    }
}

/// Configuration shared by a [`crate::Patch`] and its [`crate::TickEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub order: EvaluationOrder,
    pub audio: AudioSettings,
    /// Capacity of each editor's edit queue
    pub editor_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order: EvaluationOrder::Stable,
            audio: AudioSettings::default(),
            editor_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, order: EvaluationOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_audio(mut self, audio: AudioSettings) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_editor_capacity(mut self, capacity: usize) -> Self {
        self.editor_capacity = capacity.max(1);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Missing fields fall back to their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.order, EvaluationOrder::Stable);
        assert_eq!(config.audio.block_size, 512);
        assert_eq!(config.editor_capacity, 256);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            EngineConfig::from_json(r#"{ "order": { "mode": "shuffled", "seed": 7 } }"#).unwrap();
        assert_eq!(config.order, EvaluationOrder::Shuffled { seed: 7 });
        assert_eq!(config.audio, AudioSettings::default());

        let config = EngineConfig::from_json(r#"{ "audio": { "sample_rate": 48000.0 } }"#).unwrap();
        assert_eq!(config.audio.sample_rate, 48000.0);
        assert_eq!(config.audio.channels, 2);
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::new()
            .with_order(EvaluationOrder::Shuffled { seed: 42 })
            .with_editor_capacity(0);
        assert_eq!(config.editor_capacity, 1);

        let back = EngineConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
