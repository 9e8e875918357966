//! Speech synthesis interface for the spoken-output side channel.
//!
//! The orchestrator hands complete sentences from `speak` spans to a
//! [`SpeechSynthesizer`] and forwards the returned audio to the caller in
//! chunks. Which TTS vendor sits behind it is not the runtime's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SpeechError;

/// Describes the audio a synthesizer produces. Sent once per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// MIME type, e.g. "audio/mpeg"
    pub mime_type: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            mime_type: "audio/mpeg".into(),
            sample_rate: 24_000,
            channels: 1,
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    fn format(&self) -> AudioFormat {
        AudioFormat::default()
    }

    /// Render one sentence to encoded audio bytes.
    async fn synthesize(&self, sentence: &str) -> Result<Vec<u8>, SpeechError>;
}
