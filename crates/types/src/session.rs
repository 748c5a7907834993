//! Realtime session parameters sent upstream in the initial `session.update`.

use serde::{Deserialize, Serialize};

/// Optional input-audio transcription settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTranscription {
    /// Transcription model, e.g. `whisper-1`.
    pub model: String,
}

/// Session parameters. Unset fields are omitted from the wire payload so the
/// upstream keeps its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscription>,
}
