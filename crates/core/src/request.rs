//! Generation request parameters and bound validation.
//!
//! The parameters are opaque to the engine: they are forwarded as-is to
//! the generation service. Only numeric bounds are checked here, before
//! any network call is made.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

pub const MIN_TEMPO_BPM: u16 = 60;
pub const MAX_TEMPO_BPM: u16 = 200;

pub const MIN_LENGTH_NOTES: u16 = 50;
pub const MAX_LENGTH_NOTES: u16 = 500;

pub const MIN_TEMPERATURE: f64 = 0.1;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Highest MIDI note number accepted in a seed prompt.
pub const MAX_MIDI_NOTE: u8 = 127;

// ---------------------------------------------------------------------------
// Enumerated parameters
// ---------------------------------------------------------------------------

/// Musical genre understood by the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    #[default]
    Classical,
    Jazz,
    Rock,
    Pop,
    Electronic,
}

impl Genre {
    pub const ALL: [Genre; 5] = [
        Genre::Classical,
        Genre::Jazz,
        Genre::Rock,
        Genre::Pop,
        Genre::Electronic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Classical => "classical",
            Genre::Jazz => "jazz",
            Genre::Rock => "rock",
            Genre::Pop => "pop",
            Genre::Electronic => "electronic",
        }
    }
}

impl std::str::FromStr for Genre {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Genre::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown genre '{s}'. Must be one of: {}",
                    Genre::ALL.map(|g| g.as_str()).join(", ")
                ))
            })
    }
}

/// One of the twelve pitch classes, serialized with sharps (`"C#"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PitchClass {
    #[default]
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

/// Tonal mode of the composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Free,
    Major,
    Minor,
}

// ---------------------------------------------------------------------------
// GenerationRequest
// ---------------------------------------------------------------------------

/// Parameters for a single generation job.
///
/// Field names on the wire follow the generation service (`tempo`,
/// `length`, `top_k`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub genre: Genre,
    #[serde(rename = "tempo")]
    pub tempo_bpm: u16,
    #[serde(rename = "length")]
    pub length_notes: u16,
    pub temperature: f64,
    pub top_k: u32,
    pub key: PitchClass,
    pub mode: Mode,
    /// Optional seed melody as MIDI note numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Vec<u8>>,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            genre: Genre::default(),
            tempo_bpm: 120,
            length_notes: 100,
            temperature: 0.8,
            top_k: 50,
            key: PitchClass::default(),
            mode: Mode::default(),
            prompt: None,
        }
    }
}

impl GenerationRequest {
    /// Check every bounded field, reporting the first violation.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_tempo(self.tempo_bpm)?;
        validate_length(self.length_notes)?;
        validate_temperature(self.temperature)?;
        validate_top_k(self.top_k)?;
        if let Some(prompt) = &self.prompt {
            validate_prompt(prompt)?;
        }
        Ok(())
    }
}

pub fn validate_tempo(tempo_bpm: u16) -> Result<(), CoreError> {
    if (MIN_TEMPO_BPM..=MAX_TEMPO_BPM).contains(&tempo_bpm) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "tempo must be between {MIN_TEMPO_BPM} and {MAX_TEMPO_BPM} BPM, got {tempo_bpm}"
        )))
    }
}

pub fn validate_length(length_notes: u16) -> Result<(), CoreError> {
    if (MIN_LENGTH_NOTES..=MAX_LENGTH_NOTES).contains(&length_notes) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "length must be between {MIN_LENGTH_NOTES} and {MAX_LENGTH_NOTES} notes, got {length_notes}"
        )))
    }
}

/// NaN never satisfies a range check, so it is rejected here as well.
pub fn validate_temperature(temperature: f64) -> Result<(), CoreError> {
    if (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "temperature must be between {MIN_TEMPERATURE} and {MAX_TEMPERATURE}, got {temperature}"
        )))
    }
}

pub fn validate_top_k(top_k: u32) -> Result<(), CoreError> {
    if top_k == 0 {
        return Err(CoreError::Validation(
            "top_k must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_prompt(prompt: &[u8]) -> Result<(), CoreError> {
    match prompt.iter().find(|&&note| note > MAX_MIDI_NOTE) {
        Some(note) => Err(CoreError::Validation(format!(
            "prompt note {note} is outside the MIDI range 0-{MAX_MIDI_NOTE}"
        ))),
        None => Ok(()),
    }
}
