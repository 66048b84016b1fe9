use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How request records are delimited on an endpoint.
///
/// Replies always end with a blank line regardless of the mode; the mode
/// only governs how incoming bytes are split into records.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FrameMode {
    /// Records end at an empty line (`\r\n\r\n` or `\n\n`).
    #[default]
    Blank,
    /// Every line is a record; used by older line-oriented clients.
    Line,
}

/// Errors encountered while parsing a [`FrameMode`] from text.
pub type FrameModeParseError = strum::ParseError;
