//! Greyscale video of rendered frames.
//!
//! Rendered frames are single lines of text. Each character becomes a block
//! of pixels whose brightness reflects how much ink the glyph carries, and
//! the resulting strips are written as a YUV4MPEG2 stream that external
//! transcoders read directly.

use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8PathBuf;

use super::EngineError;

/// File extension of episode videos.
pub const VIDEO_EXTENSION: &str = "y4m";

/// Characters rasterised per frame; longer frames are clipped.
const FRAME_COLUMNS: usize = 64;
const CELL_WIDTH: usize = 8;
const CELL_HEIGHT: usize = 16;
const FRAME_WIDTH: usize = FRAME_COLUMNS * CELL_WIDTH;
const FRAME_HEIGHT: usize = CELL_HEIGHT;
const FRAME_RATE: u32 = 30;

const BACKGROUND: u8 = 16;
const FAINT: u8 = 96;
const SOLID: u8 = 235;

/// Streams frames into a `.y4m` file.
pub(super) struct FrameVideo {
    path: Utf8PathBuf,
    writer: BufWriter<File>,
    frame: Vec<u8>,
}

impl FrameVideo {
    /// Creates `path` and writes the stream header.
    pub(super) fn create(path: Utf8PathBuf) -> Result<Self, EngineError> {
        let file = File::create(&path).map_err(|source| EngineError::recording_io(&path, source))?;
        let mut video = Self {
            path,
            writer: BufWriter::new(file),
            frame: vec![BACKGROUND; FRAME_WIDTH * FRAME_HEIGHT],
        };
        video.write(stream_header().as_bytes())?;
        Ok(video)
    }

    /// Appends one rendered frame.
    pub(super) fn push(&mut self, text: &str) -> Result<(), EngineError> {
        rasterise(text, &mut self.frame);
        self.write(b"FRAME\n")?;
        let frame = std::mem::take(&mut self.frame);
        let written = self.write(&frame);
        self.frame = frame;
        written
    }

    pub(super) fn flush(&mut self) -> Result<(), EngineError> {
        self.writer
            .flush()
            .map_err(|source| EngineError::recording_io(&self.path, source))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.writer
            .write_all(bytes)
            .map_err(|source| EngineError::recording_io(&self.path, source))
    }
}

/// Size in bytes of a stream holding `frames` frames.
#[cfg(test)]
pub(super) fn stream_len(frames: usize) -> usize {
    stream_header().len() + frames * (b"FRAME\n".len() + FRAME_WIDTH * FRAME_HEIGHT)
}

fn stream_header() -> String {
    format!("YUV4MPEG2 W{FRAME_WIDTH} H{FRAME_HEIGHT} F{FRAME_RATE}:1 Ip A1:1 Cmono\n")
}

fn glyph_luma(glyph: char) -> u8 {
    match glyph {
        ' ' => BACKGROUND,
        '-' | '_' | '.' | ',' | ':' | '[' | ']' | '(' | ')' | '+' => FAINT,
        _ => SOLID,
    }
}

fn rasterise(text: &str, frame: &mut [u8]) {
    let lumas: Vec<u8> = text
        .chars()
        .chain(std::iter::repeat(' '))
        .take(FRAME_COLUMNS)
        .map(glyph_luma)
        .collect();
    for row in frame.chunks_exact_mut(FRAME_WIDTH) {
        for (cell, luma) in row.chunks_exact_mut(CELL_WIDTH).zip(&lumas) {
            cell.fill(*luma);
        }
    }
}
