//! Spatial text model
//!
//! Recognized text with positional metadata, as produced by the OCR engine:
//! pages contain lines, lines contain words, and every word carries the
//! raster zones it was read from.

use crate::zone::AngularZone;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recognized word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    /// Recognized text
    pub text: String,

    /// Raster zones the word was read from; well-formed words have exactly one
    pub zones: Vec<AngularZone>,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,
}

impl OcrWord {
    /// Create a word read from a single zone
    pub fn new(text: impl Into<String>, zone: AngularZone) -> Self {
        Self {
            text: text.into(),
            zones: vec![zone],
            confidence: 1.0,
        }
    }

    /// Set the confidence score
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// The word's zone, if it has exactly one
    pub fn single_zone(&self) -> Option<&AngularZone> {
        match self.zones.as_slice() {
            [zone] => Some(zone),
            _ => None,
        }
    }
}

/// A line of recognized words in reading order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub words: Vec<OcrWord>,
}

impl TextLine {
    /// Create a line from words
    pub fn new(words: Vec<OcrWord>) -> Self {
        Self { words }
    }

    /// Words joined with single spaces
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|word| word.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Recognized text of one page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialText {
    /// Page number, 1-based
    pub page: u32,

    /// Lines in reading order
    pub lines: Vec<TextLine>,
}

impl SpatialText {
    /// Create an empty page
    pub fn new(page: u32) -> Self {
        Self {
            page,
            lines: Vec::new(),
        }
    }

    /// Append a line
    pub fn with_line(mut self, line: TextLine) -> Self {
        self.lines.push(line);
        self
    }

    /// Total number of words
    pub fn word_count(&self) -> usize {
        self.lines.iter().map(|line| line.words.len()).sum()
    }

    /// Whether the page has no words
    pub fn is_empty(&self) -> bool {
        self.word_count() == 0
    }

    /// Page text, one line per row
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(TextLine::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mean height of the words' zones, if the page has any
    pub fn average_line_height(&self) -> Option<f64> {
        let heights: Vec<f64> = self
            .lines
            .iter()
            .flat_map(|line| &line.words)
            .flat_map(|word| &word.zones)
            .map(|zone| zone.height.abs() as f64)
            .collect();
        if heights.is_empty() {
            return None;
        }
        Some(heights.iter().sum::<f64>() / heights.len() as f64)
    }
}

/// Recognized text of a whole document, keyed by page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentText {
    pub pages: BTreeMap<u32, SpatialText>,
}

impl DocumentText {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from page results
    pub fn from_pages(pages: impl IntoIterator<Item = SpatialText>) -> Self {
        Self {
            pages: pages.into_iter().map(|page| (page.page, page)).collect(),
        }
    }

    /// Text of one page
    pub fn page(&self, page: u32) -> Option<&SpatialText> {
        self.pages.get(&page)
    }

    /// Store a page, replacing any previous result
    pub fn insert(&mut self, text: SpatialText) {
        self.pages.insert(text.page, text);
    }

    /// Number of pages with text
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
