//! Word highlights built from OCR
//!
//! Each recognized word becomes a [`WordHighlight`] tagged with the line it
//! came from. Building a page is resumable: a build interrupted by
//! cancellation keeps what it materialized and the next build continues from
//! the first missing word.

use crate::error::EngineError;
use crate::text::SpatialText;
use crate::zone::{merge_zones, AngularZone};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use zonefit_cache::{PageKeyedStore, PageStore};
use zonefit_scheduler::CancellationToken;

/// Unique identifier for a highlight
pub type HighlightId = uuid::Uuid;

/// What the highlights are used for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightMode {
    /// Words are redaction targets; their text is not kept
    #[default]
    Redaction,

    /// Words are selectable text; each highlight keeps its recognized text
    HighlightText,
}

impl HighlightMode {
    /// Whether highlights in this mode retain their text
    pub fn retains_text(self) -> bool {
        matches!(self, HighlightMode::HighlightText)
    }
}

impl std::str::FromStr for HighlightMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redaction" => Ok(HighlightMode::Redaction),
            "highlight_text" | "highlight-text" | "text" => Ok(HighlightMode::HighlightText),
            _ => Err(()),
        }
    }
}

/// Line identifier shared by the words of one source line
pub fn line_id(page: u32, line_index: usize) -> u64 {
    ((page as u64) << 16) | (line_index as u64 & 0xFFFF)
}

/// A highlight covering one recognized word
#[derive(Debug, Clone, PartialEq)]
pub struct WordHighlight {
    pub id: HighlightId,
    pub zone: AngularZone,
    pub page: u32,
    /// See [`line_id`]
    pub line_id: u64,
    /// Position of the word within its line
    pub word_index: usize,
}

#[derive(Debug, Default)]
struct PageHighlights {
    highlights: Vec<WordHighlight>,
    next_line: usize,
    next_word: usize,
    complete: bool,
}

/// Highlights of one page being built away from the store
///
/// Taken with [`HighlightStore::begin_page`], filled by [`PageBuild::run`]
/// without holding the store, and folded back with
/// [`HighlightStore::commit`]. A build whose store was invalidated in the
/// meantime is discarded on commit.
#[derive(Debug)]
pub struct PageBuild {
    page: u32,
    epoch: u64,
    retains_text: bool,
    complete: bool,
    next_line: usize,
    next_word: usize,
    built: Vec<WordHighlight>,
    texts: Vec<(HighlightId, String)>,
}

impl PageBuild {
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Materialize every word not built yet
    ///
    /// Stops at cancellation or at the first word that does not come from
    /// exactly one raster zone; words built before that are kept for the
    /// commit.
    pub fn run(&mut self, text: &SpatialText, token: &CancellationToken) -> Result<(), EngineError> {
        if self.complete {
            return Ok(());
        }
        let page = self.page;

        for (line_index, line) in text.lines.iter().enumerate().skip(self.next_line) {
            token.check()?;
            let first_word = if line_index == self.next_line {
                self.next_word
            } else {
                0
            };

            for (word_index, word) in line.words.iter().enumerate().skip(first_word) {
                let zone = word.single_zone().ok_or(EngineError::CorruptOcrWord {
                    page,
                    line: line_index,
                    word: word_index,
                    zones: word.zones.len(),
                })?;
                let highlight = WordHighlight {
                    id: uuid::Uuid::new_v4(),
                    zone: AngularZone { page, ..*zone },
                    page,
                    line_id: line_id(page, line_index),
                    word_index,
                };
                if self.retains_text {
                    self.texts.push((highlight.id, word.text.clone()));
                }
                self.built.push(highlight);
                self.next_word = word_index + 1;
            }

            self.next_line = line_index + 1;
            self.next_word = 0;
        }

        self.complete = true;
        Ok(())
    }
}

/// Highlight sets for every page of a document
#[derive(Debug, Default)]
pub struct HighlightStore {
    mode: HighlightMode,
    pages: PageStore<PageHighlights>,
    texts: HashMap<HighlightId, String>,
    /// Bumped whenever highlights are dropped, so older builds can tell
    epoch: u64,
}

impl HighlightStore {
    /// Create an empty store
    pub fn new(mode: HighlightMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> HighlightMode {
        self.mode
    }

    /// Switch modes, discarding every highlight built under the old one
    pub fn set_mode(&mut self, mode: HighlightMode) {
        if mode != self.mode {
            self.mode = mode;
            self.clear();
        }
    }

    /// Start building `page` from where the last build stopped
    pub fn begin_page(&self, page: u32) -> PageBuild {
        let (complete, next_line, next_word) = self
            .pages
            .get(page)
            .map(|entry| (entry.complete, entry.next_line, entry.next_word))
            .unwrap_or_default();
        PageBuild {
            page,
            epoch: self.epoch,
            retains_text: self.mode.retains_text(),
            complete,
            next_line,
            next_word,
            built: Vec::new(),
            texts: Vec::new(),
        }
    }

    /// Fold a build back in and return every highlight of its page
    ///
    /// Partial builds are committed too, so the next build resumes after
    /// them. A build begun before the store was last invalidated is dropped
    /// and yields nothing.
    pub fn commit(&mut self, build: PageBuild) -> Vec<WordHighlight> {
        let page = build.page;
        if build.epoch != self.epoch {
            tracing::debug!(page, "dropping highlights built before invalidation");
            return Vec::new();
        }

        let entry = self.pages.get_or_insert_with(page, PageHighlights::default);
        let finished = build.complete && !entry.complete;
        entry.highlights.extend(build.built);
        entry.next_line = build.next_line;
        entry.next_word = build.next_word;
        entry.complete = build.complete;
        self.texts.extend(build.texts);

        if finished {
            tracing::debug!(page, words = entry.highlights.len(), "built page highlights");
        }
        entry.highlights.clone()
    }

    /// Build (or finish building) the highlights of one page
    ///
    /// Words already materialized by an earlier, interrupted build are kept
    /// as they are. Fails on the first word that does not come from exactly
    /// one raster zone.
    pub fn build_page(
        &mut self,
        text: &SpatialText,
        token: &CancellationToken,
    ) -> Result<Vec<WordHighlight>, EngineError> {
        let mut build = self.begin_page(text.page);
        let result = build.run(text, token);
        let highlights = self.commit(build);
        result.map(|()| highlights)
    }

    /// Highlights built so far for `page`
    pub fn highlights(&self, page: u32) -> Vec<WordHighlight> {
        self.pages
            .get(page)
            .map(|entry| entry.highlights.clone())
            .unwrap_or_default()
    }

    /// Whether every word of `page` has a highlight
    pub fn is_complete(&self, page: u32) -> bool {
        self.pages.get(page).is_some_and(|entry| entry.complete)
    }

    /// Look up a highlight by id
    pub fn find(&self, id: HighlightId) -> Option<&WordHighlight> {
        self.pages
            .iter()
            .flat_map(|(_, entry)| &entry.highlights)
            .find(|highlight| highlight.id == id)
    }

    /// Recognized text behind a highlight (highlight-text mode only)
    pub fn text_of(&self, id: HighlightId) -> Option<&str> {
        self.texts.get(&id).map(String::as_str)
    }

    /// Drop the highlight set of `page`; it is rebuilt on the next pass
    ///
    /// Returns the number of highlights removed.
    pub fn invalidate_page(&mut self, page: u32) -> usize {
        let Some(entry) = self.pages.remove(page) else {
            return 0;
        };
        self.epoch += 1;
        for highlight in &entry.highlights {
            self.texts.remove(&highlight.id);
        }
        entry.highlights.len()
    }

    /// Drop every highlight
    pub fn clear(&mut self) {
        self.pages.clear();
        self.texts.clear();
        self.epoch += 1;
    }

    /// Combine selected highlights into zones
    ///
    /// Selected words that share a line and sit next to each other merge into
    /// one zone; anything else stays separate. Zones come out in line order.
    pub fn merge_selected(&self, ids: &[HighlightId]) -> Vec<AngularZone> {
        self.selected_runs(ids)
            .into_iter()
            .filter_map(|run| match run.as_slice() {
                [single] => Some(single.zone),
                _ => {
                    let zones: Vec<AngularZone> = run.iter().map(|h| h.zone).collect();
                    merge_zones(&zones)
                }
            })
            .collect()
    }

    /// Text of the selected highlights, one source line per row
    ///
    /// Empty unless the store is in highlight-text mode.
    pub fn selected_text(&self, ids: &[HighlightId]) -> String {
        let mut lines: BTreeMap<u64, Vec<&str>> = BTreeMap::new();
        for run in self.selected_runs(ids) {
            for highlight in run {
                if let Some(text) = self.text_of(highlight.id) {
                    lines.entry(highlight.line_id).or_default().push(text);
                }
            }
        }
        lines
            .values()
            .map(|words| words.join(" "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Selected highlights grouped into runs of adjacent words on one line
    fn selected_runs(&self, ids: &[HighlightId]) -> Vec<Vec<&WordHighlight>> {
        let mut by_line: BTreeMap<u64, Vec<&WordHighlight>> = BTreeMap::new();
        for id in ids {
            if let Some(highlight) = self.find(*id) {
                by_line.entry(highlight.line_id).or_default().push(highlight);
            }
        }

        let mut runs = Vec::new();
        for (_, mut words) in by_line {
            words.sort_by_key(|highlight| highlight.word_index);
            words.dedup_by_key(|highlight| highlight.word_index);

            let mut run: Vec<&WordHighlight> = Vec::new();
            for highlight in words {
                let adjacent = run
                    .last()
                    .is_some_and(|last| last.word_index + 1 == highlight.word_index);
                if !adjacent && !run.is_empty() {
                    runs.push(std::mem::take(&mut run));
                }
                run.push(highlight);
            }
            if !run.is_empty() {
                runs.push(run);
            }
        }
        runs
    }
}
