#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use zonefit_core::{
    AngularZone, Bitmap, DocumentText, EngineConfig, HighlightEngine, OcrEngine, OcrError,
    OcrWord, PixelProbe, Point, ProgressScope, ProgressSink, RecognizeRequest, Rect, SpatialText,
    TextLine, ViewerHost, WordHighlight,
};
use zonefit_scheduler::{ui_channel, CancellationToken, UiBridge};

pub const WAIT: Duration = Duration::from_secs(10);

/// Viewer state owned by the UI thread
#[derive(Default)]
pub struct FakeHost {
    pub current_page: u32,
    pub page_count: u32,
    pub auto_ocr: bool,
    pub highlighting: bool,
    pub samplers: HashMap<u32, Arc<Bitmap>>,
    pub live: BTreeMap<u32, Vec<WordHighlight>>,
    pub invalidations: Vec<Option<Rect>>,
    pub gesture: bool,
    pub candidate: Option<AngularZone>,
    pub external: Option<Arc<DocumentText>>,
    pub published: Option<DocumentText>,
    pub publish_count: usize,
    pub errors: Vec<String>,
    pub log: Vec<&'static str>,
}

impl FakeHost {
    pub fn new(page_count: u32, current_page: u32) -> Self {
        Self {
            current_page,
            page_count,
            auto_ocr: true,
            highlighting: true,
            gesture: true,
            ..Self::default()
        }
    }
}

impl ViewerHost for FakeHost {
    fn current_page(&self) -> u32 {
        self.current_page
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn auto_ocr_enabled(&self) -> bool {
        self.auto_ocr
    }

    fn highlighting_enabled(&self) -> bool {
        self.highlighting
    }

    fn sampler(&self, page: u32) -> Option<Arc<dyn PixelProbe>> {
        self.samplers
            .get(&page)
            .map(|bitmap| Arc::clone(bitmap) as Arc<dyn PixelProbe>)
    }

    // Client coordinates are image coordinates shifted by the page margin.
    fn image_to_client(&self, point: Point) -> Point {
        Point::new(point.x + 8, point.y + 8)
    }

    fn client_to_image(&self, point: Point) -> Point {
        Point::new(point.x - 8, point.y - 8)
    }

    fn add_highlights(&mut self, page: u32, highlights: &[WordHighlight]) {
        self.live
            .entry(page)
            .or_default()
            .extend(highlights.iter().cloned());
    }

    fn remove_highlights(&mut self, page: u32) {
        self.live.remove(&page);
    }

    fn invalidate(&mut self, region: Option<Rect>) {
        self.invalidations.push(region);
    }

    fn gesture_active(&self) -> bool {
        self.gesture
    }

    fn auto_fit_result(&self) -> Option<AngularZone> {
        self.candidate
    }

    fn set_auto_fit_result(&mut self, zone: Option<AngularZone>) {
        self.candidate = zone;
    }

    fn external_ocr(&self) -> Option<Arc<DocumentText>> {
        self.external.clone()
    }

    fn publish_document_ocr(&mut self, text: DocumentText) {
        self.published = Some(text);
        self.publish_count += 1;
    }

    fn show_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

/// OCR engine that answers from a fixed page table
pub struct ScriptedOcr {
    pages: HashMap<u32, SpatialText>,
    calls: Arc<Mutex<Vec<u32>>>,
    delay: Duration,
}

impl ScriptedOcr {
    pub fn new(pages: impl IntoIterator<Item = SpatialText>) -> Self {
        Self {
            pages: pages.into_iter().map(|text| (text.page, text)).collect(),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// Make every recognition take `delay`, polling cancellation meanwhile
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Pages recognized so far, in call order
    pub fn calls(&self) -> Arc<Mutex<Vec<u32>>> {
        Arc::clone(&self.calls)
    }
}

impl OcrEngine for ScriptedOcr {
    fn recognize(
        &self,
        request: &RecognizeRequest,
        token: &CancellationToken,
    ) -> Result<Option<SpatialText>, OcrError> {
        self.calls.lock().unwrap().push(request.page);

        let deadline = Instant::now() + self.delay;
        while Instant::now() < deadline {
            if token.is_cancelled() {
                return Err(OcrError::Cancelled);
            }
            thread::sleep(Duration::from_millis(2));
        }
        Ok(self.pages.get(&request.page).cloned())
    }
}

/// Progress sink that keeps every message
#[derive(Default)]
pub struct RecordingProgress {
    pub messages: Mutex<Vec<(ProgressScope, String)>>,
}

impl ProgressSink for RecordingProgress {
    fn report(&self, scope: ProgressScope, message: &str, _fraction: f32) {
        self.messages.lock().unwrap().push((scope, message.to_string()));
    }
}

/// A zone for a word `width` pixels wide whose center line is at `y`
pub fn word_zone(x: i32, y: i32, width: i32, height: i32, page: u32) -> AngularZone {
    AngularZone::new(Point::new(x, y), Point::new(x + width - 1, y), height, page)
}

/// A page whose lines hold the given words, laid out left to right
pub fn page_text(page: u32, lines: &[&[&str]]) -> SpatialText {
    let mut text = SpatialText::new(page);
    for (row, words) in lines.iter().enumerate() {
        let y = 40 + row as i32 * 40;
        let words = words
            .iter()
            .enumerate()
            .map(|(column, word)| OcrWord::new(*word, word_zone(20 + column as i32 * 60, y, 50, 20, page)))
            .collect();
        text = text.with_line(TextLine::new(words));
    }
    text
}

pub fn fast_config() -> EngineConfig {
    EngineConfig::new().with_retire_timeout(Duration::from_millis(200))
}

/// An engine wired to a fake host running on its own UI thread
pub struct Harness {
    pub engine: HighlightEngine<FakeHost, ScriptedOcr>,
    bridge: UiBridge<FakeHost>,
    ui: JoinHandle<FakeHost>,
}

impl Harness {
    pub fn start(host: FakeHost, ocr: ScriptedOcr, config: EngineConfig) -> Self {
        Self::start_with(host, ocr, config, |engine| engine)
    }

    pub fn start_with(
        host: FakeHost,
        ocr: ScriptedOcr,
        config: EngineConfig,
        customize: impl FnOnce(
            HighlightEngine<FakeHost, ScriptedOcr>,
        ) -> HighlightEngine<FakeHost, ScriptedOcr>,
    ) -> Self {
        let (bridge, ui_loop) = ui_channel(host);
        let ui = thread::spawn(move || ui_loop.run());
        let engine = customize(HighlightEngine::new(bridge.clone(), ocr, "scan.pdf", config));
        Self { engine, bridge, ui }
    }

    /// Run `f` against the host on the UI thread
    pub fn with_host<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut FakeHost) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.bridge
            .run_on_ui_and_wait(&CancellationToken::new(), f)
            .expect("UI loop should be running")
    }

    pub fn wait_idle(&self) {
        assert!(self.engine.wait_idle(WAIT), "worker should go idle");
    }

    /// Stop the worker and hand back the final host state
    pub fn finish(self) -> FakeHost {
        let Harness { engine, bridge, ui } = self;
        engine.shutdown();
        drop(engine);
        drop(bridge);
        ui.join().expect("UI thread should not panic")
    }
}
