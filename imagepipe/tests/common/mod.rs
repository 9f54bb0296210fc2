//! Scripted collaborators shared by the integration tests.
//!
//! Every collaborator counts its calls so tests can assert how much work
//! actually ran. Loaders and producers can be gated on a semaphore so a test
//! can submit several requests before any of them completes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};

use imagepipe::decode::ImageDecoding;
use imagepipe::loader::{DataLoader, DataProducer, DataRequest, LoadEvent};
use imagepipe::process::ImageProcessor;
use imagepipe::telemetry::{TelemetryEvent, TelemetrySink};
use imagepipe::{DataLoadError, DecodeError, PipelineConfig, Priority, ProcessError};

/// Configuration without caches or rate limiting.
pub fn bare_config() -> PipelineConfig {
    PipelineConfig::default()
        .with_memory_cache_size(None)
        .with_rate_limiter(None)
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

// =============================================================================
// Loader
// =============================================================================

struct LoaderState {
    bodies: Mutex<HashMap<String, Bytes>>,
    chunk_size: usize,
    gate: Option<Semaphore>,
    loads: AtomicUsize,
    priorities: Mutex<Vec<watch::Receiver<Priority>>>,
}

/// Serves fixed bodies per URL, split into chunks. Unknown URLs get a 404.
#[derive(Clone)]
pub struct TestLoader {
    state: Arc<LoaderState>,
}

impl TestLoader {
    pub fn new() -> Self {
        Self::build(usize::MAX, None)
    }

    /// Loads wait for [`release`](Self::release) before answering.
    pub fn gated() -> Self {
        Self::build(usize::MAX, Some(Semaphore::new(0)))
    }

    pub fn chunked(chunk_size: usize) -> Self {
        Self::build(chunk_size, None)
    }

    pub fn gated_chunked(chunk_size: usize) -> Self {
        Self::build(chunk_size, Some(Semaphore::new(0)))
    }

    fn build(chunk_size: usize, gate: Option<Semaphore>) -> Self {
        Self {
            state: Arc::new(LoaderState {
                bodies: Mutex::new(HashMap::new()),
                chunk_size: chunk_size.max(1),
                gate,
                loads: AtomicUsize::new(0),
                priorities: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_body(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.state.bodies.lock().insert(url.to_string(), body.into());
        self
    }

    /// Lets `count` gated loads answer.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.state.gate {
            gate.add_permits(count);
        }
    }

    /// Loads started so far.
    pub fn loads(&self) -> usize {
        self.state.loads.load(Ordering::SeqCst)
    }

    /// Current priority of the `index`th load.
    pub fn priority(&self, index: usize) -> Option<Priority> {
        self.state
            .priorities
            .lock()
            .get(index)
            .map(|rx| *rx.borrow())
    }
}

impl DataLoader for TestLoader {
    fn load(&self, request: DataRequest) -> BoxStream<'static, Result<LoadEvent, DataLoadError>> {
        let state = Arc::clone(&self.state);
        state.loads.fetch_add(1, Ordering::SeqCst);
        state.priorities.lock().push(request.priority.clone());

        let (tx, rx) = futures::channel::mpsc::unbounded();
        tokio::spawn(async move {
            if let Some(gate) = &state.gate {
                match gate.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => return,
                }
            }

            let body = state.bodies.lock().get(&request.url).cloned();
            let Some(body) = body else {
                let _ = tx.unbounded_send(Err(DataLoadError::Status {
                    url: request.url.clone(),
                    status: 404,
                }));
                return;
            };

            let _ = tx.unbounded_send(Ok(LoadEvent::Response {
                expected_length: Some(body.len() as u64),
                validator: None,
                resumed: false,
            }));
            for chunk in body.chunks(state.chunk_size) {
                let _ = tx.unbounded_send(Ok(LoadEvent::Chunk(Bytes::copy_from_slice(chunk))));
            }
        });
        rx.boxed()
    }
}

// =============================================================================
// Producer
// =============================================================================

/// Custom source producing fixed bytes, optionally gated.
#[derive(Clone)]
pub struct TestProducer {
    id: String,
    data: Bytes,
    gate: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
}

impl TestProducer {
    pub fn gated(id: &str, data: impl Into<Bytes>) -> Self {
        Self {
            id: id.to_string(),
            data: data.into(),
            gate: Arc::new(Semaphore::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataProducer for TestProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn produce(&self) -> BoxFuture<'static, Result<Bytes, DataLoadError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = Arc::clone(&self.gate);
        let data = self.data.clone();
        async move {
            match gate.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    Ok(data)
                }
                Err(_) => Err(DataLoadError::message("gate closed")),
            }
        }
        .boxed()
    }
}

// =============================================================================
// Decoder and processor
// =============================================================================

/// Decodes any bytes into a `len x 1` image. Data starting with `bad`
/// fails to decode.
#[derive(Clone, Default)]
pub struct CountingDecoder {
    decodes: Arc<AtomicUsize>,
    previews: Arc<AtomicUsize>,
}

impl CountingDecoder {
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn previews(&self) -> usize {
        self.previews.load(Ordering::SeqCst)
    }
}

fn strip(len: usize) -> RgbaImage {
    RgbaImage::from_pixel(len.max(1) as u32, 1, Rgba([0, 0, 0, 255]))
}

impl ImageDecoding for CountingDecoder {
    fn decode(&self, data: &[u8]) -> Result<RgbaImage, DecodeError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if data.starts_with(b"bad") {
            return Err(DecodeError::Unsupported { len: data.len() });
        }
        Ok(strip(data.len()))
    }

    fn decode_partial(&self, data: &[u8]) -> Result<Option<RgbaImage>, DecodeError> {
        self.previews.fetch_add(1, Ordering::SeqCst);
        Ok(Some(strip(data.len())))
    }
}

/// Decodes like [`CountingDecoder`] but takes `delay` per call, recording
/// how many decodes ever ran at once.
#[derive(Clone)]
pub struct SlowDecoder {
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    decodes: Arc<AtomicUsize>,
}

impl SlowDecoder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            decodes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl ImageDecoding for SlowDecoder {
    fn decode(&self, data: &[u8]) -> Result<RgbaImage, DecodeError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.decodes.fetch_add(1, Ordering::SeqCst);
        Ok(strip(data.len()))
    }

    fn decode_partial(&self, _data: &[u8]) -> Result<Option<RgbaImage>, DecodeError> {
        Ok(None)
    }
}

/// Paints the first pixel white and counts calls.
#[derive(Clone)]
pub struct CountingProcessor {
    id: String,
    calls: Arc<AtomicUsize>,
}

impl CountingProcessor {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageProcessor for CountingProcessor {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn process(&self, image: &RgbaImage) -> Result<RgbaImage, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = image.clone();
        out.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        Ok(out)
    }
}

// =============================================================================
// Telemetry
// =============================================================================

/// Records every telemetry event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
