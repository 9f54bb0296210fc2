//! Work spawned by the coordinator.
//!
//! Every unit of work runs outside the coordinator and reports back with a
//! [`WorkMessage`] tagged with the slot of the task that started it. The
//! coordinator ignores messages for tasks that no longer exist, so work
//! never needs to know whether its task was cancelled. Async work also
//! watches the task's cancellation token and stops early.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use image::RgbaImage;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::task::TaskSlot;
use crate::cache::DataCaching;
use crate::decode::{self, ImageDecoding};
use crate::error::{DataLoadError, DecodeError, PipelineError, ProcessError};
use crate::event::{CacheType, FetchedData, Progress};
use crate::loader::{
    DataLoader, DataProducer, DataRequest, LoadEvent, ResumableData, ResumableDataStore,
};
use crate::priority::Priority;
use crate::process::{self, ImageProcessor};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Whether a decode produces a preview or the final image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeKind {
    Preview,
    Final,
}

/// Result reported by spawned work.
pub(crate) enum WorkMessage {
    DataCacheLookup {
        slot: TaskSlot,
        data: Option<Bytes>,
    },
    DataProgress {
        slot: TaskSlot,
        progress: Progress,
        partial: Option<Bytes>,
    },
    DataFinished {
        slot: TaskSlot,
        result: Result<FetchedData, DataLoadError>,
    },
    Decoded {
        slot: TaskSlot,
        kind: DecodeKind,
        data_len: usize,
        result: Result<Option<RgbaImage>, DecodeError>,
    },
    Processed {
        slot: TaskSlot,
        is_final: bool,
        cache_type: Option<CacheType>,
        result: Result<RgbaImage, PipelineError>,
    },
}

pub(crate) type WorkSender = mpsc::UnboundedSender<WorkMessage>;

// =============================================================================
// Data cache lookup
// =============================================================================

pub(crate) fn spawn_cache_lookup(
    slot: TaskSlot,
    cache: Arc<dyn DataCaching>,
    key: String,
    token: CancellationToken,
    tx: WorkSender,
) {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            data = cache.get(&key) => {
                let _ = tx.send(WorkMessage::DataCacheLookup { slot, data });
            }
        }
    });
}

// =============================================================================
// Network fetch
// =============================================================================

/// Where fetched bytes are written once the fetch succeeds.
pub(crate) struct CacheWrite {
    pub cache: Arc<dyn DataCaching>,
    pub key: String,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl CacheWrite {
    async fn store(&self, data: &Bytes) {
        if let Err(e) = self.cache.store(&self.key, data.clone()).await {
            warn!(key = %self.key, error = %e, "Failed to store data in disk cache");
            self.telemetry.emit(TelemetryEvent::CacheWriteFailed {
                cache: CacheType::Disk,
                error: e.to_string(),
            });
        }
    }
}

pub(crate) struct FetchJob {
    pub slot: TaskSlot,
    pub url: String,
    pub loader: Arc<dyn DataLoader>,
    pub priority: watch::Receiver<Priority>,
    pub resumable: Option<Arc<ResumableDataStore>>,
    pub cache_write: Option<CacheWrite>,
    /// Send snapshots of the accumulated bytes for preview decoding
    pub progressive: bool,
    pub token: CancellationToken,
    pub tx: WorkSender,
}

impl FetchJob {
    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(self) {
        let resume = self.resumable.as_ref().and_then(|store| store.take(&self.url));
        let mut stream = self.loader.load(DataRequest {
            url: self.url.clone(),
            priority: self.priority.clone(),
            resume: resume.clone(),
        });

        let mut buffer = BytesMut::new();
        let mut expected_length = None;
        let mut validator = None;
        // Snapshots are taken each time the buffer doubles, which keeps the
        // bytes copied linear in the body size.
        let mut next_snapshot = 1;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!(url = %self.url, received = buffer.len(), "Fetch cancelled");
                    self.save_resumable(&buffer, validator);
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(LoadEvent::Response {
                    expected_length: length,
                    validator: v,
                    resumed,
                })) => {
                    buffer.clear();
                    if let (true, Some(resume)) = (resumed, &resume) {
                        buffer.extend_from_slice(&resume.data);
                    }
                    expected_length = length;
                    validator = v;
                    next_snapshot = 1;
                    self.send(WorkMessage::DataProgress {
                        slot: self.slot,
                        progress: Progress::new(buffer.len() as u64, expected_length),
                        partial: None,
                    });
                }
                Some(Ok(LoadEvent::Chunk(chunk))) => {
                    buffer.extend_from_slice(&chunk);
                    let partial = (self.progressive && buffer.len() >= next_snapshot).then(|| {
                        next_snapshot = buffer.len().saturating_mul(2);
                        Bytes::copy_from_slice(&buffer)
                    });
                    self.send(WorkMessage::DataProgress {
                        slot: self.slot,
                        progress: Progress::new(buffer.len() as u64, expected_length),
                        partial,
                    });
                }
                Some(Err(e)) => {
                    self.save_resumable(&buffer, validator);
                    self.send(WorkMessage::DataFinished {
                        slot: self.slot,
                        result: Err(e),
                    });
                    return;
                }
                None => break,
            }
        }

        if buffer.is_empty() {
            self.send(WorkMessage::DataFinished {
                slot: self.slot,
                result: Err(DataLoadError::Empty),
            });
            return;
        }

        let data = buffer.freeze();
        if let Some(write) = &self.cache_write {
            write.store(&data).await;
        }
        self.send(WorkMessage::DataFinished {
            slot: self.slot,
            result: Ok(FetchedData {
                expected_length: expected_length.or(Some(data.len() as u64)),
                data,
                cache_type: None,
            }),
        });
    }

    fn save_resumable(&self, buffer: &BytesMut, validator: Option<String>) {
        let Some(store) = &self.resumable else {
            return;
        };
        if let Some(data) = ResumableData::new(Bytes::copy_from_slice(buffer), validator) {
            store.store(&self.url, data);
        }
    }

    fn send(&self, message: WorkMessage) {
        let _ = self.tx.send(message);
    }
}

// =============================================================================
// Custom producer
// =============================================================================

pub(crate) struct ProduceJob {
    pub slot: TaskSlot,
    pub producer: Arc<dyn DataProducer>,
    pub cache_write: Option<CacheWrite>,
    pub token: CancellationToken,
    pub tx: WorkSender,
}

impl ProduceJob {
    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(self) {
        let produced = tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            produced = self.producer.produce() => produced,
        };

        let result = match produced {
            Ok(data) if data.is_empty() => Err(DataLoadError::Empty),
            Ok(data) => {
                let len = data.len() as u64;
                let _ = self.tx.send(WorkMessage::DataProgress {
                    slot: self.slot,
                    progress: Progress::new(len, Some(len)),
                    partial: None,
                });
                if let Some(write) = &self.cache_write {
                    write.store(&data).await;
                }
                Ok(FetchedData {
                    data,
                    expected_length: Some(len),
                    cache_type: None,
                })
            }
            Err(e) => Err(e),
        };

        let _ = self.tx.send(WorkMessage::DataFinished {
            slot: self.slot,
            result,
        });
    }
}

// =============================================================================
// CPU work
// =============================================================================

pub(crate) fn spawn_decode(
    slot: TaskSlot,
    kind: DecodeKind,
    decoder: Arc<dyn ImageDecoding>,
    data: Bytes,
    thumbnail: Option<u32>,
    tx: WorkSender,
) {
    let data_len = data.len();
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || -> Result<Option<RgbaImage>, DecodeError> {
            let decoded = match kind {
                DecodeKind::Final => decoder.decode(&data).map(Some),
                DecodeKind::Preview => decoder.decode_partial(&data),
            }?;
            Ok(decoded.map(|image| match thumbnail {
                Some(max) => decode::thumbnail(image, max),
                None => image,
            }))
        })
        .await
        .unwrap_or_else(|e| Err(DecodeError::Worker(e.to_string())));

        let _ = tx.send(WorkMessage::Decoded {
            slot,
            kind,
            data_len,
            result,
        });
    });
}

pub(crate) fn spawn_process(
    slot: TaskSlot,
    is_final: bool,
    cache_type: Option<CacheType>,
    processors: Vec<Arc<dyn ImageProcessor>>,
    image: Arc<RgbaImage>,
    tx: WorkSender,
) {
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || {
            process::apply_all(&processors, &image)
                .map_err(|(processor, source)| PipelineError::ProcessingFailed { processor, source })
        })
        .await
        .unwrap_or_else(|e| {
            Err(PipelineError::ProcessingFailed {
                processor: "worker".to_string(),
                source: ProcessError::Worker(e.to_string()),
            })
        });

        let _ = tx.send(WorkMessage::Processed {
            slot,
            is_final,
            cache_type,
            result,
        });
    });
}
