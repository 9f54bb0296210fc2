//! Integration tests for the image pipeline.
//!
//! These tests drive a real coordinator with scripted collaborators and
//! verify:
//! - Coalescing of equal work across layers
//! - Cancellation of one subscriber versus the last one
//! - Priority propagation down to the data loader
//! - Event ordering on handles
//! - Invalidation
//! - Data requests sharing fetches with image requests
//! - Decoding concurrency across cancellation

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use common::{
    bare_config, eventually, CountingDecoder, CountingProcessor, RecordingSink, SlowDecoder,
    TestLoader, TestProducer,
};
use imagepipe::{
    DataLoadError, Event, ImagePipeline, ImageRequest, ImageResponse, PipelineError, Priority,
    TaskState,
};

const URL: &str = "https://example.com/a.png";
const BODY: &[u8] = b"0123456789";

fn pipeline(loader: &TestLoader, decoder: &CountingDecoder) -> ImagePipeline {
    ImagePipeline::builder(bare_config())
        .with_loader(loader.clone())
        .with_decoder(decoder.clone())
        .build()
        .unwrap()
}

/// Waits until the coordinator has handled every command sent so far.
async fn settle(pipeline: &ImagePipeline) -> imagepipe::PipelineStats {
    pipeline.stats().await.expect("coordinator stopped")
}

/// Comparable summary of an image event.
fn describe(event: &Event<ImageResponse>) -> String {
    match event {
        Event::Progress(p) => format!("progress {}/{:?}", p.completed, p.total),
        Event::Preview(response) => format!("preview {}", response.image.width()),
        Event::Cancelled => "cancelled".to_string(),
        Event::Finished(Ok(response)) => format!("finished {}", response.image.width()),
        Event::Finished(Err(e)) => format!("failed: {}", e),
    }
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test]
async fn test_equal_requests_share_one_load_and_decode() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let a = pipeline.load_image(URL);
    let b = pipeline.load_image(URL);
    let stats = settle(&pipeline).await;
    assert_eq!(stats.load_image.created, 1);
    assert_eq!(stats.load_image.coalesced, 1);

    loader.release(1);
    let a = a.response().await.unwrap();
    let b = b.response().await.unwrap();

    assert!(Arc::ptr_eq(&a.image, &b.image));
    assert_eq!(a.image.width(), BODY.len() as u32);
    assert_eq!(loader.loads(), 1);
    assert_eq!(decoder.decodes(), 1);

    let stats = settle(&pipeline).await;
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.fetch_original_data.created, 1);
    assert_eq!(stats.fetch_original_data.live, 0);
}

#[tokio::test]
async fn test_different_processors_share_original_image() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let processor = CountingProcessor::new("paint");
    let pipeline = pipeline(&loader, &decoder);

    let plain = pipeline.load_image(URL);
    let painted = pipeline.load_image(ImageRequest::new(URL).with_processor(processor.clone()));
    let stats = settle(&pipeline).await;
    assert_eq!(stats.load_image.created, 2);
    assert_eq!(stats.fetch_original_image.created, 1);
    assert_eq!(stats.fetch_original_image.coalesced, 1);

    loader.release(1);
    let plain = plain.response().await.unwrap();
    let painted = painted.response().await.unwrap();

    assert_eq!(plain.image.get_pixel(0, 0).0, [0, 0, 0, 255]);
    assert_eq!(painted.image.get_pixel(0, 0).0, [255, 255, 255, 255]);
    assert_eq!(loader.loads(), 1);
    assert_eq!(decoder.decodes(), 1);
    assert_eq!(processor.calls(), 1);
}

#[tokio::test]
async fn test_coalescing_disabled_runs_every_request() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = ImagePipeline::builder(bare_config().with_coalescing(false))
        .with_loader(loader.clone())
        .with_decoder(decoder.clone())
        .build()
        .unwrap();

    let a = pipeline.load_image(URL);
    let b = pipeline.load_image(URL);
    settle(&pipeline).await;

    loader.release(2);
    assert!(a.response().await.is_ok());
    assert!(b.response().await.is_ok());
    assert_eq!(loader.loads(), 2);
    assert_eq!(decoder.decodes(), 2);

    let stats = settle(&pipeline).await;
    assert_eq!(stats.load_image.coalesced, 0);
    assert_eq!(stats.coalescing_ratio(), 0.0);
}

#[tokio::test]
async fn test_request_after_completion_starts_fresh_work() {
    let loader = TestLoader::new().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    pipeline.load_image(URL).response().await.unwrap();
    pipeline.load_image(URL).response().await.unwrap();

    assert_eq!(loader.loads(), 2);
    let stats = settle(&pipeline).await;
    assert_eq!(stats.load_image.created, 2);
    assert_eq!(stats.load_image.coalesced, 0);
}

#[tokio::test]
async fn test_producer_sources_coalesce_by_id() {
    let loader = TestLoader::new();
    let decoder = CountingDecoder::default();
    let producer = TestProducer::gated("generated-1", &b"pixels"[..]);
    let pipeline = pipeline(&loader, &decoder);

    let a = pipeline.load_image(ImageRequest::with_producer(producer.clone()));
    let b = pipeline.load_image(ImageRequest::with_producer(producer.clone()));
    settle(&pipeline).await;

    producer.release(1);
    assert_eq!(a.response().await.unwrap().image.width(), 6);
    assert_eq!(b.response().await.unwrap().image.width(), 6);
    assert_eq!(producer.calls(), 1);
    assert_eq!(loader.loads(), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelling_one_subscriber_keeps_shared_work() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let mut a = pipeline.load_image(URL);
    let b = pipeline.load_image(URL);
    settle(&pipeline).await;

    a.cancel();
    assert!(matches!(a.next_event().await, Some(Event::Cancelled)));
    assert!(a.next_event().await.is_none());
    assert_eq!(a.state(), TaskState::Cancelled);

    loader.release(1);
    assert!(b.response().await.is_ok());
    assert_eq!(loader.loads(), 1);

    let stats = settle(&pipeline).await;
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.fetch_original_data.cancelled, 0);
}

#[tokio::test]
async fn test_cancelling_last_subscriber_cancels_work() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let a = pipeline.load_image(URL);
    settle(&pipeline).await;
    a.cancel();
    assert!(matches!(a.response().await, Err(PipelineError::Cancelled)));

    let stats = settle(&pipeline).await;
    assert_eq!(stats.load_image.cancelled, 1);
    assert_eq!(stats.fetch_original_image.cancelled, 1);
    assert_eq!(stats.fetch_original_data.cancelled, 1);
    assert_eq!(stats.fetch_original_data.live, 0);
    assert_eq!(stats.data_loading_queue.running, 0);

    // The same request now starts over
    let again = pipeline.load_image(URL);
    settle(&pipeline).await;
    loader.release(2);
    assert!(again.response().await.is_ok());
    assert_eq!(loader.loads(), 2);
    assert_eq!(decoder.decodes(), 1);
}

#[tokio::test]
async fn test_cancel_after_finish_is_a_no_op() {
    let loader = TestLoader::new().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let mut task = pipeline.load_image(URL);
    while let Some(event) = task.next_event().await {
        if event.is_terminal() {
            assert!(matches!(event, Event::Finished(Ok(_))));
        }
    }
    task.cancel();

    let stats = settle(&pipeline).await;
    assert_eq!(stats.cancelled, 0);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn test_cancel_racing_completion_yields_one_terminal_event() {
    let loader = TestLoader::new().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    for round in 0..30 {
        let task = pipeline.load_image(URL);
        for _ in 0..round % 6 {
            tokio::task::yield_now().await;
        }
        task.cancel();
        task.cancel();

        let events: Vec<Event<_>> = task.collect().await;
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1, "round {}", round);
        assert!(events.last().is_some_and(|e| e.is_terminal()));
    }

    let stats = settle(&pipeline).await;
    assert_eq!(stats.succeeded + stats.cancelled, 30);
    assert_eq!(stats.active, 0);
}

// =============================================================================
// Priority
// =============================================================================

#[tokio::test]
async fn test_priority_follows_highest_subscriber() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let low = pipeline.load_image(ImageRequest::new(URL).with_priority(Priority::Low));
    settle(&pipeline).await;
    eventually("loader to start", || loader.loads() == 1).await;
    assert_eq!(loader.priority(0), Some(Priority::Low));

    let high = pipeline.load_image(ImageRequest::new(URL).with_priority(Priority::High));
    settle(&pipeline).await;
    assert_eq!(loader.priority(0), Some(Priority::High));

    high.cancel();
    settle(&pipeline).await;
    assert_eq!(loader.priority(0), Some(Priority::Low));

    low.set_priority(Priority::VeryHigh);
    settle(&pipeline).await;
    assert_eq!(loader.priority(0), Some(Priority::VeryHigh));

    loader.release(1);
    assert!(low.response().await.is_ok());
    assert_eq!(loader.loads(), 1);
}

#[tokio::test]
async fn test_priority_reaches_data_shared_with_other_processors() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let _plain = pipeline.load_image(ImageRequest::new(URL).with_priority(Priority::VeryLow));
    settle(&pipeline).await;
    eventually("loader to start", || loader.loads() == 1).await;

    let painted = pipeline.load_image(
        ImageRequest::new(URL)
            .with_processor(CountingProcessor::new("paint"))
            .with_priority(Priority::Normal),
    );
    settle(&pipeline).await;
    assert_eq!(loader.priority(0), Some(Priority::Normal));

    painted.set_priority(Priority::High);
    settle(&pipeline).await;
    assert_eq!(loader.priority(0), Some(Priority::High));
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_progress_is_monotonic_and_result_is_last() {
    let loader = TestLoader::chunked(3).with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let events: Vec<Event<_>> = pipeline.load_image(URL).collect().await;

    let progress: Vec<u64> = events
        .iter()
        .filter_map(|event| match event {
            Event::Progress(p) => Some(p.completed),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&(BODY.len() as u64)));

    let terminal: Vec<&Event<_>> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert!(matches!(events.last(), Some(Event::Finished(Ok(_)))));
}

#[tokio::test]
async fn test_progressive_decoding_sends_previews_before_result() {
    let loader = TestLoader::chunked(2).with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = ImagePipeline::builder(bare_config().with_progressive_decoding(true))
        .with_loader(loader.clone())
        .with_decoder(decoder.clone())
        .build()
        .unwrap();

    let events: Vec<Event<_>> = pipeline.load_image(URL).collect().await;

    let previews = events
        .iter()
        .filter(|e| matches!(e, Event::Preview(response) if response.is_preview))
        .count();
    assert!(previews >= 1);
    assert!(decoder.previews() >= 1);
    match events.last() {
        Some(Event::Finished(Ok(response))) => {
            assert!(!response.is_preview);
            assert_eq!(response.image.width(), BODY.len() as u32);
        }
        other => panic!("expected final image, got {:?}", other.map(|e| e.is_terminal())),
    }
}

#[tokio::test]
async fn test_coalesced_handles_receive_identical_events() {
    let loader = TestLoader::gated_chunked(3).with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = ImagePipeline::builder(bare_config().with_progressive_decoding(true))
        .with_loader(loader.clone())
        .with_decoder(decoder.clone())
        .build()
        .unwrap();

    let a = pipeline.load_image(URL);
    let b = pipeline.load_image(URL);
    settle(&pipeline).await;
    loader.release(1);

    let (a, b): (Vec<Event<_>>, Vec<Event<_>>) = tokio::join!(a.collect(), b.collect());
    let a: Vec<String> = a.iter().map(describe).collect();
    let b: Vec<String> = b.iter().map(describe).collect();

    assert_eq!(a, b);
    assert!(a.iter().any(|e| e.starts_with("progress")));
    assert_eq!(a.last().map(String::as_str), Some("finished 10"));
}

#[tokio::test]
async fn test_loader_failure_reaches_every_subscriber() {
    let loader = TestLoader::gated();
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let a = pipeline.load_image(URL);
    let b = pipeline.load_data(URL);
    settle(&pipeline).await;
    loader.release(1);

    for result in [a.response().await.map(|_| ()), b.response().await.map(|_| ())] {
        match result {
            Err(PipelineError::DataLoadingFailed(DataLoadError::Status { status, .. })) => {
                assert_eq!(status, 404)
            }
            other => panic!("expected 404, got {:?}", other),
        }
    }
    assert_eq!(decoder.decodes(), 0);
    assert_eq!(settle(&pipeline).await.failed, 2);
}

#[tokio::test]
async fn test_decode_failure_is_reported() {
    let loader = TestLoader::new().with_body(URL, &b"bad image"[..]);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let result = pipeline.load_image(URL).response().await;
    assert!(matches!(result, Err(PipelineError::DecodingFailed(_))));
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test]
async fn test_invalidate_fails_running_and_later_requests() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let sink = Arc::new(RecordingSink::default());
    let pipeline = ImagePipeline::builder(bare_config())
        .with_loader(loader.clone())
        .with_decoder(decoder.clone())
        .with_telemetry(sink.clone())
        .build()
        .unwrap();

    let running = pipeline.load_image(URL);
    let data = pipeline.load_data("https://example.com/b.png");
    settle(&pipeline).await;

    pipeline.invalidate();
    assert!(matches!(
        running.response().await,
        Err(PipelineError::PipelineInvalidated)
    ));
    assert!(matches!(
        data.response().await,
        Err(PipelineError::PipelineInvalidated)
    ));

    let later = pipeline.load_image(URL);
    assert!(matches!(
        later.response().await,
        Err(PipelineError::PipelineInvalidated)
    ));

    let stats = settle(&pipeline).await;
    assert!(stats.invalidated);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.fetch_original_data.live, 0);
    assert_eq!(sink.count("pipeline_invalidated"), 1);
}

// =============================================================================
// Data requests
// =============================================================================

#[tokio::test]
async fn test_data_request_shares_fetch_with_image_request() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let sink = Arc::new(RecordingSink::default());
    let pipeline = ImagePipeline::builder(bare_config())
        .with_loader(loader.clone())
        .with_decoder(decoder.clone())
        .with_telemetry(sink.clone())
        .build()
        .unwrap();

    let image = pipeline.load_image(URL);
    let data = pipeline.load_data(URL);
    let stats = settle(&pipeline).await;
    assert_eq!(stats.fetch_original_data.created, 1);
    assert_eq!(stats.fetch_original_data.coalesced, 1);
    assert_eq!(stats.coalescing_ratio(), 0.5);

    loader.release(1);
    let data = data.response().await.unwrap();
    assert_eq!(&data.data[..], BODY);
    assert_eq!(data.expected_length, Some(BODY.len() as u64));
    assert!(image.response().await.is_ok());
    assert_eq!(loader.loads(), 1);
    assert!(sink.count("task_coalesced") >= 1);
}

#[tokio::test]
async fn test_cancelling_image_request_keeps_shared_data_request() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let image = pipeline.load_image(URL);
    let data = pipeline.load_data(URL);
    let stats = settle(&pipeline).await;
    assert_eq!(stats.fetch_original_data.created, 1);
    assert_eq!(stats.fetch_original_data.coalesced, 1);

    image.cancel();
    assert!(matches!(image.response().await, Err(PipelineError::Cancelled)));

    loader.release(1);
    let events: Vec<Event<_>> = data.collect().await;
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    match events.last() {
        Some(Event::Finished(Ok(fetched))) => assert_eq!(&fetched.data[..], BODY),
        _ => panic!("expected the data request to finish with bytes"),
    }

    assert_eq!(loader.loads(), 1);
    assert_eq!(decoder.decodes(), 0);
    let stats = settle(&pipeline).await;
    assert_eq!(stats.fetch_original_data.cancelled, 0);
    assert_eq!(stats.fetch_original_image.cancelled, 1);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.succeeded, 1);
}

#[tokio::test]
async fn test_data_requests_coalesce_with_each_other() {
    let loader = TestLoader::gated().with_body(URL, BODY);
    let decoder = CountingDecoder::default();
    let pipeline = pipeline(&loader, &decoder);

    let a = pipeline.load_data(URL);
    let b = pipeline.load_data(URL);
    let stats = settle(&pipeline).await;
    assert_eq!(stats.load_data.created, 1);
    assert_eq!(stats.load_data.coalesced, 1);

    loader.release(1);
    assert_eq!(&a.response().await.unwrap().data[..], BODY);
    assert_eq!(&b.response().await.unwrap().data[..], BODY);
    assert_eq!(decoder.decodes(), 0);
}

// =============================================================================
// Operation queues
// =============================================================================

#[tokio::test]
async fn test_cancelled_decode_holds_its_slot_until_done() {
    const OTHER: &str = "https://example.com/b.png";
    let loader = TestLoader::new().with_body(URL, BODY).with_body(OTHER, BODY);
    let decoder = SlowDecoder::new(Duration::from_millis(200));
    let pipeline = ImagePipeline::builder(bare_config().with_decoding_concurrency(1))
        .with_loader(loader.clone())
        .with_decoder(decoder.clone())
        .build()
        .unwrap();

    let first = pipeline.load_image(URL);
    eventually("first decode to start", || decoder.in_flight() == 1).await;
    first.cancel();
    let stats = settle(&pipeline).await;
    assert_eq!(stats.fetch_original_image.live, 0);
    assert_eq!(stats.decoding_queue.running, 1);

    let second = pipeline.load_image(OTHER);
    assert!(second.response().await.is_ok());
    assert_eq!(decoder.decodes(), 2);
    assert_eq!(decoder.peak(), 1);
}
