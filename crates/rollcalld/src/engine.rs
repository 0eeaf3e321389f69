use crossbeam_channel::TrySendError;
use rollcall_core::{
    normalize, DescriptorExtractor, Embedding, ExtractionError, ModelProfile, NormalizeError,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("normalize: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("extraction did not finish within {0:?}")]
    Timeout(Duration),
    #[error("extraction queue is full")]
    Busy,
    #[error("engine workers exited")]
    ChannelClosed,
    #[error("failed to start engine worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Pool sizing and per-request limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    /// Requests that may wait for a free worker before new ones are refused.
    pub queue_depth: usize,
    pub timeout: Duration,
    pub max_image_bytes: usize,
}

/// One image to normalize and describe.
struct Job {
    bytes: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<Embedding>, EngineError>>,
}

/// Clone-safe handle to the extraction workers.
#[derive(Clone)]
pub struct EngineHandle {
    tx: crossbeam_channel::Sender<Job>,
    profile: ModelProfile,
    workers: usize,
    timeout: Duration,
    max_image_bytes: usize,
}

impl EngineHandle {
    /// Normalize `bytes` and extract one embedding per face, best detection
    /// first. Waits at most the configured timeout for a worker's answer.
    pub async fn extract(&self, bytes: Vec<u8>) -> Result<Vec<Embedding>, EngineError> {
        if bytes.len() > self.max_image_bytes {
            return Err(EngineError::TooLarge {
                size: bytes.len(),
                limit: self.max_image_bytes,
            });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .try_send(Job {
                bytes,
                reply: reply_tx,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => EngineError::Busy,
                TrySendError::Disconnected(_) => EngineError::ChannelClosed,
            })?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed)?,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "extraction timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }
}

/// Spawn `config.workers` extraction threads, each owning an extractor built
/// by `load`.
///
/// Every extractor is loaded before any thread starts, so a missing model
/// fails startup instead of the first request.
pub fn spawn_engine<X, F>(config: EngineConfig, load: F) -> Result<EngineHandle, EngineError>
where
    X: DescriptorExtractor + 'static,
    F: Fn(usize) -> Result<X, ExtractionError>,
{
    let workers = config.workers.max(1);
    let extractors = (0..workers).map(&load).collect::<Result<Vec<X>, _>>()?;
    let profile = extractors
        .first()
        .map(|x| x.profile().clone())
        .ok_or(EngineError::ChannelClosed)?;

    tracing::info!(
        workers,
        model = %profile.model_version,
        dimension = profile.dimension,
        tolerance = profile.tolerance,
        "extractors loaded"
    );

    let (tx, rx) = crossbeam_channel::bounded::<Job>(config.queue_depth.max(1));
    for (index, extractor) in extractors.into_iter().enumerate() {
        let rx = rx.clone();
        std::thread::Builder::new()
            .name(format!("rollcall-extract-{index}"))
            .spawn(move || run_worker(index, extractor, rx))?;
    }

    Ok(EngineHandle {
        tx,
        profile,
        workers,
        timeout: config.timeout,
        max_image_bytes: config.max_image_bytes,
    })
}

fn run_worker<X: DescriptorExtractor>(
    index: usize,
    mut extractor: X,
    rx: crossbeam_channel::Receiver<Job>,
) {
    tracing::debug!(worker = index, "extraction worker started");
    for job in rx {
        if job.reply.is_closed() {
            tracing::debug!(worker = index, "skipping job whose caller stopped waiting");
            continue;
        }
        let result = describe(&mut extractor, &job.bytes);
        if job.reply.send(result).is_err() {
            tracing::debug!(worker = index, "caller gone before extraction finished");
        }
    }
    tracing::debug!(worker = index, "extraction worker exiting");
}

fn describe<X: DescriptorExtractor>(
    extractor: &mut X,
    bytes: &[u8],
) -> Result<Vec<Embedding>, EngineError> {
    let image = normalize(bytes)?;
    let faces = extractor.extract(&image)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        faces = faces.len(),
        "image described"
    );
    Ok(faces)
}
