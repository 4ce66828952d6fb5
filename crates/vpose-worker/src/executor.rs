//! Job executor.
//!
//! Jobs are queued on a bounded channel and dispatched to at most
//! `max_concurrent_jobs` blocking pipeline runs at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use vpose_media::{annotate_video, check_ffmpeg, transcode_for_web, CancelFlag, MediaError};
use vpose_models::{AnnotationReport, JobId, JobProgress, JobRecord};
use vpose_storage::LocalStorage;

use crate::config::WorkerConfig;
use crate::detector::DetectorFactory;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::JobRegistry;

/// Extra time given to cancelled jobs to notice the flag during shutdown.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// State shared by the dispatcher and the job tasks.
struct ExecutorContext {
    config: WorkerConfig,
    registry: JobRegistry,
    storage: LocalStorage,
    detectors: Arc<dyn DetectorFactory>,
    job_semaphore: Arc<Semaphore>,
    /// Cancel handles of jobs currently annotating or transcoding
    running: StdMutex<HashMap<JobId, JobCancel>>,
}

/// Stops a running job: the pipeline polls the flag, FFmpeg watches the
/// channel.
#[derive(Clone)]
struct JobCancel {
    flag: CancelFlag,
    ffmpeg: Arc<watch::Sender<bool>>,
}

impl JobCancel {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ffmpeg: Arc::new(watch::channel(false).0),
        }
    }

    fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.ffmpeg.send_replace(true);
    }
}

impl ExecutorContext {
    fn track(&self, id: &JobId, cancel: JobCancel) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), cancel);
    }

    fn untrack(&self, id: &JobId) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn cancel_all(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        for cancel in running.values() {
            cancel.cancel();
        }
    }
}

/// Runs pose overlay jobs in the background.
pub struct JobExecutor {
    ctx: Arc<ExecutorContext>,
    queue: mpsc::Sender<JobId>,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobExecutor {
    /// Create the executor and spawn its dispatcher on the current runtime.
    pub fn start(
        config: WorkerConfig,
        registry: JobRegistry,
        storage: LocalStorage,
        detectors: Arc<dyn DetectorFactory>,
    ) -> Self {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            queue_capacity = config.queue_capacity,
            detector = detectors.name(),
            "Starting job executor"
        );

        let ctx = Arc::new(ExecutorContext {
            job_semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
            registry,
            storage,
            detectors,
            running: StdMutex::new(HashMap::new()),
        });

        let dispatcher = tokio::spawn(Self::dispatch(Arc::clone(&ctx), rx, shutdown_rx));

        Self {
            ctx,
            queue,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.ctx.registry
    }

    /// Whether the pose model can be loaded.
    pub fn detector_available(&self) -> bool {
        self.ctx.detectors.is_available()
    }

    /// Jobs waiting for a worker slot.
    pub fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Queue a registered job. Fails immediately when the queue is full.
    pub fn submit(&self, job_id: JobId) -> WorkerResult<()> {
        if self.is_shutting_down() {
            metrics::record_job_rejected("shutdown");
            return Err(WorkerError::ShuttingDown);
        }

        match self.queue.try_send(job_id) {
            Ok(()) => {
                metrics::record_job_submitted();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(id)) => {
                warn!(job_id = %id, "Job queue full, rejecting job");
                metrics::record_job_rejected("queue_full");
                Err(WorkerError::QueueFull(self.queue.max_capacity()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::record_job_rejected("shutdown");
                Err(WorkerError::ShuttingDown)
            }
        }
    }

    /// Stop accepting work, fail queued jobs and wait for running ones.
    ///
    /// Running jobs get `shutdown_timeout` to finish before they are
    /// cancelled.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        info!("Shutdown signal received, stopping executor");

        if let Some(handle) = self.dispatcher.lock().await.take() {
            let _ = handle.await;
        }

        info!("Waiting for in-flight jobs to complete...");
        let slots = self.ctx.config.max_concurrent_jobs.max(1) as u32;
        let drained = tokio::time::timeout(
            self.ctx.config.shutdown_timeout,
            self.ctx.job_semaphore.acquire_many(slots),
        )
        .await;

        if drained.is_err() {
            warn!("In-flight jobs did not finish in time, cancelling");
            self.ctx.cancel_all();
            let _ = tokio::time::timeout(CANCEL_GRACE, self.ctx.job_semaphore.acquire_many(slots)).await;
        }

        info!("Job executor stopped");
    }

    async fn dispatch(
        ctx: Arc<ExecutorContext>,
        mut rx: mpsc::Receiver<JobId>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            let job_id = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                job = rx.recv() => match job {
                    Some(id) => id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    Self::fail_interrupted(&ctx, &job_id).await;
                    break;
                }
                permit = Arc::clone(&ctx.job_semaphore).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            debug!(job_id = %job_id, "Dispatching job");
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(ctx, job_id).await;
            });
        }

        rx.close();
        while let Ok(job_id) = rx.try_recv() {
            Self::fail_interrupted(&ctx, &job_id).await;
        }
        debug!("Dispatcher stopped");
    }

    async fn fail_interrupted(ctx: &ExecutorContext, job_id: &JobId) {
        let message = WorkerError::ShuttingDown.user_message();
        ctx.registry
            .update(job_id, |r| r.mark_failed(message))
            .await;
    }

    /// Execute a single job and record the outcome.
    async fn execute_job(ctx: Arc<ExecutorContext>, job_id: JobId) {
        let logger = JobLogger::new(&job_id, "pose_overlay");

        let Some(record) = ctx.registry.update(&job_id, JobRecord::mark_processing).await else {
            logger.log_warning("job was removed before it started");
            return;
        };

        logger.log_start(&format!(
            "{} ({} bytes, stride {}, width {})",
            record.original_filename,
            record.input_bytes,
            record.options.frame_stride,
            record.options.target_width
        ));
        metrics::job_started();
        let started = Instant::now();

        let result = Self::process_job(&ctx, &record, &logger)
            .instrument(logger.span())
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        metrics::job_finished();

        match result {
            Ok(report) => {
                logger.log_completion(&format!(
                    "{} frames written, pose in {}, {:.1}s",
                    report.frames_written, report.frames_with_pose, elapsed
                ));
                metrics::record_job_completed(elapsed, report.frames_written, report.frames_with_pose);
                ctx.registry
                    .update(&job_id, |r| r.mark_completed(report))
                    .await;
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                if let Err(rm) = ctx.storage.remove_file(&record.output_path).await {
                    logger.log_warning(&format!("failed to remove partial output: {}", rm));
                }
                metrics::record_job_failed(elapsed, failure_reason(&e));
                let message = e.user_message();
                ctx.registry
                    .update(&job_id, |r| r.mark_failed(message))
                    .await;
            }
        }
    }

    async fn process_job(
        ctx: &Arc<ExecutorContext>,
        record: &JobRecord,
        logger: &JobLogger,
    ) -> WorkerResult<AnnotationReport> {
        let cancel = JobCancel::new();
        ctx.track(&record.id, cancel.clone());
        let result = Self::annotate(ctx, record, Arc::clone(&cancel.flag)).await;
        if result.is_ok() && ctx.config.web_transcode {
            Self::transcode(ctx, record, logger, cancel.ffmpeg.subscribe()).await;
        }
        ctx.untrack(&record.id);
        result
    }

    /// Run the blocking pipeline under the job timeout, mirroring progress
    /// into the registry.
    async fn annotate(
        ctx: &Arc<ExecutorContext>,
        record: &JobRecord,
        cancel: CancelFlag,
    ) -> WorkerResult<AnnotationReport> {
        let (progress_tx, mut progress_rx) = watch::channel(JobProgress::default());

        let registry = ctx.registry.clone();
        let id = record.id.clone();
        let forwarder = tokio::spawn(async move {
            while progress_rx.changed().await.is_ok() {
                let progress = *progress_rx.borrow_and_update();
                registry.update(&id, |r| r.update_progress(progress)).await;
            }
        });

        let detectors = Arc::clone(&ctx.detectors);
        let input = record.input_path.clone();
        let output = record.output_path.clone();
        let options = record.options;
        let flag = Arc::clone(&cancel);

        let mut task = tokio::task::spawn_blocking(move || -> WorkerResult<AnnotationReport> {
            let mut detector = detectors.create()?;
            let report = annotate_video(
                &input,
                &output,
                &options,
                &mut detector,
                |progress| {
                    progress_tx.send_replace(progress);
                },
                &flag,
            )?;
            Ok(report)
        });

        let result = match tokio::time::timeout(ctx.config.job_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(WorkerError::processing_failed(format!(
                "pipeline task failed: {}",
                join_err
            ))),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                settle_timed_out(task, ctx.config.job_timeout).await
            }
        };

        // The sender lives in the blocking closure, so the forwarder ends
        // once the pipeline returns.
        let _ = forwarder.await;
        result
    }

    /// Re-encode the output for browsers, keeping the original on failure.
    async fn transcode(
        ctx: &ExecutorContext,
        record: &JobRecord,
        logger: &JobLogger,
        cancel_rx: watch::Receiver<bool>,
    ) {
        if check_ffmpeg().is_err() {
            debug!("FFmpeg not found, keeping mp4v output");
            return;
        }

        let web_path = record.output_path.with_extension("web.mp4");
        let started = Instant::now();
        let outcome = match transcode_for_web(
            &record.output_path,
            &web_path,
            Some(ctx.config.job_timeout.as_secs()),
            Some(cancel_rx),
        )
        .await
        {
            Ok(()) => tokio::fs::rename(&web_path, &record.output_path)
                .await
                .map_err(WorkerError::from),
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(()) => {
                metrics::record_transcode_duration(started.elapsed().as_secs_f64());
                logger.log_progress("transcoded to H.264 for web playback");
            }
            Err(e) => {
                logger.log_warning(&format!("web transcode failed, keeping original: {}", e));
                let _ = ctx.storage.remove_file(&web_path).await;
            }
        }
    }
}

/// Wait for a cancelled pipeline to stop so it does not write after the
/// partial output is removed. A run that finished as the timer fired keeps
/// its result.
async fn settle_timed_out<T>(task: JoinHandle<WorkerResult<T>>, timeout: Duration) -> WorkerResult<T> {
    match task.await {
        Ok(Ok(value)) => Ok(value),
        _ => Err(WorkerError::Timeout(timeout.as_secs())),
    }
}

/// Low-cardinality failure label for metrics.
fn failure_reason(err: &WorkerError) -> &'static str {
    match err {
        WorkerError::Timeout(_) => "timeout",
        WorkerError::ShuttingDown | WorkerError::Media(MediaError::Cancelled) => "cancelled",
        WorkerError::Media(MediaError::ModelNotFound(_)) => "model_missing",
        WorkerError::Media(e) if e.is_bad_input() => "bad_input",
        WorkerError::Media(MediaError::DetectionFailed(_)) => "detection",
        WorkerError::Media(MediaError::EncoderFailed(_)) => "encoder",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use opencv::core::{Mat, Scalar, Size, CV_8UC3};
    use opencv::prelude::*;
    use opencv::videoio::VideoWriter;
    use vpose_media::{MediaResult, PoseDetector};
    use vpose_models::{JobState, Keypoint, KeypointKind, Pose, ProcessingOptions};

    struct CenterDetector;

    impl PoseDetector for CenterDetector {
        fn detect(&mut self, frame_bgr: &Mat) -> MediaResult<Option<Pose>> {
            let (w, h) = (frame_bgr.cols() as f32, frame_bgr.rows() as f32);
            Ok(Some(Pose::new([Keypoint::new(w / 2.0, h / 2.0, 0.8); KeypointKind::COUNT])))
        }

        fn name(&self) -> &str {
            "center"
        }
    }

    struct StubFactory {
        available: bool,
    }

    impl DetectorFactory for StubFactory {
        fn create(&self) -> MediaResult<Box<dyn PoseDetector>> {
            if self.available {
                Ok(Box::new(CenterDetector))
            } else {
                Err(MediaError::model_not_found("stub"))
            }
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn write_test_video(path: &Path, frames: usize) {
        let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
        let mut writer =
            VideoWriter::new(path.to_str().unwrap(), fourcc, 25.0, Size::new(320, 240), true)
                .unwrap();
        for i in 0..frames {
            let frame =
                Mat::new_rows_cols_with_default(240, 320, CV_8UC3, Scalar::all((i * 7) as f64))
                    .unwrap();
            writer.write(&frame).unwrap();
        }
        writer.release().unwrap();
    }

    async fn setup(available: bool) -> (tempfile::TempDir, LocalStorage, JobExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), 1 << 20).await.unwrap();
        let config = WorkerConfig {
            web_transcode: false,
            job_timeout: Duration::from_secs(60),
            ..WorkerConfig::default()
        };
        let executor = JobExecutor::start(
            config,
            JobRegistry::new(),
            storage.clone(),
            Arc::new(StubFactory { available }),
        );
        (dir, storage, executor)
    }

    async fn register(executor: &JobExecutor, storage: &LocalStorage, name: &str) -> JobRecord {
        let id = JobId::new();
        let record = JobRecord::new(
            id.clone(),
            name,
            storage.upload_path(&id, name).unwrap(),
            storage.output_path(&id),
            0,
            ProcessingOptions::default(),
        );
        executor.registry().insert(record.clone()).await;
        record
    }

    async fn wait_terminal(executor: &JobExecutor, id: &JobId) -> JobRecord {
        for _ in 0..300 {
            let record = executor.registry().get(id).await.unwrap();
            if record.state.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_job_completes_and_writes_output() {
        let (_dir, storage, executor) = setup(true).await;
        let record = register(&executor, &storage, "clip.avi").await;
        write_test_video(&record.input_path, 12);

        executor.submit(record.id.clone()).unwrap();
        let done = wait_terminal(&executor, &record.id).await;

        assert_eq!(done.state, JobState::Completed, "{:?}", done.error_message);
        let report = done.report.unwrap();
        assert_eq!(report.frames_read, 12);
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.frames_with_pose, 3);
        assert!(record.output_path.exists());
    }

    #[tokio::test]
    async fn test_unreadable_upload_fails_without_output() {
        let (_dir, storage, executor) = setup(true).await;
        let record = register(&executor, &storage, "notes.mp4").await;
        std::fs::write(&record.input_path, b"definitely not a video").unwrap();

        executor.submit(record.id.clone()).unwrap();
        let done = wait_terminal(&executor, &record.id).await;

        assert_eq!(done.state, JobState::Failed);
        assert_eq!(
            done.error_message.as_deref(),
            Some("The uploaded file could not be read as a video")
        );
        assert!(!record.output_path.exists());
    }

    #[tokio::test]
    async fn test_missing_model_fails_job() {
        let (_dir, storage, executor) = setup(false).await;
        assert!(!executor.detector_available());
        let record = register(&executor, &storage, "clip.avi").await;
        write_test_video(&record.input_path, 3);

        executor.submit(record.id.clone()).unwrap();
        let done = wait_terminal(&executor, &record.id).await;

        assert_eq!(done.state, JobState::Failed);
        assert_eq!(
            done.error_message.as_deref(),
            Some("Pose model is not installed on the server")
        );
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let (_dir, _storage, executor) = setup(true).await;
        executor.shutdown().await;
        assert!(executor.is_shutting_down());
        let err = executor.submit(JobId::new()).unwrap_err();
        assert!(matches!(err, WorkerError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_removed_job_is_skipped() {
        let (_dir, storage, executor) = setup(true).await;
        let record = register(&executor, &storage, "gone.avi").await;
        executor.registry().remove(&record.id).await;

        executor.submit(record.id.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(executor.registry().get(&record.id).await.is_none());
        assert_eq!(executor.queued(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_run_that_finished_keeps_its_result() {
        let finished = tokio::task::spawn_blocking(|| Ok::<_, WorkerError>(7u32));
        let value = settle_timed_out(finished, Duration::from_secs(3)).await.unwrap();
        assert_eq!(value, 7);

        let cancelled = tokio::task::spawn_blocking(|| {
            Err::<u32, _>(WorkerError::Media(MediaError::Cancelled))
        });
        let err = settle_timed_out(cancelled, Duration::from_secs(3)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(3)));
    }

    #[tokio::test]
    async fn test_shutdown_cancel_reaches_pipeline_and_ffmpeg() {
        let (_dir, _storage, executor) = setup(true).await;
        let cancel = JobCancel::new();
        let mut ffmpeg_rx = cancel.ffmpeg.subscribe();
        executor.ctx.track(&JobId::new(), cancel.clone());

        executor.ctx.cancel_all();

        assert!(cancel.flag.load(Ordering::Relaxed));
        assert!(*ffmpeg_rx.borrow_and_update());
    }

    #[test]
    fn test_failure_reason_labels() {
        assert_eq!(failure_reason(&WorkerError::Timeout(5)), "timeout");
        assert_eq!(
            failure_reason(&WorkerError::Media(MediaError::invalid_video("x"))),
            "bad_input"
        );
        assert_eq!(failure_reason(&WorkerError::Media(MediaError::Cancelled)), "cancelled");
    }
}
