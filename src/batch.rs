use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::decoder::decode_file;
use crate::detail;
use crate::error::{Error, Result};
use crate::options::ProgramOptions;
use crate::output::{image_name, metadata_name, vegetation_name, OutputSink, SidecarFacts};
use crate::raster::{FileStat, GlobalElevationRange};
use crate::tone::{self, ToneSettings};
use crate::vegetation;

/// Where a file is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStage {
    Pending,
    Decoding,
    Detailing,
    ToneMapping,
    VegetationMasking,
    Writing,
    Done,
    Failed,
}

/// Result of one input file
#[derive(Debug)]
pub struct FileOutcome {
    /// Position in the input list
    pub index: usize,
    pub filename: String,
    /// `Done`, `Failed`, or `Pending` for a file that was never started
    pub stage: FileStage,
    /// Stage that was running when the file failed
    pub failed_during: Option<FileStage>,
    pub error: Option<Error>,
    pub outputs: Vec<PathBuf>,
}

impl FileOutcome {
    fn done(index: usize, filename: &str, outputs: Vec<PathBuf>) -> Self {
        FileOutcome {
            index,
            filename: filename.to_string(),
            stage: FileStage::Done,
            failed_during: None,
            error: None,
            outputs,
        }
    }

    fn failed(index: usize, filename: &str, during: FileStage, error: Error) -> Self {
        FileOutcome {
            index,
            filename: filename.to_string(),
            stage: FileStage::Failed,
            failed_during: Some(during),
            error: Some(error),
            outputs: Vec::new(),
        }
    }

    fn skipped(index: usize, filename: &str) -> Self {
        FileOutcome {
            index,
            filename: filename.to_string(),
            stage: FileStage::Pending,
            failed_during: None,
            error: None,
            outputs: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == FileStage::Done
    }
}

/// Aggregated result of a batch run
#[derive(Debug)]
pub struct BatchReport {
    /// One entry per input, in input order
    pub outcomes: Vec<FileOutcome>,
    /// Files that went through the render phase, successful or not
    pub files_processed: usize,
    /// Set when a fatal error stopped further waves
    pub aborted: bool,
    /// Elevation range shared by every rendered file
    pub global_range: Option<(i16, i16)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        !self.aborted && self.outcomes.iter().all(FileOutcome::is_done)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_done()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_done())
    }
}

/// A file that survived the pre-scan
#[derive(Debug)]
struct Job {
    index: usize,
    path: PathBuf,
    stat: FileStat,
}

/// Shared "files processed" counter
///
/// The lock is also held around each progress line so lines from different
/// workers never interleave with a stale count.
struct Progress {
    total: usize,
    completed: Mutex<usize>,
}

impl Progress {
    fn new(total: usize) -> Self {
        Progress {
            total,
            completed: Mutex::new(0),
        }
    }

    fn started(&self, job: &Job) {
        let _guard = self.completed.lock();
        info!(file = %job.stat.filename, "Processing file {}/{}", job.index + 1, self.total);
    }

    fn finished(&self, filename: &str) {
        let mut completed = self.completed.lock();
        *completed += 1;
        info!(file = %filename, "Completed {}/{}", *completed, self.total);
    }

    fn count(&self) -> usize {
        *self.completed.lock()
    }
}

/// Runs the conversion pipeline over a list of files
///
/// A sequential pre-scan decodes every file once to build the batch-wide
/// elevation range. The render phase then runs each file through
/// decode, detail, tone mapping, vegetation and output, in waves of at most
/// `threads` scoped worker threads.
pub struct BatchCoordinator<S> {
    options: ProgramOptions,
    sink: S,
}

impl<S: OutputSink> BatchCoordinator<S> {
    pub fn new(options: ProgramOptions, sink: S) -> Self {
        BatchCoordinator { options, sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Convert every file and report what happened to each one
    pub fn run(&self, files: &[PathBuf]) -> BatchReport {
        info!(files = files.len(), threads = self.options.threads, "starting batch");

        let (jobs, mut outcomes, global) = self.prescan(files);
        let global_range = global.bounds();
        let tone = self.options.tone_settings(global_range);
        info!(
            min = tone.range.min,
            max = tone.range.max,
            "using elevation range {}..{} m",
            tone.range.min,
            tone.range.max
        );

        let progress = Progress::new(files.len());
        let fatal = AtomicBool::new(false);

        if jobs.len() <= 1 || self.options.threads <= 1 {
            debug!(files = jobs.len(), "rendering sequentially");
            outcomes.extend(self.render_sequential(&jobs, &tone, &progress, &fatal));
        } else {
            outcomes.extend(self.render_waves(&jobs, &tone, &progress, &fatal));
        }

        outcomes.sort_by_key(|outcome| outcome.index);

        let report = BatchReport {
            outcomes,
            files_processed: progress.count(),
            aborted: fatal.load(Ordering::SeqCst),
            global_range,
        };

        if report.is_success() {
            info!(files = report.succeeded(), "batch completed");
        } else {
            for outcome in report.failed() {
                match &outcome.error {
                    Some(err) => warn!(
                        file = %outcome.filename,
                        stage = ?outcome.failed_during,
                        "failed: {}",
                        err
                    ),
                    None => warn!(file = %outcome.filename, "not processed"),
                }
            }
            error!(
                succeeded = report.succeeded(),
                total = files.len(),
                aborted = report.aborted,
                "batch failed"
            );
        }
        report
    }

    /// Decode every file once, collecting per-file facts and the global range
    fn prescan(&self, files: &[PathBuf]) -> (Vec<Job>, Vec<FileOutcome>, GlobalElevationRange) {
        let mut jobs = Vec::with_capacity(files.len());
        let mut failures = Vec::new();
        let mut global = GlobalElevationRange::default();

        for (index, path) in files.iter().enumerate() {
            let filename = path.to_string_lossy();
            match decode_file(path) {
                Ok(raster) => {
                    let stat = FileStat::from_raster(&raster);
                    info!(
                        file = %filename,
                        kind = %stat.raster_type.label(),
                        min = ?stat.min_elevation,
                        max = ?stat.max_elevation,
                        nodata = stat.nodata_count,
                        "NoData {:.2}%",
                        stat.nodata_percent()
                    );
                    global.merge(&stat);
                    jobs.push(Job {
                        index,
                        path: path.clone(),
                        stat,
                    });
                }
                Err(err) => {
                    error!(file = %filename, "{}", err);
                    failures.push(FileOutcome::failed(index, &filename, FileStage::Decoding, err));
                }
            }
        }

        (jobs, failures, global)
    }

    /// Process jobs one after another on the calling thread
    fn render_sequential(
        &self,
        jobs: &[Job],
        tone: &ToneSettings,
        progress: &Progress,
        fatal: &AtomicBool,
    ) -> Vec<FileOutcome> {
        jobs.iter()
            .map(|job| {
                if fatal.load(Ordering::SeqCst) {
                    return FileOutcome::skipped(job.index, &job.stat.filename);
                }
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| self.process(job, tone, progress)));
                settle(job, result, fatal)
            })
            .collect()
    }

    /// Launch workers wave by wave, joining each wave before the next
    fn render_waves(
        &self,
        jobs: &[Job],
        tone: &ToneSettings,
        progress: &Progress,
        fatal: &AtomicBool,
    ) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());

        for (wave, chunk) in jobs.chunks(self.options.threads).enumerate() {
            if fatal.load(Ordering::SeqCst) {
                warn!(wave = wave + 1, files = chunk.len(), "skipping wave after fatal error");
                outcomes.extend(
                    chunk
                        .iter()
                        .map(|job| FileOutcome::skipped(job.index, &job.stat.filename)),
                );
                continue;
            }
            debug!(wave = wave + 1, files = chunk.len(), "launching wave");

            thread::scope(|scope| {
                let mut handles = Vec::with_capacity(chunk.len());

                for job in chunk {
                    if fatal.load(Ordering::SeqCst) {
                        outcomes.push(FileOutcome::skipped(job.index, &job.stat.filename));
                        continue;
                    }

                    let spawned = thread::Builder::new()
                        .name(format!("hgt2png-worker-{}", job.index))
                        .spawn_scoped(scope, move || self.process(job, tone, progress));

                    match spawned {
                        Ok(handle) => handles.push((job, handle)),
                        Err(err) => {
                            error!(file = %job.stat.filename, "can't spawn worker: {}", err);
                            fatal.store(true, Ordering::SeqCst);
                            outcomes.push(FileOutcome::failed(
                                job.index,
                                &job.stat.filename,
                                FileStage::Pending,
                                Error::Threading(err),
                            ));
                        }
                    }
                }

                for (job, handle) in handles {
                    outcomes.push(settle(job, handle.join(), fatal));
                }
            });
        }

        outcomes
    }

    /// Run one file's pipeline and count it as processed
    fn process(&self, job: &Job, tone: &ToneSettings, progress: &Progress) -> FileOutcome {
        progress.started(job);

        let mut stage = FileStage::Pending;
        let outcome = match self.pipeline(&job.path, &job.stat, tone, &mut stage) {
            Ok(outputs) => FileOutcome::done(job.index, &job.stat.filename, outputs),
            Err(err) => {
                error!(file = %job.stat.filename, stage = ?stage, "{}", err);
                FileOutcome::failed(job.index, &job.stat.filename, stage, err)
            }
        };

        progress.finished(&job.stat.filename);
        outcome
    }

    /// Decode, enhance, render and write one file.
    ///
    /// `stage` tracks progress so a failure can be attributed. Buffers are
    /// owned by this call and dropped as soon as it returns.
    fn pipeline(
        &self,
        path: &Path,
        stat: &FileStat,
        tone: &ToneSettings,
        stage: &mut FileStage,
    ) -> Result<Vec<PathBuf>> {
        let options = &self.options;

        *stage = FileStage::Decoding;
        let mut raster = decode_file(path)?;

        if options.enable_detail {
            *stage = FileStage::Detailing;
            raster = detail::synthesize(&raster, &options.detail_options())?;
        }

        *stage = FileStage::ToneMapping;
        let image = tone::render(&raster, tone)?;

        let mask = if options.vegetation_mask {
            *stage = FileStage::VegetationMasking;
            Some(vegetation::generate_mask(&raster, options.biome)?)
        } else {
            None
        };

        *stage = FileStage::Writing;
        let mut outputs = Vec::new();
        let png_name = image_name(&stat.filename);
        outputs.push(self.sink.write_image(&png_name, &image)?);
        drop(image);

        if let Some(mask) = mask {
            let name = vegetation_name(&stat.filename, options.biome);
            outputs.push(self.sink.write_image(&name, &mask)?);
        }

        if let Some(name) = metadata_name(&stat.filename, options.metadata) {
            let facts = SidecarFacts::new(
                stat,
                &png_name,
                raster.width(),
                raster.height(),
                tone.range,
                raster.pixel_pitch_m(),
                options.effective_scale(),
            );
            outputs.push(self.sink.write_metadata(&name, &facts, options.metadata)?);
        }

        *stage = FileStage::Done;
        Ok(outputs)
    }
}

/// Turn a finished or panicked run of `job` into its outcome, raising the
/// fatal flag for panics and fatal errors
fn settle(job: &Job, result: thread::Result<FileOutcome>, fatal: &AtomicBool) -> FileOutcome {
    match result {
        Ok(outcome) => {
            if outcome.error.as_ref().is_some_and(Error::is_fatal) {
                fatal.store(true, Ordering::SeqCst);
            }
            outcome
        }
        Err(_) => {
            error!(file = %job.stat.filename, "worker panicked");
            fatal.store(true, Ordering::SeqCst);
            FileOutcome::failed(
                job.index,
                &job.stat.filename,
                FileStage::Failed,
                Error::WorkerPanic {
                    filename: job.stat.filename.clone(),
                },
            )
        }
    }
}
