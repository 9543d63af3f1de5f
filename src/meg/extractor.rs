use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{Error, ParsePhase, Result};
use crate::io::ReadAt;

use super::parser::MegParser;
use super::structures::{FileDescriptor, MegArchive};

/// Default streaming chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// What to do when a single entry fails to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop the whole run at the first failing entry.
    #[default]
    Abort,
    /// Log the failure, record it in the report and move on.
    BestEffort,
}

/// Extraction settings.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Root that archive paths are recreated under
    pub output_dir: PathBuf,
    pub chunk_size: usize,
    pub policy: FailurePolicy,
    /// Entries extracted at once; 1 keeps the run strictly sequential
    pub concurrency: usize,
    /// Checked before each entry starts
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
            policy: FailurePolicy::Abort,
            concurrency: 1,
            cancel: None,
        }
    }
}

impl ExtractOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Receives extraction progress. Every method defaults to a no-op.
pub trait ExtractObserver: Send + Sync {
    fn entry_started(&self, _path: &str, _size: u64) {}

    /// Called after each chunk with its length and the running total for the entry.
    fn chunk_written(&self, _path: &str, _chunk: u64, _written: u64) {}

    fn entry_finished(&self, _path: &str, _written: u64) {}

    fn entry_failed(&self, _path: &str, _error: &Error) {}
}

/// Observer that ignores everything.
pub struct NoProgress;

impl ExtractObserver for NoProgress {}

/// An entry skipped in best-effort mode.
#[derive(Debug)]
pub struct EntryFailure {
    pub path: String,
    pub error: Error,
}

/// Outcome of a full extraction run.
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Distinct output files written
    pub extracted: usize,
    pub bytes_written: u64,
    /// Entries skipped because a later entry resolves to the same output file
    pub superseded: usize,
    pub failures: Vec<EntryFailure>,
}

impl ExtractReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One output file and the entry that fills it.
#[derive(Debug, Clone)]
struct Job {
    path: String,
    output: PathBuf,
    descriptor: FileDescriptor,
}

/// Resolve every entry to its output file before anything is written.
///
/// Archive paths that differ only in separators, roots or `.` segments
/// land on the same file; the entry latest in index order wins and keeps
/// the slot of the first one, so every output file has exactly one job.
fn plan_jobs(
    archive: &MegArchive,
    root: &Path,
    report: &mut ExtractReport,
    policy: FailurePolicy,
    observer: &dyn ExtractObserver,
) -> Result<Vec<Job>> {
    let mut jobs: Vec<Job> = Vec::with_capacity(archive.index.len());
    let mut slots: HashMap<PathBuf, usize> = HashMap::with_capacity(archive.index.len());

    for (path, descriptor) in archive.index.iter() {
        let output = match resolve_output_path(root, path) {
            Ok(output) => output,
            Err(error) => {
                settle(report, policy, observer, path.to_string(), Err(error))?;
                continue;
            }
        };

        let job = Job {
            path: path.to_string(),
            output,
            descriptor: *descriptor,
        };
        match slots.get(&job.output) {
            Some(&slot) => {
                debug!(
                    earlier = %jobs[slot].path,
                    later = %job.path,
                    "entries share an output file, keeping the later one"
                );
                report.superseded += 1;
                jobs[slot] = job;
            }
            None => {
                slots.insert(job.output.clone(), jobs.len());
                jobs.push(job);
            }
        }
    }

    Ok(jobs)
}

/// MEG archive extractor
pub struct MegExtractor<R: ReadAt> {
    parser: MegParser<R>,
}

impl<R: ReadAt + 'static> MegExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: MegParser::new(reader),
        }
    }

    /// Parse the header and both tables.
    pub async fn open(&self) -> Result<MegArchive> {
        self.parser.parse().await
    }

    /// Extract every indexed entry under `options.output_dir`.
    pub async fn extract_all(
        &self,
        archive: &MegArchive,
        options: &ExtractOptions,
        observer: Arc<dyn ExtractObserver>,
    ) -> Result<ExtractReport> {
        let mut report = ExtractReport::default();
        let jobs = plan_jobs(
            archive,
            &options.output_dir,
            &mut report,
            options.policy,
            observer.as_ref(),
        )?;

        if options.concurrency > 1 {
            return self.extract_concurrent(jobs, report, options, observer).await;
        }

        for job in jobs {
            if options.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let result = extract_entry(
                self.parser.reader().as_ref(),
                &job,
                options.chunk_size,
                observer.as_ref(),
            )
            .await;
            settle(&mut report, options.policy, observer.as_ref(), job.path, result)?;
        }

        Ok(report)
    }

    async fn extract_concurrent(
        &self,
        jobs: Vec<Job>,
        mut report: ExtractReport,
        options: &ExtractOptions,
        observer: Arc<dyn ExtractObserver>,
    ) -> Result<ExtractReport> {
        let permits = Arc::new(Semaphore::new(options.concurrency));
        let mut tasks = JoinSet::new();
        let mut fatal = None;

        for job in jobs {
            if options.is_cancelled() {
                fatal = Some(Error::Cancelled);
                break;
            }

            while let Some(done) = tasks.try_join_next() {
                let settled = settle_joined(&mut report, options.policy, observer.as_ref(), done);
                if let Err(e) = settled {
                    fatal.get_or_insert(e);
                }
            }
            if fatal.is_some() {
                break;
            }

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let reader = Arc::clone(self.parser.reader());
            let observer = Arc::clone(&observer);
            let chunk_size = options.chunk_size;

            tasks.spawn(async move {
                let result =
                    extract_entry(reader.as_ref(), &job, chunk_size, observer.as_ref()).await;
                drop(permit);
                (job.path, result)
            });
        }

        // In-flight entries always run to completion.
        while let Some(done) = tasks.join_next().await {
            if let Err(e) = settle_joined(&mut report, options.policy, observer.as_ref(), done) {
                fatal.get_or_insert(e);
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Record one entry's outcome. Returns the error when the run must stop.
fn settle(
    report: &mut ExtractReport,
    policy: FailurePolicy,
    observer: &dyn ExtractObserver,
    path: String,
    result: Result<u64>,
) -> Result<()> {
    match result {
        Ok(written) => {
            observer.entry_finished(&path, written);
            report.extracted += 1;
            report.bytes_written += written;
            Ok(())
        }
        Err(error) => {
            observer.entry_failed(&path, &error);
            match policy {
                FailurePolicy::Abort => Err(error),
                FailurePolicy::BestEffort => {
                    warn!(path = %path, error = %error, "skipping entry");
                    report.failures.push(EntryFailure { path, error });
                    Ok(())
                }
            }
        }
    }
}

fn settle_joined(
    report: &mut ExtractReport,
    policy: FailurePolicy,
    observer: &dyn ExtractObserver,
    joined: std::result::Result<(String, Result<u64>), JoinError>,
) -> Result<()> {
    match joined {
        Ok((path, result)) => settle(report, policy, observer, path, result),
        Err(e) => Err(Error::io("extraction task failed", std::io::Error::other(e))),
    }
}

/// Map an archive-internal path onto `root`.
///
/// Both `\` and `/` separate components. Empty and `.` components and a
/// leading drive prefix are dropped; `..` is rejected so nothing lands
/// outside `root`.
pub fn resolve_output_path(root: &Path, name: &str) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    let mut pushed = false;

    for part in name.split(['\\', '/']) {
        match part {
            "" | "." => {}
            ".." => {
                return Err(Error::malformed(
                    ParsePhase::Extraction,
                    format!("path escapes the output directory: {name}"),
                ));
            }
            drive if !pushed && drive.len() == 2 && drive.ends_with(':') => {}
            part => {
                out.push(part);
                pushed = true;
            }
        }
    }

    if !pushed {
        return Err(Error::malformed(
            ParsePhase::Extraction,
            format!("path has no file name: {name:?}"),
        ));
    }

    Ok(out)
}

/// Stream one payload to its output file. Returns the bytes written.
async fn extract_entry<R: ReadAt + ?Sized>(
    reader: &R,
    job: &Job,
    chunk_size: usize,
    observer: &dyn ExtractObserver,
) -> Result<u64> {
    let Job {
        path,
        output: output_path,
        descriptor,
    } = job;

    // create_dir_all treats a directory created concurrently as success.
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
        }
    }

    let mut file = fs::File::create(output_path)
        .await
        .map_err(|e| Error::io(format!("failed to create {}", output_path.display()), e))?;

    info!(path = %path, size = descriptor.file_size, "extracting");
    observer.entry_started(path, descriptor.file_size as u64);

    let end = descriptor.data_end();
    let mut offset = descriptor.data_offset as u64;
    let mut written = 0u64;
    let mut buf = vec![0u8; chunk_size.clamp(1, (descriptor.file_size as usize).max(1))];

    while offset < end {
        let want = (end - offset).min(buf.len() as u64) as usize;
        let n = reader.read_at(offset, &mut buf[..want]).await?;
        if n == 0 {
            return Err(Error::malformed(
                ParsePhase::Extraction,
                format!("payload of {path} ends early at offset {offset}"),
            ));
        }

        file.write_all(&buf[..n])
            .await
            .map_err(|e| Error::io(format!("failed to write {}", output_path.display()), e))?;
        offset += n as u64;
        written += n as u64;
        observer.chunk_written(path, n as u64, written);
    }

    file.flush()
        .await
        .map_err(|e| Error::io(format!("failed to flush {}", output_path.display()), e))?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MmapReader;
    use crate::meg::testing::ArchiveBuilder;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        chunks: Mutex<Vec<(String, u64, u64)>>,
        finished: Mutex<Vec<(String, u64)>>,
        failed: Mutex<Vec<String>>,
    }

    impl ExtractObserver for Recorder {
        fn chunk_written(&self, path: &str, chunk: u64, written: u64) {
            self.chunks.lock().unwrap().push((path.to_string(), chunk, written));
        }

        fn entry_finished(&self, path: &str, written: u64) {
            self.finished.lock().unwrap().push((path.to_string(), written));
        }

        fn entry_failed(&self, path: &str, _error: &Error) {
            self.failed.lock().unwrap().push(path.to_string());
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        out: PathBuf,
        extractor: MegExtractor<MmapReader>,
    }

    fn fixture(bytes: &[u8]) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("test.meg");
        std::fs::write(&archive, bytes).expect("write archive");
        let out = dir.path().join("out");
        let reader = Arc::new(MmapReader::open(&archive).expect("open archive"));
        Fixture {
            _dir: dir,
            out,
            extractor: MegExtractor::new(reader),
        }
    }

    fn options(out: &Path) -> ExtractOptions {
        ExtractOptions {
            output_dir: out.to_path_buf(),
            ..ExtractOptions::default()
        }
    }

    #[tokio::test]
    async fn extracts_nested_and_flat_entries() {
        let bytes = ArchiveBuilder::new()
            .name("a/b.txt")
            .name("c.txt")
            .file(0, b"hello")
            .file(1, b"world!")
            .build();
        let fx = fixture(&bytes);

        let archive = fx.extractor.open().await.expect("open");
        let report = fx
            .extractor
            .extract_all(&archive, &options(&fx.out), Arc::new(NoProgress))
            .await
            .expect("extract");

        assert!(fx.out.join("a").is_dir());
        assert_eq!(std::fs::read(fx.out.join("a/b.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(fx.out.join("c.txt")).unwrap(), b"world!");
        assert_eq!(report.extracted, 2);
        assert_eq!(report.bytes_written, 11);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn backslash_paths_become_directories() {
        let bytes = ArchiveBuilder::new()
            .name("DATA\\ART\\UNIT.TGA")
            .file(0, b"tga")
            .build();
        let fx = fixture(&bytes);

        let archive = fx.extractor.open().await.expect("open");
        fx.extractor
            .extract_all(&archive, &options(&fx.out), Arc::new(NoProgress))
            .await
            .expect("extract");

        assert_eq!(std::fs::read(fx.out.join("DATA/ART/UNIT.TGA")).unwrap(), b"tga");
    }

    #[tokio::test]
    async fn duplicate_path_gets_later_payload() {
        let bytes = ArchiveBuilder::new()
            .name("dup.txt")
            .file(0, b"earlier and longer")
            .file(0, b"later")
            .build();
        let fx = fixture(&bytes);

        let archive = fx.extractor.open().await.expect("open");
        let report = fx
            .extractor
            .extract_all(&archive, &options(&fx.out), Arc::new(NoProgress))
            .await
            .expect("extract");

        assert_eq!(std::fs::read(fx.out.join("dup.txt")).unwrap(), b"later");
        assert_eq!(report.extracted, 1);
    }

    #[tokio::test]
    async fn progress_is_reported_per_chunk_with_running_total() {
        let payload: Vec<u8> = (0..10u8).collect();
        let bytes = ArchiveBuilder::new().name("n.bin").file(0, &payload).build();
        let fx = fixture(&bytes);
        let recorder = Arc::new(Recorder::default());

        let archive = fx.extractor.open().await.expect("open");
        let opts = ExtractOptions {
            chunk_size: 4,
            ..options(&fx.out)
        };
        fx.extractor
            .extract_all(&archive, &opts, recorder.clone())
            .await
            .expect("extract");

        let chunks = recorder.chunks.lock().unwrap().clone();
        let seen: Vec<_> = chunks.iter().map(|(_, c, w)| (*c, *w)).collect();
        assert_eq!(seen, vec![(4, 4), (4, 8), (2, 10)]);
        assert_eq!(*recorder.finished.lock().unwrap(), vec![("n.bin".to_string(), 10)]);
        assert_eq!(std::fs::read(fx.out.join("n.bin")).unwrap(), payload);
    }

    #[tokio::test]
    async fn empty_payload_creates_empty_file() {
        let bytes = ArchiveBuilder::new().name("empty.dat").file(0, b"").build();
        let fx = fixture(&bytes);

        let archive = fx.extractor.open().await.expect("open");
        let report = fx
            .extractor
            .extract_all(&archive, &options(&fx.out), Arc::new(NoProgress))
            .await
            .expect("extract");

        assert_eq!(std::fs::read(fx.out.join("empty.dat")).unwrap(), b"");
        assert_eq!(report.bytes_written, 0);
    }

    #[tokio::test]
    async fn existing_file_is_truncated() {
        let bytes = ArchiveBuilder::new().name("x.txt").file(0, b"new").build();
        let fx = fixture(&bytes);
        std::fs::create_dir_all(&fx.out).unwrap();
        std::fs::write(fx.out.join("x.txt"), b"much older contents").unwrap();

        let archive = fx.extractor.open().await.expect("open");
        fx.extractor
            .extract_all(&archive, &options(&fx.out), Arc::new(NoProgress))
            .await
            .expect("extract");

        assert_eq!(std::fs::read(fx.out.join("x.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn traversal_aborts_by_default() {
        let bytes = ArchiveBuilder::new()
            .name("../evil.txt")
            .name("fine.txt")
            .file(0, b"bad")
            .file(1, b"good")
            .build();
        let fx = fixture(&bytes);

        let archive = fx.extractor.open().await.expect("open");
        let err = fx
            .extractor
            .extract_all(&archive, &options(&fx.out), Arc::new(NoProgress))
            .await
            .expect_err("traversal must fail");

        assert_eq!(err.phase(), Some(ParsePhase::Extraction));
        assert!(!fx.out.join("fine.txt").exists());
    }

    #[tokio::test]
    async fn best_effort_skips_and_reports_failures() {
        let bytes = ArchiveBuilder::new()
            .name("../evil.txt")
            .name("fine.txt")
            .file(0, b"bad")
            .file(1, b"good")
            .build();
        let fx = fixture(&bytes);
        let recorder = Arc::new(Recorder::default());

        let archive = fx.extractor.open().await.expect("open");
        let opts = ExtractOptions {
            policy: FailurePolicy::BestEffort,
            ..options(&fx.out)
        };
        let report = fx
            .extractor
            .extract_all(&archive, &opts, recorder.clone())
            .await
            .expect("best effort run completes");

        assert_eq!(report.extracted, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "../evil.txt");
        assert_eq!(*recorder.failed.lock().unwrap(), vec!["../evil.txt".to_string()]);
        assert_eq!(std::fs::read(fx.out.join("fine.txt")).unwrap(), b"good");
    }

    #[tokio::test]
    async fn concurrent_run_extracts_every_entry() {
        let mut builder = ArchiveBuilder::new();
        for i in 0..16u16 {
            builder = builder.name(&format!("shared/dir/file{i}.bin"));
        }
        for i in 0..16u16 {
            builder = builder.file(i, format!("payload-{i}").as_bytes());
        }
        let bytes = builder.build();
        let fx = fixture(&bytes);

        let archive = fx.extractor.open().await.expect("open");
        let opts = ExtractOptions {
            concurrency: 4,
            chunk_size: 3,
            ..options(&fx.out)
        };
        let report = fx
            .extractor
            .extract_all(&archive, &opts, Arc::new(NoProgress))
            .await
            .expect("extract");

        assert_eq!(report.extracted, 16);
        assert_eq!(report.bytes_written, archive.index.total_bytes());
        for i in 0..16 {
            let got = std::fs::read(fx.out.join(format!("shared/dir/file{i}.bin"))).unwrap();
            assert_eq!(got, format!("payload-{i}").into_bytes());
        }
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_next_entry() {
        let bytes = ArchiveBuilder::new().name("a.txt").file(0, b"a").build();
        let fx = fixture(&bytes);

        let archive = fx.extractor.open().await.expect("open");
        let opts = ExtractOptions {
            cancel: Some(Arc::new(AtomicBool::new(true))),
            ..options(&fx.out)
        };

        for concurrency in [1, 4] {
            let opts = ExtractOptions {
                concurrency,
                ..opts.clone()
            };
            let err = fx
                .extractor
                .extract_all(&archive, &opts, Arc::new(NoProgress))
                .await
                .expect_err("cancelled");
            assert!(matches!(err, Error::Cancelled));
        }
        assert!(!fx.out.join("a.txt").exists());
    }

    fn aliasing_archive() -> Vec<u8> {
        ArchiveBuilder::new()
            .name("d/x.bin")
            .name("d\\x.bin")
            .name("./d/x.bin")
            .name("other.bin")
            .file(0, &vec![b'A'; 256 * 1024])
            .file(3, b"other")
            .file(1, b"BBBB")
            .file(2, b"CCCCCC")
            .build()
    }

    #[tokio::test]
    async fn aliased_output_paths_keep_only_the_last_entry() {
        for concurrency in [1, 4] {
            for _ in 0..10 {
                let fx = fixture(&aliasing_archive());
                let archive = fx.extractor.open().await.expect("open");
                assert_eq!(archive.index.len(), 4);

                let opts = ExtractOptions {
                    concurrency,
                    chunk_size: 512,
                    ..options(&fx.out)
                };
                let report = fx
                    .extractor
                    .extract_all(&archive, &opts, Arc::new(NoProgress))
                    .await
                    .expect("extract");

                assert_eq!(std::fs::read(fx.out.join("d/x.bin")).unwrap(), b"CCCCCC");
                assert_eq!(std::fs::read(fx.out.join("other.bin")).unwrap(), b"other");
                assert_eq!(report.extracted, 2, "concurrency {concurrency}");
                assert_eq!(report.superseded, 2);
                assert_eq!(report.bytes_written, 11);
            }
        }
    }

    #[test]
    fn output_paths_stay_under_root() {
        let root = Path::new("root");
        assert_eq!(
            resolve_output_path(root, "a\\b/c.txt").unwrap(),
            root.join("a").join("b").join("c.txt")
        );
        assert_eq!(
            resolve_output_path(root, "/abs/./x.bin").unwrap(),
            root.join("abs").join("x.bin")
        );
        assert_eq!(
            resolve_output_path(root, "C:\\games\\x.bin").unwrap(),
            root.join("games").join("x.bin")
        );
        assert!(resolve_output_path(root, "a/../../x").is_err());
        assert!(resolve_output_path(root, "").is_err());
        assert!(resolve_output_path(root, "\\/").is_err());
    }
}
