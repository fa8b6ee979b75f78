//! Out-of-process transform workers
//!
//! A worker is a child process speaking a JSON-lines protocol on its standard
//! streams: one [`WorkerRequest`] per line in, one [`WorkerResponse`] per line
//! out. The classification snapshot is only sent when it differs from the last
//! one the worker received, identified by its fingerprint.
//!
//! [`WorkerPool`] keeps up to `size` workers alive, spawning them lazily and
//! discarding any worker that fails; the next request spawns a replacement.

use std::{
    collections::BTreeMap,
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    config::WorkerConfig,
    dispatcher::{TransformBackend, TransformRequest},
    rewriter::{self, TransformResult, TransformedSource},
    side_effects::ClassificationSnapshot,
    source_map,
};

/// How long a request waits for a busy worker before re-checking the pool
const CHECKOUT_POLL: Duration = Duration::from_millis(50);

/// Request sent to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub file: String,
    pub original: String,
    /// Full classification; omitted when the worker already has it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effect_free: Option<BTreeMap<String, bool>>,
    /// Fingerprint of the classification this request is made against
    pub fingerprint: String,
    /// Produce an intermediate source map
    #[serde(default)]
    pub source_map: bool,
}

/// Response from a worker
///
/// Neither `output` nor `error` set means the file is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Intermediate source map JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serve transform requests until `reader` is exhausted
///
/// Per-request failures are reported in the response; only I/O errors on the
/// streams themselves end the loop with an error.
pub fn serve<R: BufRead, W: Write>(reader: R, mut writer: W) -> Result<()> {
    let mut classification: Option<ClassificationSnapshot> = None;

    for line in reader.lines() {
        let line = line.context("failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => {
                let file = request.file.clone();
                handle(request, &mut classification).unwrap_or_else(|err| WorkerResponse {
                    file,
                    error: Some(format!("{err:#}")),
                    ..WorkerResponse::default()
                })
            }
            Err(err) => WorkerResponse {
                error: Some(format!("malformed request: {err}")),
                ..WorkerResponse::default()
            },
        };

        serde_json::to_writer(&mut writer, &response).context("failed to encode response")?;
        writer.write_all(b"\n").context("failed to write response")?;
        writer.flush().context("failed to flush response")?;
    }

    debug!("Request stream closed, worker exiting");
    Ok(())
}

fn handle(
    request: WorkerRequest,
    classification: &mut Option<ClassificationSnapshot>,
) -> Result<WorkerResponse> {
    if let Some(entries) = request.side_effect_free {
        let snapshot = ClassificationSnapshot::from_entries(entries.into_iter().collect());
        trace!("Received classification {}", snapshot.fingerprint());
        *classification = Some(snapshot);
    }

    let snapshot = classification
        .as_ref()
        .ok_or_else(|| anyhow!("no classification received before {}", request.file))?;
    if snapshot.fingerprint() != request.fingerprint {
        bail!(
            "classification fingerprint mismatch: have {}, request expects {}",
            snapshot.fingerprint(),
            request.fingerprint
        );
    }

    let map_file = request.source_map.then_some(request.file.as_str());
    let response = match rewriter::transform_file(&request.original, snapshot, map_file) {
        TransformResult::Unchanged => WorkerResponse {
            file: request.file,
            ..WorkerResponse::default()
        },
        TransformResult::Changed(changed) => WorkerResponse {
            map: changed.map.as_ref().map(source_map::to_json).transpose()?,
            output: Some(changed.code),
            file: request.file,
            error: None,
        },
    };
    Ok(response)
}

/// One running worker process
#[derive(Debug)]
struct WorkerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// Fingerprint of the last classification sent
    fingerprint: Option<String>,
}

impl WorkerProcess {
    fn spawn(config: &WorkerConfig) -> Result<Self> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn worker {}", config.program.display()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture worker stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture worker stdout"))?;

        debug!("Spawned worker {} (pid {})", config.program.display(), child.id());
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            fingerprint: None,
        })
    }

    fn transform(&mut self, request: &TransformRequest<'_>) -> Result<TransformResult> {
        let fingerprint = request.classification.fingerprint();
        let side_effect_free = (self.fingerprint.as_deref() != Some(fingerprint)).then(|| {
            request
                .classification
                .entries()
                .iter()
                .map(|(key, free)| (key.clone(), *free))
                .collect()
        });

        let message = WorkerRequest {
            file: request.file.to_owned(),
            original: request.code.to_owned(),
            side_effect_free,
            fingerprint: fingerprint.to_owned(),
            source_map: request.source_map,
        };
        let mut line = serde_json::to_string(&message).context("failed to encode request")?;
        line.push('\n');

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("worker stdin is closed"))?;
        stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.flush())
            .context("failed to send request to worker")?;
        self.fingerprint = Some(fingerprint.to_owned());

        let mut reply = String::new();
        let read = self
            .stdout
            .read_line(&mut reply)
            .context("failed to read worker response")?;
        if read == 0 {
            bail!("worker exited unexpectedly");
        }

        let response: WorkerResponse =
            serde_json::from_str(&reply).context("malformed worker response")?;
        if response.file != request.file {
            bail!(
                "worker answered for {} while transforming {}",
                response.file,
                request.file
            );
        }
        if let Some(error) = response.error {
            bail!("worker failed: {error}");
        }

        match response.output {
            None => Ok(TransformResult::Unchanged),
            Some(code) => Ok(TransformResult::Changed(TransformedSource {
                code,
                map: response.map.as_deref().map(source_map::parse).transpose()?,
            })),
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // Closing stdin ends the worker's request loop
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Pool of worker processes used as a transform backend
#[derive(Debug)]
pub struct WorkerPool {
    config: WorkerConfig,
    size: usize,
    idle_tx: Sender<WorkerProcess>,
    idle_rx: Receiver<WorkerProcess>,
    /// Workers spawned and not yet discarded
    live: AtomicUsize,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Create a pool of at most `size` workers; workers start on demand
    pub fn new(config: WorkerConfig, size: usize) -> Self {
        let (idle_tx, idle_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            size: size.max(1),
            idle_tx,
            idle_rx,
            live: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of worker processes currently alive
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn checkout(&self) -> Result<WorkerProcess> {
        loop {
            if let Ok(worker) = self.idle_rx.try_recv() {
                return Ok(worker);
            }

            if self.live.fetch_add(1, Ordering::SeqCst) < self.size {
                return WorkerProcess::spawn(&self.config).inspect_err(|_| {
                    self.live.fetch_sub(1, Ordering::SeqCst);
                });
            }
            self.live.fetch_sub(1, Ordering::SeqCst);

            match self.idle_rx.recv_timeout(CHECKOUT_POLL) {
                Ok(worker) => return Ok(worker),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => bail!("worker pool is closed"),
            }
        }
    }

    fn checkin(&self, worker: WorkerProcess) {
        if self.closed.load(Ordering::SeqCst) {
            self.discard(worker);
            return;
        }
        if let Err(returned) = self.idle_tx.send(worker) {
            self.discard(returned.into_inner());
        }
    }

    fn discard(&self, worker: WorkerProcess) {
        drop(worker);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TransformBackend for WorkerPool {
    fn transform(&self, request: &TransformRequest<'_>) -> Result<TransformResult> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("worker pool is shut down");
        }

        let mut worker = self.checkout()?;
        match worker.transform(request) {
            Ok(result) => {
                self.checkin(worker);
                Ok(result)
            }
            Err(err) => {
                warn!("Discarding worker after failure on {}: {err:#}", request.file);
                self.discard(worker);
                Err(err)
            }
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut stopped = 0;
        for worker in self.idle_rx.try_iter() {
            self.discard(worker);
            stopped += 1;
        }
        if stopped > 0 {
            debug!("Stopped {stopped} idle workers");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap;

    use super::*;

    const FOO: &str = "foo__WEBPACK_IMPORTED_MODULE_0__";

    fn snapshot() -> ClassificationSnapshot {
        let mut entries = FxHashMap::default();
        entries.insert("./foo.js".to_string(), true);
        ClassificationSnapshot::from_entries(entries)
    }

    fn request(file: &str, with_classification: bool) -> WorkerRequest {
        let snapshot = snapshot();
        WorkerRequest {
            file: file.to_string(),
            original: format!("var {FOO} = __webpack_require__(\"./foo.js\");\n{FOO}();"),
            side_effect_free: with_classification.then(|| {
                snapshot
                    .entries()
                    .iter()
                    .map(|(key, free)| (key.clone(), *free))
                    .collect()
            }),
            fingerprint: snapshot.fingerprint().to_string(),
            source_map: false,
        }
    }

    fn run(requests: &[String]) -> Vec<WorkerResponse> {
        let input = requests.join("\n");
        let mut output = Vec::new();
        serve(Cursor::new(input), &mut output).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(request("main.js", false)).unwrap();
        assert_eq!(json["file"], "main.js");
        assert!(json.get("side_effect_free").is_none());
        assert_eq!(json["source_map"], false);
    }

    #[test]
    fn test_serve_reuses_classification_between_requests() {
        let responses = run(&[
            serde_json::to_string(&request("a.js", true)).unwrap(),
            serde_json::to_string(&request("b.js", false)).unwrap(),
        ]);

        assert_eq!(responses.len(), 2);
        for (response, file) in responses.iter().zip(["a.js", "b.js"]) {
            assert_eq!(response.file, file);
            assert_eq!(response.error, None);
            assert_eq!(
                response.output.as_deref(),
                Some("// (inlined) ./foo.js\n(__webpack_require__(\"./foo.js\"))();")
            );
        }
    }

    #[test]
    fn test_serve_reports_missing_classification() {
        let responses = run(&[serde_json::to_string(&request("a.js", false)).unwrap()]);
        assert_eq!(responses[0].file, "a.js");
        assert!(
            responses[0]
                .error
                .as_deref()
                .unwrap()
                .contains("no classification")
        );
    }

    #[test]
    fn test_serve_answers_malformed_lines_and_continues() {
        let responses = run(&[
            "{not json".to_string(),
            String::new(),
            serde_json::to_string(&request("a.js", true)).unwrap(),
        ]);
        assert_eq!(responses.len(), 2);
        assert!(responses[0].error.is_some());
        assert!(responses[1].output.is_some());
    }

    #[test]
    fn test_serve_returns_map_on_request() {
        let mut with_map = request("a.js", true);
        with_map.source_map = true;
        let responses = run(&[serde_json::to_string(&with_map).unwrap()]);
        let map = source_map::parse(responses[0].map.as_deref().unwrap()).unwrap();
        assert_eq!(map.get_source(0), Some("a.js"));
    }

    #[test]
    fn test_unchanged_file_has_no_output() {
        let mut unchanged = request("a.js", true);
        unchanged.original = "console.log(1);".to_string();
        let responses = run(&[serde_json::to_string(&unchanged).unwrap()]);
        assert_eq!(
            responses[0],
            WorkerResponse {
                file: "a.js".to_string(),
                ..WorkerResponse::default()
            }
        );
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let pool = WorkerPool::new(
            WorkerConfig {
                program: "/nonexistent/inline-require-worker".into(),
                args: Vec::new(),
            },
            1,
        );
        let snapshot = snapshot();
        let result = pool.transform(&TransformRequest {
            file: "a.js",
            code: "",
            classification: &snapshot,
            source_map: false,
        });
        assert!(result.is_err());
        assert_eq!(pool.live_workers(), 0);
    }
}
