//! Turn-level synthesis scheduler.
//!
//! Requests run concurrently inside a batch and batches run one after another.
//! A per-turn WAV at its deterministic path marks the turn as done, so a
//! failed run can simply be started again.

use crate::audio;
use crate::config::{Channel, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::request::TurnSynthesisRequest;
use crate::script::Speaker;
use crate::tts::{SynthesisCall, Synthesizer};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, error, info, warn};

/// Nested layout used by older pipeline versions.
pub const LEGACY_TURNS_DIR: &str = "turns";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnAudioArtifact {
    pub id: u32,
    pub speaker: Speaker,
    pub channel: Channel,
    pub chapter: String,
    /// Relative to the output directory.
    pub wav: String,
    pub frames: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub max_parallel: usize,
    pub request_timeout: Duration,
    pub batch_wait: Duration,
    pub cooldown: Duration,
    pub temperature: f32,
    pub voices: BTreeMap<Channel, String>,
}

impl SchedulerOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_parallel: config.max_parallel_requests,
            request_timeout: config.request_timeout(),
            batch_wait: config.batch_wait(),
            cooldown: config.batch_cooldown(),
            temperature: config.temperature,
            voices: SynthesisCall::voices_from(&config.channels),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchStats {
    pub size: usize,
    pub fresh: usize,
    pub resumed: usize,
    pub cooled_down: bool,
}

#[derive(Debug, Clone)]
pub struct ScheduleReport {
    pub artifacts: Vec<TurnAudioArtifact>,
    pub batches: Vec<BatchStats>,
}

impl ScheduleReport {
    pub fn fresh_total(&self) -> usize {
        self.batches.iter().map(|b| b.fresh).sum()
    }
}

/// Zero-pad width so every file name sorts like its id (at least 2).
pub fn id_width(requests: &[TurnSynthesisRequest]) -> usize {
    let max_id = requests.iter().map(|r| r.id).max().unwrap_or(0);
    max_id.to_string().len().max(2)
}

pub fn turn_file_name(id: u32, width: usize) -> String {
    format!("{:0width$}.wav", id, width = width)
}

/// Move files from the legacy `turns/` folder into the flat layout.
/// Safe to re-run; never overwrites and never fails the run.
pub fn migrate_legacy_layout(out_dir: &Path) -> usize {
    let legacy = out_dir.join(LEGACY_TURNS_DIR);
    if !legacy.is_dir() {
        return 0;
    }
    let entries = match fs::read_dir(&legacy) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read legacy folder {}: {}", legacy.display(), e);
            return 0;
        }
    };

    let mut moved = 0;
    for entry in entries.flatten() {
        let src = entry.path();
        if !src.is_file() {
            continue;
        }
        let target = out_dir.join(entry.file_name());
        if target.exists() {
            debug!("Keeping existing {}; legacy copy left in place", target.display());
            continue;
        }
        match fs::rename(&src, &target) {
            Ok(()) => {
                info!("Migrated {} -> {}", src.display(), target.display());
                moved += 1;
            }
            Err(e) => warn!("Failed to migrate {}: {}", src.display(), e),
        }
    }

    if let Err(e) = fs::remove_dir(&legacy) {
        warn!("Legacy folder {} not removed: {}", legacy.display(), e);
    }
    moved
}

/// Drive every request to a per-turn WAV in `out_dir`, returning artifacts sorted by id.
pub async fn synthesize_all(
    requests: &[TurnSynthesisRequest],
    out_dir: &Path,
    synthesizer: Arc<dyn Synthesizer>,
    opts: &SchedulerOptions,
) -> Result<ScheduleReport> {
    if opts.max_parallel == 0 {
        return Err(PipelineError::config("max_parallel_requests", "must be at least 1"));
    }
    if opts.request_timeout.is_zero() {
        return Err(PipelineError::config("timeout_seconds", "must be > 0"));
    }
    if opts.batch_wait < opts.request_timeout {
        return Err(PipelineError::config(
            "batch_wait_seconds",
            "must be >= timeout_seconds",
        ));
    }
    if let Some((channel, _)) = opts.voices.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(PipelineError::config(
            format!("channels.{channel}.voice"),
            "must not be empty",
        ));
    }

    fs::create_dir_all(out_dir)?;
    let width = id_width(requests);
    let batches: Vec<&[TurnSynthesisRequest]> = requests.chunks(opts.max_parallel).collect();
    info!(
        "Scheduling {} turns in {} batches of up to {}",
        requests.len(),
        batches.len(),
        opts.max_parallel
    );

    let mut artifacts = Vec::with_capacity(requests.len());
    let mut stats = Vec::with_capacity(batches.len());

    for (index, batch) in batches.iter().enumerate() {
        let mut batch_stats = run_batch(batch, out_dir, width, &synthesizer, opts, &mut artifacts).await?;
        info!(
            "Batch {}/{} done: {} fresh, {} resumed",
            index + 1,
            batches.len(),
            batch_stats.fresh,
            batch_stats.resumed
        );

        let later_missing = batches[index + 1..]
            .iter()
            .flat_map(|b| b.iter())
            .any(|r| !out_dir.join(turn_file_name(r.id, width)).exists());
        if batch_stats.fresh > 0 && later_missing {
            info!("Cooling down for {:?} before next batch", opts.cooldown);
            sleep(opts.cooldown).await;
            batch_stats.cooled_down = true;
        }
        stats.push(batch_stats);
    }

    artifacts.sort_by_key(|a| a.id);
    Ok(ScheduleReport {
        artifacts,
        batches: stats,
    })
}

async fn run_batch(
    batch: &[TurnSynthesisRequest],
    out_dir: &Path,
    width: usize,
    synthesizer: &Arc<dyn Synthesizer>,
    opts: &SchedulerOptions,
    artifacts: &mut Vec<TurnAudioArtifact>,
) -> Result<BatchStats> {
    let artifact = |req: &TurnSynthesisRequest, frames: u64| TurnAudioArtifact {
        id: req.id,
        speaker: req.speaker,
        channel: req.channel,
        chapter: req.chapter.clone(),
        wav: turn_file_name(req.id, width),
        frames,
    };

    let mut stats = BatchStats {
        size: batch.len(),
        fresh: 0,
        resumed: 0,
        cooled_down: false,
    };
    let mut set = JoinSet::new();
    let mut task_turns = HashMap::new();
    let mut by_id = HashMap::new();

    for req in batch {
        let path = out_dir.join(turn_file_name(req.id, width));
        if path.exists() {
            let frames = audio::wav_frames(&path)?;
            debug!("Turn {} resumed from {} ({} frames)", req.id, path.display(), frames);
            artifacts.push(artifact(req, frames));
            stats.resumed += 1;
            continue;
        }

        let call = SynthesisCall {
            id: req.id,
            prompt: req.prompt.clone(),
            voices: opts.voices.clone(),
            temperature: opts.temperature,
            timeout: opts.request_timeout,
        };
        let synthesizer = Arc::clone(synthesizer);
        let id = req.id;
        let request_timeout = opts.request_timeout;
        let handle = set.spawn(async move {
            let outcome: Result<u64> = async {
                // bounded here too, whatever the collaborator does with `call.timeout`
                let payload = timeout(request_timeout, synthesizer.synthesize(&call))
                    .await
                    .map_err(|_| PipelineError::RequestTimeout {
                        id,
                        timeout_seconds: request_timeout.as_secs_f64(),
                    })?
                    .map_err(|e| PipelineError::Synthesis {
                        id,
                        message: format!("{e:#}"),
                    })?;
                let samples = audio::extract_pcm(id, &payload)?;
                audio::write_wav(&path, &samples)
            }
            .await;
            (id, outcome)
        });
        task_turns.insert(handle.id(), id);
        by_id.insert(id, req);
    }

    let mut pending: BTreeSet<u32> = by_id.keys().copied().collect();
    let deadline = Instant::now() + opts.batch_wait;
    let mut first_error = None;

    loop {
        let joined = match timeout_at(deadline, set.join_next_with_id()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => break,
            Err(_) => {
                set.abort_all();
                let pending: Vec<u32> = pending.into_iter().collect();
                error!("Batch wait timed out; pending turn ids: {:?}", pending);
                return Err(PipelineError::BatchTimeout {
                    wait_seconds: opts.batch_wait.as_secs_f64(),
                    pending,
                });
            }
        };

        let (id, outcome) = match joined {
            Ok((_, (id, outcome))) => (id, outcome),
            Err(e) => {
                let id = task_turns.get(&e.id()).copied().unwrap_or_default();
                (
                    id,
                    Err(PipelineError::Synthesis {
                        id,
                        message: e.to_string(),
                    }),
                )
            }
        };
        pending.remove(&id);

        match outcome {
            Ok(frames) => {
                info!("Turn {} synthesized ({} frames)", id, frames);
                artifacts.push(artifact(by_id[&id], frames));
                stats.fresh += 1;
            }
            Err(e) => {
                error!("Turn {} failed: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{SAMPLE_RATE_HZ, wav_bytes, wav_spec, write_wav};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns `frames_per_call` frames of raw PCM and records every call.
    struct MockTts {
        frames_per_call: usize,
        delay: Duration,
        calls: Mutex<Vec<u32>>,
        hang_on: Option<u32>,
        /// Blocks the worker thread, so the call cannot be cancelled at an await.
        block_on: Option<(u32, Duration)>,
        fail_on: Option<u32>,
        as_container: bool,
    }

    impl MockTts {
        fn new(frames_per_call: usize) -> Self {
            Self {
                frames_per_call,
                delay: Duration::from_millis(10),
                calls: Mutex::new(Vec::new()),
                hang_on: None,
                block_on: None,
                fail_on: None,
                as_container: false,
            }
        }

        fn calls(&self) -> Vec<u32> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl Synthesizer for MockTts {
        async fn synthesize(&self, call: &SynthesisCall) -> anyhow::Result<Vec<u8>> {
            self.calls.lock().unwrap().push(call.id);
            if self.hang_on == Some(call.id) {
                std::future::pending::<()>().await;
            }
            if let Some((id, pause)) = self.block_on {
                if id == call.id {
                    std::thread::sleep(pause);
                }
            }
            sleep(self.delay).await;
            if self.fail_on == Some(call.id) {
                anyhow::bail!("quota exceeded");
            }
            let samples = vec![100i16; self.frames_per_call];
            if self.as_container {
                Ok(wav_bytes(wav_spec(), &samples))
            } else {
                Ok(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
            }
        }
    }

    fn requests(n: u32) -> Vec<TurnSynthesisRequest> {
        (0..n)
            .map(|id| TurnSynthesisRequest {
                id,
                speaker: if id % 2 == 0 { Speaker::Host } else { Speaker::Analyst },
                channel: if id % 2 == 0 { Channel::Speaker1 } else { Channel::Speaker2 },
                chapter: "opening".to_string(),
                prompt: format!("prompt {id}"),
            })
            .collect()
    }

    fn opts(max_parallel: usize) -> SchedulerOptions {
        let mut opts = SchedulerOptions::from_config(&PipelineConfig::default());
        opts.max_parallel = max_parallel;
        opts.cooldown = Duration::from_secs(20);
        opts
    }

    #[test]
    fn test_file_names_sort_by_id() {
        assert_eq!(id_width(&requests(3)), 2);
        assert_eq!(turn_file_name(7, 2), "07.wav");
        let mut many = requests(1);
        many[0].id = 1234;
        assert_eq!(id_width(&many), 4);
        assert_eq!(turn_file_name(7, 4), "0007.wav");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(MockTts::new(240));
        let started = Instant::now();

        let report = synthesize_all(&requests(5), dir.path(), tts.clone(), &opts(2))
            .await
            .unwrap();

        let sizes: Vec<usize> = report.batches.iter().map(|b| b.size).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let cooled: Vec<bool> = report.batches.iter().map(|b| b.cooled_down).collect();
        assert_eq!(cooled, vec![true, true, false]);
        assert!(started.elapsed() >= Duration::from_secs(40));
        assert_eq!(tts.calls(), vec![0, 1, 2, 3, 4]);

        let ids: Vec<u32> = report.artifacts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(report.artifacts.iter().all(|a| a.frames == 240));
        assert_eq!(report.artifacts[3].wav, "03.wav");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_batches_skip_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        for id in 0..4 {
            write_wav(&dir.path().join(turn_file_name(id, 2)), &vec![0i16; 480]).unwrap();
        }
        let tts = Arc::new(MockTts::new(240));

        let report = synthesize_all(&requests(5), dir.path(), tts.clone(), &opts(2))
            .await
            .unwrap();

        assert_eq!(tts.calls(), vec![4]);
        assert!(report.batches.iter().all(|b| !b.cooled_down));
        assert_eq!(report.batches[0].resumed, 2);
        assert_eq!(report.batches[2].fresh, 1);
        assert_eq!(report.fresh_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cooldown_when_rest_already_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        for id in 2..5 {
            write_wav(&dir.path().join(turn_file_name(id, 2)), &vec![0i16; 24]).unwrap();
        }
        let tts = Arc::new(MockTts::new(24));

        let report = synthesize_all(&requests(5), dir.path(), tts.clone(), &opts(2))
            .await
            .unwrap();

        assert_eq!(report.batches[0].fresh, 2);
        assert!(!report.batches[0].cooled_down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_file_is_never_resent() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("01.wav");
        write_wav(&existing, &vec![5i16; SAMPLE_RATE_HZ as usize / 2]).unwrap();
        let tts = Arc::new(MockTts::new(240));

        let report = synthesize_all(&requests(3), dir.path(), tts.clone(), &opts(4))
            .await
            .unwrap();

        assert_eq!(tts.calls(), vec![0, 2]);
        assert_eq!(report.artifacts[1].frames, audio::wav_frames(&existing).unwrap());
        assert_eq!(report.artifacts[1].frames, 12_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_payload_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockTts::new(96);
        mock.as_container = true;

        let report = synthesize_all(&requests(2), dir.path(), Arc::new(mock), &opts(2))
            .await
            .unwrap();
        assert!(report.artifacts.iter().all(|a| a.frames == 96));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_enforced_by_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockTts::new(24);
        mock.hang_on = Some(2);
        let started = Instant::now();

        let err = synthesize_all(&requests(4), dir.path(), Arc::new(mock), &opts(4))
            .await
            .unwrap_err();

        match err {
            PipelineError::RequestTimeout { id, timeout_seconds } => {
                assert_eq!(id, 2);
                assert_eq!(timeout_seconds, 120.0);
            }
            other => panic!("unexpected error: {other}"),
        }
        // gave up at the request timeout, well before the 150s batch wait
        assert!(started.elapsed() < Duration::from_secs(150));
        for id in [0, 1, 3] {
            assert!(dir.path().join(turn_file_name(id, 2)).exists());
        }
        assert!(!dir.path().join("02.wav").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_timeout_reports_pending_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockTts::new(24);
        mock.block_on = Some((2, Duration::from_millis(1500)));
        let mut opts = opts(4);
        opts.request_timeout = Duration::from_millis(200);
        opts.batch_wait = Duration::from_millis(300);

        let err = synthesize_all(&requests(4), dir.path(), Arc::new(mock), &opts)
            .await
            .unwrap_err();

        match err {
            PipelineError::BatchTimeout { pending, .. } => assert_eq!(pending, vec![2]),
            other => panic!("unexpected error: {other}"),
        }
        // completed turns stay on disk for the next run
        for id in [0, 1, 3] {
            assert!(dir.path().join(turn_file_name(id, 2)).exists());
        }
        assert!(!dir.path().join("02.wav").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collaborator_error_aborts_after_batch_drains() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockTts::new(24);
        mock.fail_on = Some(1);
        let tts = Arc::new(mock);

        let err = synthesize_all(&requests(5), dir.path(), tts.clone(), &opts(3))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Synthesis { id: 1, .. }));
        assert!(dir.path().join("00.wav").exists());
        assert!(dir.path().join("02.wav").exists());
        // the next batch never started
        assert_eq!(tts.calls(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let tts = Arc::new(MockTts::new(24));

        let mut bad = opts(2);
        bad.request_timeout = Duration::ZERO;
        assert!(synthesize_all(&requests(2), dir.path(), tts.clone(), &bad).await.is_err());

        let mut bad = opts(2);
        bad.voices.insert(Channel::Speaker2, String::new());
        let err = synthesize_all(&requests(2), dir.path(), tts.clone(), &bad)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(tts.calls().is_empty());
    }

    #[test]
    fn test_legacy_layout_migration() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join(LEGACY_TURNS_DIR);
        fs::create_dir_all(&legacy).unwrap();
        write_wav(&legacy.join("00.wav"), &[1, 2]).unwrap();
        write_wav(&legacy.join("01.wav"), &[3, 4]).unwrap();

        assert_eq!(migrate_legacy_layout(dir.path()), 2);
        assert!(dir.path().join("00.wav").exists());
        assert!(dir.path().join("01.wav").exists());
        assert!(!legacy.exists());
        // idempotent
        assert_eq!(migrate_legacy_layout(dir.path()), 0);
    }

    #[test]
    fn test_legacy_migration_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join(LEGACY_TURNS_DIR);
        fs::create_dir_all(&legacy).unwrap();
        write_wav(&legacy.join("00.wav"), &[1, 2, 3]).unwrap();
        write_wav(&dir.path().join("00.wav"), &[9]).unwrap();

        assert_eq!(migrate_legacy_layout(dir.path()), 0);
        assert_eq!(audio::wav_frames(&dir.path().join("00.wav")).unwrap(), 1);
        // not empty, so left behind
        assert!(legacy.join("00.wav").exists());
    }
}
