use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Map, Value};

use switchyard_types::{
    HandoffEnvelope, RunEvent, RunId, RunSpec, RunState, RunStatus, RunSummary, SdlcStatus,
};

use crate::atomic::{atomic_write_json, load_json_safe};
use crate::error::{Error, Result};
use crate::journal::{self, NavigatorEventSummary};
use crate::paths::{RunPaths, META_FILE};

/// Field patch applied to `meta.json` by [`Store::update_summary`].
/// Keys absent from the current serialized form are ignored.
pub type SummaryPatch = Map<String, Value>;

/// Field patch applied to `run_state.json` by [`Store::update_run_state`]
/// and [`Store::commit_step_completion`].
pub type RunStatePatch = Map<String, Value>;

/// Thread-safe persistence handle for run metadata, state, envelopes, and
/// the event journal.
///
/// One store instance serves many runs. Writers to a given run's mutable
/// artifacts serialize on that run's mutex; the sequence counter has its
/// own mutex and is seeded from disk on first access, so a recovered run
/// continues from `max(seq) + 1` no matter which operation touches it
/// first.
pub struct Store {
    runs_dir: PathBuf,
    locks: Mutex<HashMap<RunId, Arc<Mutex<()>>>>,
    sequences: Mutex<HashMap<RunId, u64>>,
}

impl Store {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
            locks: Mutex::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn paths(&self, run_id: &str) -> RunPaths {
        RunPaths::new(&self.runs_dir, run_id)
    }

    /// Get or lazily create the mutex for a run.
    fn run_lock(&self, run_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("run lock registry poisoned");
        locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Next monotonic sequence number for a run.
    ///
    /// Seeding from disk happens here, under the sequence mutex, on the
    /// first access for a run, not as a side effect of directory creation.
    /// A concurrent writer therefore can never observe an unseeded counter.
    fn next_seq(&self, run_id: &str) -> u64 {
        let mut sequences = self.sequences.lock().expect("sequence registry poisoned");
        let entry = sequences.entry(run_id.to_string()).or_insert_with(|| {
            let seeded = self.max_seq_on_disk(run_id);
            if seeded > 0 {
                log::debug!("Recovered sequence counter for run '{run_id}': max_seq={seeded}");
            }
            seeded
        });
        *entry += 1;
        *entry
    }

    fn max_seq_on_disk(&self, run_id: &str) -> u64 {
        let events_path = self.paths(run_id).events();
        let Ok(file) = fs::File::open(&events_path) else {
            return 0;
        };
        let mut max_seq = 0u64;
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(&line) {
                if let Some(seq) = value.get("seq").and_then(Value::as_u64) {
                    max_seq = max_seq.max(seq);
                }
            }
        }
        max_seq
    }

    // -----------------------------------------------------------------------
    // Run directory
    // -----------------------------------------------------------------------

    /// Create the run directory and warm the sequence counter.
    pub fn create_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let run_dir = self.paths(run_id).run_dir().to_path_buf();
        fs::create_dir_all(&run_dir)?;
        // Warm the counter; the authoritative seeding lives in next_seq.
        let mut sequences = self.sequences.lock().expect("sequence registry poisoned");
        sequences
            .entry(run_id.to_string())
            .or_insert_with(|| self.max_seq_on_disk(run_id));
        Ok(run_dir)
    }

    /// A run exists once its meta.json does.
    pub fn run_exists(&self, run_id: &str) -> bool {
        self.paths(run_id).meta().exists()
    }

    /// List run ids that have a meta.json, sorted (the id embeds the start
    /// timestamp, so this is chronological).
    pub fn list_runs(&self) -> Vec<RunId> {
        let Ok(entries) = fs::read_dir(&self.runs_dir) else {
            return Vec::new();
        };
        let mut run_ids: Vec<RunId> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir() && e.path().join(META_FILE).exists())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        run_ids.sort();
        run_ids
    }

    // -----------------------------------------------------------------------
    // RunSpec
    // -----------------------------------------------------------------------

    pub fn write_spec(&self, run_id: &str, spec: &RunSpec) -> Result<PathBuf> {
        self.create_run_dir(run_id)?;
        let path = self.paths(run_id).spec();
        atomic_write_json(&path, spec)?;
        Ok(path)
    }

    pub fn read_spec(&self, run_id: &str) -> Option<RunSpec> {
        load_json_safe(&self.paths(run_id).spec(), run_id, "spec")
    }

    // -----------------------------------------------------------------------
    // RunSummary
    // -----------------------------------------------------------------------

    pub fn write_summary(&self, run_id: &str, summary: &RunSummary) -> Result<PathBuf> {
        self.create_run_dir(run_id)?;
        let path = self.paths(run_id).meta();
        atomic_write_json(&path, summary)?;
        Ok(path)
    }

    pub fn read_summary(&self, run_id: &str) -> Option<RunSummary> {
        load_json_safe(&self.paths(run_id).meta(), run_id, "summary")
    }

    /// Partial update of summary fields under the per-run lock.
    ///
    /// The patch is applied to the serialized form; keys that do not exist
    /// in the current document are ignored.
    pub fn update_summary(&self, run_id: &str, patch: &SummaryPatch) -> Result<RunSummary> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().expect("run lock poisoned");

        let summary = self
            .read_summary(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;

        let mut data = serde_json::to_value(&summary)?;
        merge_existing_fields(&mut data, patch);

        let updated: RunSummary = serde_json::from_value(data)?;
        self.write_summary(run_id, &updated)?;
        Ok(updated)
    }

    /// Canonical success finalization: status, completion timestamps, and
    /// the `run_completed` event in one place so backends never duplicate
    /// the bookkeeping.
    pub fn finalize_run_success(&self, run_id: &str, sdlc_status: SdlcStatus) -> Result<RunSummary> {
        let now = Utc::now();
        let mut patch = SummaryPatch::new();
        patch.insert("status".into(), Value::String(RunStatus::Succeeded.as_str().into()));
        patch.insert("sdlc_status".into(), Value::String(sdlc_status.as_str().into()));
        patch.insert("completed_at".into(), serde_json::to_value(now)?);
        patch.insert("updated_at".into(), serde_json::to_value(now)?);
        let updated = self.update_summary(run_id, &patch)?;

        let event = RunEvent::new(run_id, "run_completed", "")
            .payload_entry("status", Value::String(RunStatus::Succeeded.as_str().into()))
            .payload_entry("sdlc_status", Value::String(sdlc_status.as_str().into()));
        self.append_event(run_id, event);

        log::debug!(
            "Finalized run {} as succeeded (sdlc_status={})",
            run_id,
            sdlc_status.as_str()
        );
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Event journal (JSONL)
    // -----------------------------------------------------------------------

    /// Append an event to `events.jsonl`.
    ///
    /// Assigns the monotonic sequence number under the per-run lock before
    /// serializing. Journaling is non-critical: serialization and IO
    /// failures are logged and swallowed so a full disk never crashes a
    /// run mid-step.
    pub fn append_event(&self, run_id: &str, mut event: RunEvent) {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().expect("run lock poisoned");

        if let Err(err) = self.create_run_dir(run_id) {
            log::warn!("Failed to create run dir for '{run_id}': {err}");
            return;
        }
        let events_path = self.paths(run_id).events();

        event.seq = self.next_seq(run_id);

        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                log::warn!("Failed to serialize event for run '{run_id}': {err}");
                return;
            }
        };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .and_then(|mut file| {
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
                file.flush()
            });

        if let Err(err) = result {
            log::warn!(
                "Failed to append event for run '{}' at {}: {}",
                run_id,
                events_path.display(),
                err
            );
        }
    }

    /// Read all parseable events in journal order.
    ///
    /// Streams line by line; malformed lines (including a torn tail from a
    /// crash mid-append) are skipped silently. Never raises.
    pub fn read_events(&self, run_id: &str) -> Vec<RunEvent> {
        let events_path = self.paths(run_id).events();
        let Ok(file) = fs::File::open(&events_path) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RunEvent>(line) {
                Ok(event) => events.push(event),
                Err(_) => continue,
            }
        }
        events
    }

    /// Filter the journal to navigator-relevant kinds.
    pub fn query_navigator_events(&self, run_id: &str, kinds: Option<&[&str]>) -> Vec<RunEvent> {
        journal::filter_navigator_events(&self.read_events(run_id), kinds)
    }

    /// Aggregate navigator events into the Wisdom-facing summary record.
    pub fn summarize_navigator_events(&self, run_id: &str) -> NavigatorEventSummary {
        journal::summarize_navigator_events(&self.read_events(run_id))
    }

    // -----------------------------------------------------------------------
    // RunState
    // -----------------------------------------------------------------------

    pub fn write_run_state(&self, run_id: &str, state: &RunState) -> Result<PathBuf> {
        self.create_run_dir(run_id)?;
        let path = self.paths(run_id).run_state();
        atomic_write_json(&path, state)?;
        Ok(path)
    }

    /// Read the run state, reconstructing `handoff_envelopes` from the
    /// on-disk envelope files when the in-state map is empty.
    ///
    /// This covers the crash window between envelope write and state
    /// update: the envelope files are the durable source of truth.
    pub fn read_run_state(&self, run_id: &str) -> Option<RunState> {
        let mut state: RunState =
            load_json_safe(&self.paths(run_id).run_state(), run_id, "run_state")?;

        if state.handoff_envelopes.is_empty() && !state.flow_key.is_empty() {
            let disk_envelopes = self.list_envelopes(run_id, &state.flow_key);
            if !disk_envelopes.is_empty() {
                log::info!(
                    "Recovered {} envelope(s) from disk for run '{}' flow '{}'",
                    disk_envelopes.len(),
                    run_id,
                    state.flow_key
                );
                state.handoff_envelopes.extend(disk_envelopes);
            }
        }

        Some(state)
    }

    /// Partial update of run-state fields under the per-run lock.
    pub fn update_run_state(&self, run_id: &str, patch: &RunStatePatch) -> Result<RunState> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().expect("run lock poisoned");
        self.update_run_state_locked(run_id, patch)
    }

    fn update_run_state_locked(&self, run_id: &str, patch: &RunStatePatch) -> Result<RunState> {
        let state = self
            .read_run_state(run_id)
            .ok_or_else(|| Error::StateMissing(run_id.to_string()))?;

        let mut data = serde_json::to_value(&state)?;
        merge_existing_fields(&mut data, patch);
        if let Value::Object(map) = &mut data {
            map.insert("timestamp".into(), serde_json::to_value(Utc::now())?);
        }

        let updated: RunState = serde_json::from_value(data)?;
        self.write_run_state(run_id, &updated)?;
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // HandoffEnvelope
    // -----------------------------------------------------------------------

    /// Write an envelope to `<flow>/handoff/<step_id>.json` atomically.
    /// Envelope files are immutable once written; callers never rewrite
    /// them in place.
    pub fn write_envelope(
        &self,
        run_id: &str,
        flow_key: &str,
        envelope: &HandoffEnvelope,
    ) -> Result<PathBuf> {
        let path = self.paths(run_id).envelope(flow_key, &envelope.step_id);
        atomic_write_json(&path, envelope)?;
        Ok(path)
    }

    pub fn read_envelope(
        &self,
        run_id: &str,
        flow_key: &str,
        step_id: &str,
    ) -> Option<HandoffEnvelope> {
        load_json_safe(
            &self.paths(run_id).envelope(flow_key, step_id),
            run_id,
            "envelope",
        )
    }

    /// Read every envelope for a flow, keyed by step id.
    pub fn list_envelopes(
        &self,
        run_id: &str,
        flow_key: &str,
    ) -> std::collections::BTreeMap<String, HandoffEnvelope> {
        let handoff_dir = self.paths(run_id).handoff_dir(flow_key);
        let mut envelopes = std::collections::BTreeMap::new();

        if !handoff_dir.exists() {
            return envelopes;
        }

        for entry in walkdir::WalkDir::new(&handoff_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(step_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(envelope) = self.read_envelope(run_id, flow_key, step_id) {
                envelopes.insert(step_id.to_string(), envelope);
            }
        }

        envelopes
    }

    // -----------------------------------------------------------------------
    // Atomic step-commit protocol
    // -----------------------------------------------------------------------

    /// Atomic commit of a completed step: envelope first, then the state
    /// update that references it.
    ///
    /// Order matters for recovery: if the process dies after (1) but before
    /// (2), `read_run_state` reconstructs the envelope map from disk. The
    /// caller patch typically advances `step_index`, `current_step_id`, and
    /// `status`.
    pub fn commit_step_completion(
        &self,
        run_id: &str,
        flow_key: &str,
        envelope: &HandoffEnvelope,
        patch: &RunStatePatch,
    ) -> Result<RunState> {
        let lock = self.run_lock(run_id);
        let _guard = lock.lock().expect("run lock poisoned");

        // (1) durable envelope artifact
        self.write_envelope(run_id, flow_key, envelope)?;

        // (2) state merge + caller patch + timestamp bump, atomically written
        let state = self
            .read_run_state(run_id)
            .ok_or_else(|| Error::StateMissing(run_id.to_string()))?;

        let mut data = serde_json::to_value(&state)?;
        if let Value::Object(map) = &mut data {
            let envelopes = map
                .entry("handoff_envelopes")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(envelopes) = envelopes {
                envelopes.insert(envelope.step_id.clone(), serde_json::to_value(envelope)?);
            }
        }
        merge_existing_fields(&mut data, patch);
        if let Value::Object(map) = &mut data {
            map.insert("timestamp".into(), serde_json::to_value(Utc::now())?);
        }

        let updated: RunState = serde_json::from_value(data)?;
        self.write_run_state(run_id, &updated)?;
        Ok(updated)
    }
}

/// Apply `patch` onto the serialized document, touching only keys that
/// already exist there. Mirrors the read-modify-write discipline of the
/// summary/state update operations.
fn merge_existing_fields(data: &mut Value, patch: &Map<String, Value>) {
    let Value::Object(map) = data else { return };
    for (key, value) in patch {
        if map.contains_key(key) {
            map.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::{generate_run_id, RoutingSignal};
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("runs"));
        (dir, store)
    }

    fn seeded_run(store: &Store) -> RunId {
        let run_id = generate_run_id();
        let spec = RunSpec::new(vec!["signal".into()]);
        store.write_spec(&run_id, &spec).unwrap();
        store
            .write_summary(&run_id, &RunSummary::new(run_id.clone(), spec))
            .unwrap();
        store
            .write_run_state(&run_id, &RunState::new(run_id.clone(), "signal"))
            .unwrap();
        run_id
    }

    #[test]
    fn test_spec_write_once_read_back() {
        let (_dir, store) = store();
        let run_id = generate_run_id();
        let mut spec = RunSpec::new(vec!["signal".into(), "build".into()]);
        spec.no_human_mid_flow = true;

        store.write_spec(&run_id, &spec).unwrap();
        assert_eq!(store.read_spec(&run_id), Some(spec));
    }

    #[test]
    fn test_seq_assignment_is_monotonic() {
        let (_dir, store) = store();
        let run_id = seeded_run(&store);

        for i in 0..5 {
            store.append_event(&run_id, RunEvent::new(&run_id, format!("k{i}"), "signal"));
        }

        let events = store.read_events(&run_id);
        assert_eq!(events.len(), 5);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_seq_recovers_from_disk_after_restart() {
        let (dir, store) = store();
        let run_id = seeded_run(&store);
        store.append_event(&run_id, RunEvent::new(&run_id, "run_started", "signal"));
        store.append_event(&run_id, RunEvent::new(&run_id, "step_completed", "signal"));

        // Fresh store = fresh process; counters are gone from memory.
        let recovered = Store::new(dir.path().join("runs"));
        recovered.append_event(&run_id, RunEvent::new(&run_id, "run_resumed", "signal"));

        let events = recovered.read_events(&run_id);
        assert_eq!(events.len(), 3);
        assert_eq!(events.last().unwrap().seq, 3);
    }

    #[test]
    fn test_read_events_skips_corrupt_tail() {
        let (_dir, store) = store();
        let run_id = seeded_run(&store);
        store.append_event(&run_id, RunEvent::new(&run_id, "run_started", "signal"));

        // Simulate a crash mid-append.
        let events_path = store.paths(&run_id).events();
        let mut file = OpenOptions::new().append(true).open(&events_path).unwrap();
        file.write_all(b"{\"run_id\": \"trunc").unwrap();

        let events = store.read_events(&run_id);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "run_started");
    }

    #[test]
    fn test_read_events_empty_file() {
        let (_dir, store) = store();
        let run_id = seeded_run(&store);
        fs::write(store.paths(&run_id).events(), "").unwrap();
        assert!(store.read_events(&run_id).is_empty());
    }

    #[test]
    fn test_update_summary_ignores_unknown_keys() {
        let (_dir, store) = store();
        let run_id = seeded_run(&store);

        let mut patch = SummaryPatch::new();
        patch.insert("status".into(), Value::String("running".into()));
        patch.insert("not_a_field".into(), Value::Bool(true));

        let updated = store.update_summary(&run_id, &patch).unwrap();
        assert_eq!(updated.status, RunStatus::Running);
    }

    #[test]
    fn test_update_summary_missing_run_errors() {
        let (_dir, store) = store();
        let patch = SummaryPatch::new();
        let err = store.update_summary("run-absent", &patch).unwrap_err();
        assert!(matches!(err, Error::RunNotFound(_)));
    }

    #[test]
    fn test_commit_step_completion_round_trip() {
        let (_dir, store) = store();
        let run_id = seeded_run(&store);

        let envelope = HandoffEnvelope::new(
            "normalize_signal",
            "signal",
            run_id.clone(),
            RoutingSignal::advance(Some("author_reqs".into()), "linear"),
            "Signal normalized.",
        );
        let mut patch = RunStatePatch::new();
        patch.insert("step_index".into(), Value::from(1));
        patch.insert("current_step_id".into(), Value::String("author_reqs".into()));
        patch.insert("status".into(), Value::String("running".into()));

        let state = store
            .commit_step_completion(&run_id, "signal", &envelope, &patch)
            .unwrap();

        assert_eq!(state.step_index, 1);
        assert_eq!(state.current_step_id.as_deref(), Some("author_reqs"));
        assert_eq!(
            store.read_envelope(&run_id, "signal", "normalize_signal"),
            Some(envelope.clone())
        );
        assert_eq!(
            store.read_run_state(&run_id).unwrap().handoff_envelopes["normalize_signal"],
            envelope
        );
    }

    #[test]
    fn test_commit_without_state_is_fatal() {
        let (_dir, store) = store();
        let run_id = generate_run_id();
        store.create_run_dir(&run_id).unwrap();

        let envelope = HandoffEnvelope::new(
            "s",
            "signal",
            run_id.clone(),
            RoutingSignal::default(),
            "x",
        );
        let err = store
            .commit_step_completion(&run_id, "signal", &envelope, &RunStatePatch::new())
            .unwrap_err();
        assert!(matches!(err, Error::StateMissing(_)));
    }

    #[test]
    fn test_run_state_rehydrates_envelopes_from_disk() {
        let (_dir, store) = store();
        let run_id = seeded_run(&store);

        // Envelope written, but the process "died" before the state update.
        let envelope = HandoffEnvelope::new(
            "normalize_signal",
            "signal",
            run_id.clone(),
            RoutingSignal::default(),
            "done",
        );
        store.write_envelope(&run_id, "signal", &envelope).unwrap();

        let state = store.read_run_state(&run_id).unwrap();
        assert_eq!(state.handoff_envelopes.len(), 1);
        assert_eq!(state.handoff_envelopes["normalize_signal"], envelope);
    }

    #[test]
    fn test_finalize_run_success_emits_event() {
        let (_dir, store) = store();
        let run_id = seeded_run(&store);

        let summary = store.finalize_run_success(&run_id, SdlcStatus::Ok).unwrap();
        assert_eq!(summary.status, RunStatus::Succeeded);
        assert!(summary.completed_at.is_some());

        let events = store.read_events(&run_id);
        assert!(events.iter().any(|e| e.kind == "run_completed"));
    }

    #[test]
    fn test_list_runs_requires_meta() {
        let (_dir, store) = store();
        let run_id = seeded_run(&store);
        // A bare directory without meta.json is not a run.
        store.create_run_dir("run-20250101-000000-zzzzzz").unwrap();

        assert_eq!(store.list_runs(), vec![run_id]);
    }
}
