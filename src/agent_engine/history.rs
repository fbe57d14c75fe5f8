use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::agent_engine::action::Action;
use crate::agent_engine::task::TaskResult;
use crate::errors::PilotResult;
use crate::executor::safety::Verdict;
use crate::perception::types::ObservationRef;

/// Result of handing an action to the actuator. There is no pending state:
/// a record is only appended once its outcome is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded { detail: String },
    Failed { reason: String },
    /// Not executed (denied by the permission gate).
    Skipped,
    /// Cancellation arrived while the action was in flight; side effects may
    /// or may not have happened.
    Interrupted,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }

    /// Whether the actuator ran the action to an outcome. Only these count
    /// toward `TaskResult::steps_taken`.
    pub fn was_executed(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. } | StepOutcome::Failed { .. })
    }
}

/// One loop iteration as it will be audited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub seq: u64,
    pub observation_seq: u64,
    pub action: Action,
    pub verdict: Verdict,
    pub outcome: StepOutcome,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// A step before the log numbers and timestamps it.
#[derive(Debug, Clone)]
pub struct StepDraft {
    pub observation_seq: u64,
    pub action: Action,
    pub verdict: Verdict,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    len: usize,
    sealed: bool,
}

#[derive(Default)]
struct Inner {
    records: Vec<StepRecord>,
    observations: Vec<ObservationRef>,
    next_seq: u64,
    sealed: bool,
}

/// Append-only step log for one task.
///
/// Appends happen under a synchronous lock with no await inside, so a task
/// being cancelled can never leave a half-written record behind.
pub struct HistoryLog {
    inner: Mutex<Inner>,
    progress: watch::Sender<Progress>,
    journal: Option<PathBuf>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::with_journal(None)
    }

    /// `journal` is a JSONL file that receives every record and the final
    /// result. Write failures are logged and otherwise ignored.
    pub fn with_journal(journal: Option<PathBuf>) -> Self {
        let (progress, _) = watch::channel(Progress { len: 0, sealed: false });
        Self {
            inner: Mutex::new(Inner { next_seq: 1, ..Default::default() }),
            progress,
            journal,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Numbers and stores a step. Sequence numbers start at 1, are gapless
    /// and never reused.
    pub fn append(&self, draft: StepDraft) -> StepRecord {
        let record = {
            let mut inner = self.lock();
            let record = StepRecord {
                seq: inner.next_seq,
                observation_seq: draft.observation_seq,
                action: draft.action,
                verdict: draft.verdict,
                outcome: draft.outcome,
                recorded_at: chrono::Utc::now(),
            };
            inner.next_seq += 1;
            inner.records.push(record.clone());
            let progress = Progress { len: inner.records.len(), sealed: inner.sealed };
            self.progress.send_replace(progress);
            record
        };
        tracing::debug!(seq = record.seq, kind = %record.action.kind.name(), "step appended");
        self.journal_line(&JournalLine::Step(&record));
        record
    }

    pub fn note_observation(&self, observation: ObservationRef) {
        self.lock().observations.push(observation);
    }

    pub fn last_observation(&self) -> Option<ObservationRef> {
        self.lock().observations.last().cloned()
    }

    pub fn observations(&self) -> Vec<ObservationRef> {
        self.lock().observations.clone()
    }

    /// Full ordered copy of the records appended so far.
    pub fn snapshot(&self) -> Vec<StepRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    fn get(&self, index: usize) -> Option<StepRecord> {
        self.lock().records.get(index).cloned()
    }

    /// Marks the log terminal and writes the result to the journal. Open
    /// streams drain what is left and then end.
    pub fn seal(&self, result: &TaskResult) {
        {
            let mut inner = self.lock();
            if inner.sealed {
                return;
            }
            inner.sealed = true;
            let progress = Progress { len: inner.records.len(), sealed: true };
            self.progress.send_replace(progress);
        }
        self.journal_line(&JournalLine::Result(result));
    }

    /// Lazily yields every record in append order, waiting for new ones
    /// until the log is sealed.
    pub fn stream(self: &Arc<Self>) -> impl Stream<Item = StepRecord> + Send + 'static {
        let rx = self.progress.subscribe();
        stream::unfold((Arc::clone(self), rx, 0usize), |(log, mut rx, index)| async move {
            loop {
                if let Some(record) = log.get(index) {
                    return Some((record, (log, rx, index + 1)));
                }
                let progress = *rx.borrow_and_update();
                if progress.len > index {
                    continue;
                }
                if progress.sealed {
                    return None;
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        })
    }

    fn journal_line(&self, line: &JournalLine<'_>) {
        let Some(path) = &self.journal else {
            return;
        };
        if let Err(e) = append_json_line(path, line) {
            tracing::warn!(path = %path.display(), error = %e, "history journal write failed");
        }
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum JournalLine<'a> {
    Step(&'a StepRecord),
    Result(&'a TaskResult),
}

fn append_json_line(path: &Path, line: &JournalLine<'_>) -> PilotResult<()> {
    let json = serde_json::to_string(line)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

/// Returns the configured journal directory, or
/// `<data_local_dir>/deskpilot/tasks`, falling back to the working directory.
pub fn journal_dir(configured: Option<&Path>) -> PathBuf {
    let dir = match configured {
        Some(dir) => dir.to_path_buf(),
        None => match dirs::data_local_dir() {
            Some(base) => base.join("deskpilot").join("tasks"),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        },
    };
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(path = %dir.display(), error = %e, "cannot create journal directory");
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::action::ActionKind;
    use crate::agent_engine::task::{TaskOutcome, TaskPhase};
    use futures_util::StreamExt;
    use uuid::Uuid;

    fn draft(n: i32) -> StepDraft {
        StepDraft {
            observation_seq: 1,
            action: Action::new(ActionKind::PointerMove { x: n, y: n }),
            verdict: Verdict::Authorized,
            outcome: StepOutcome::Succeeded { detail: format!("moved {n}") },
        }
    }

    fn done_result() -> TaskResult {
        TaskResult {
            task_id: Uuid::new_v4(),
            goal: "goal".into(),
            final_phase: TaskPhase::Completed,
            steps_taken: 0,
            outcome: TaskOutcome::Completed { summary: "ok".into() },
            last_observation: None,
            finished_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn sequence_numbers_are_gapless_from_one() {
        let log = HistoryLog::new();
        let seqs: Vec<u64> = (0..20).map(|n| log.append(draft(n)).seq).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());
        let snap = log.snapshot();
        assert!(snap.windows(2).all(|w| w[1].seq == w[0].seq + 1));
    }

    #[tokio::test]
    async fn stream_yields_live_appends_and_ends_when_sealed() {
        let log = Arc::new(HistoryLog::new());
        log.append(draft(1));
        let mut stream = Box::pin(log.stream());
        assert_eq!(stream.next().await.unwrap().seq, 1);

        let writer = Arc::clone(&log);
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            writer.append(draft(2));
            writer.append(draft(3));
            writer.seal(&done_result());
        });

        let rest: Vec<u64> = stream.map(|r| r.seq).collect().await;
        handle.await.unwrap();
        assert_eq!(rest, vec![2, 3]);
    }

    #[tokio::test]
    async fn stream_on_sealed_log_replays_everything() {
        let log = Arc::new(HistoryLog::new());
        log.append(draft(1));
        log.append(draft(2));
        log.seal(&done_result());
        let all: Vec<StepRecord> = log.stream().collect().await;
        assert_eq!(all.len(), 2);
        assert!(log.is_sealed());
    }

    #[test]
    fn journal_receives_steps_and_result() {
        let path = std::env::temp_dir().join(format!("deskpilot_journal_{}.jsonl", Uuid::new_v4()));
        let log = HistoryLog::with_journal(Some(path.clone()));
        log.append(draft(7));
        log.seal(&done_result());
        log.seal(&done_result());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["entry"], "step");
        assert_eq!(lines[0]["seq"], 1);
        assert_eq!(lines[1]["entry"], "result");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unwritable_journal_does_not_break_appends() {
        let path = std::env::temp_dir()
            .join(format!("deskpilot_missing_{}", Uuid::new_v4()))
            .join("nested")
            .join("log.jsonl");
        let log = HistoryLog::with_journal(Some(path));
        assert_eq!(log.append(draft(1)).seq, 1);
        assert_eq!(log.len(), 1);
    }
}
