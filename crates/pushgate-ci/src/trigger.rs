//! Trigger listener: admits push events and serializes runs per branch pair.
//!
//! Each configured pair owns a slot holding at most one active and one
//! queued commit. A push that arrives while a run is active waits in the
//! slot; a later push replaces it, so only the newest queued commit is
//! validated once the active run finishes. Different pairs run on separate
//! tasks and proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pushgate_core::{BranchPair, CommitRef, PipelineRun, PushEvent, VcsError, VersionControl};
use tokio::sync::watch;
use tracing::{debug, error, info, Instrument};

use crate::pipeline::Pipeline;

/// What happened to a submitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A run started immediately.
    Started,
    /// Waiting for the active run of its pair.
    Queued,
    /// Waiting, and replaced an earlier queued commit.
    Superseded { replaced: CommitRef },
    /// Not a configured source branch, or malformed.
    Ignored,
    /// The commit is already active, queued, or was just completed.
    Duplicate,
}

#[derive(Default)]
struct PairSlot {
    active: Option<CommitRef>,
    queued: Option<PushEvent>,
    last_completed: Option<CommitRef>,
}

struct Route {
    pair: BranchPair,
    pipeline: Arc<Pipeline>,
}

#[derive(Default)]
struct DispatchState {
    slots: HashMap<BranchPair, PairSlot>,
    finished: Vec<PipelineRun>,
}

struct Shared {
    routes: HashMap<String, Route>,
    state: Mutex<DispatchState>,
    active: watch::Sender<usize>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Routes push events to per-pair pipelines.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    routes: HashMap<String, Route>,
}

impl DispatcherBuilder {
    /// Run `pipeline` for pushes to `pair.source`, promoting into `pair.target`.
    pub fn route(mut self, pair: BranchPair, pipeline: Arc<Pipeline>) -> Self {
        self.routes
            .insert(pair.source.clone(), Route { pair, pipeline });
        self
    }

    pub fn build(self) -> Dispatcher {
        let (active, _) = watch::channel(0);
        Dispatcher {
            shared: Arc::new(Shared {
                routes: self.routes,
                state: Mutex::new(DispatchState::default()),
                active,
            }),
        }
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Admit `event`. Never fails; must be called inside a tokio runtime.
    pub fn submit(&self, event: PushEvent) -> Admission {
        if !event.is_well_formed() {
            debug!(branch = %event.branch, "ignoring malformed push event");
            return Admission::Ignored;
        }
        let Some(route) = self.shared.routes.get(&event.branch) else {
            debug!(branch = %event.branch, "ignoring push to unwatched branch");
            return Admission::Ignored;
        };
        let pair = route.pair.clone();
        let commit = event.commit.clone();

        let admission = {
            let mut state = self.shared.lock();
            let slot = state.slots.entry(pair.clone()).or_default();

            let seen = [
                slot.active.as_ref(),
                slot.queued.as_ref().map(|q| &q.commit),
                slot.last_completed.as_ref(),
            ];
            if seen.into_iter().flatten().any(|c| c == &commit) {
                Admission::Duplicate
            } else if slot.active.is_some() {
                match slot.queued.replace(event.clone()) {
                    Some(previous) => Admission::Superseded {
                        replaced: previous.commit,
                    },
                    None => Admission::Queued,
                }
            } else {
                slot.active = Some(commit.clone());
                self.shared.active.send_modify(|n| *n += 1);
                Admission::Started
            }
        };

        info!(event = "trigger.admitted", pair = %pair, commit = %commit, admission = ?admission);
        if admission == Admission::Started {
            let shared = self.shared.clone();
            let span = tracing::info_span!("pushgate.pair", pair = %pair);
            tokio::spawn(pair_worker(shared, pair, event).instrument(span));
        }
        admission
    }

    /// Wait until no run is active or queued on any pair.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.active.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Terminal runs finished since the last call, in completion order.
    pub fn take_finished(&self) -> Vec<PipelineRun> {
        std::mem::take(&mut self.shared.lock().finished)
    }

    /// The configured branch pairs.
    pub fn pairs(&self) -> Vec<BranchPair> {
        self.shared.routes.values().map(|r| r.pair.clone()).collect()
    }
}

/// Drain one pair: run `event`, then whatever is queued, until the slot empties.
async fn pair_worker(shared: Arc<Shared>, pair: BranchPair, event: PushEvent) {
    let Some(pipeline) = shared.routes.get(&pair.source).map(|r| r.pipeline.clone()) else {
        return;
    };
    let mut next = Some(event);

    while let Some(event) = next.take() {
        let result = pipeline.execute(&event, &pair.target).await;

        let mut state = shared.lock();
        match result {
            Ok(run) => state.finished.push(run),
            Err(e) => error!(pair = %pair, commit = %event.commit, error = %e, "pipeline aborted"),
        }
        let slot = state.slots.entry(pair.clone()).or_default();
        slot.last_completed = Some(event.commit);
        next = slot.queued.take();
        slot.active = next.as_ref().map(|e| e.commit.clone());
        if next.is_none() {
            drop(state);
            shared.active.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

/// Polls a branch tip and turns each change into a [`PushEvent`].
pub struct BranchWatcher {
    vcs: Arc<dyn VersionControl>,
    branch: String,
    last_seen: Option<CommitRef>,
}

impl BranchWatcher {
    pub fn new(vcs: Arc<dyn VersionControl>, branch: impl Into<String>) -> Self {
        Self {
            vcs,
            branch: branch.into(),
            last_seen: None,
        }
    }

    /// Fetch the tip once; an event is returned only when it changed. The
    /// first successful poll always reports the current tip.
    pub async fn poll_once(&mut self) -> Result<Option<PushEvent>, VcsError> {
        let tip = self.vcs.fetch(&self.branch).await?;
        if self.last_seen.as_ref() == Some(&tip) {
            return Ok(None);
        }
        self.last_seen = Some(tip.clone());
        Ok(Some(PushEvent::new(self.branch.clone(), tip)))
    }
}
