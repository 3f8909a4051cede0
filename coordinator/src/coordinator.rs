//! The session coordinator: the only writer of voting state.
//!
//! Every mutating command on a session runs under that session's async
//! mutex and commits through the store's version compare-and-set, so
//! concurrent callers and the session's own timer observe one consistent
//! order of events. Queue commands serialize per amendment and candidacy
//! commands per election. Side effects (notifications, timeline, amendment
//! workflow) happen after commit on the fan-out task and never roll a
//! command back; their failures surface as logs and the
//! `polity_notification_failures_total` counter, never as command errors.
//!
//! Lock order is session, then amendment. Nothing takes them the other way
//! round.

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::events::{EventBus, SessionEvent};
use crate::fanout::{spawn_fanout, Downstream, RetryPolicy};
use crate::locks::LockTable;
use crate::metrics::VotingMetrics;
use crate::timer::{TickOutcome, TimerRegistry};
use crate::tracing_spans::{
    candidacy_span, queue_command_span, session_command_span, start_introduction_span,
    timer_tick_span,
};
use polity_store::{StoreError, VotingStore};
use polity_types::{
    AgendaItemId, AmendmentId, CandidateId, ChangeRequestId, ElectionId, EventId, SessionId,
    TargetId, Timestamp, UserId, VoteId,
};
use polity_voting::{
    tally_with_policy, AmendmentWorkflow, Ballot, CandidateRoster, ChangeRequest,
    ChangeRequestQueue, Clock, CloseReason, ElectionCandidate, EventRoster, Notifier, Phase,
    SessionOptions, SessionResult, SessionTally, TimelineSink, Vote, VoteBook, VoteValue,
    VotingError, VotingSession,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Everything outside the engine the coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub timeline: Arc<dyn TimelineSink>,
    pub workflow: Arc<dyn AmendmentWorkflow>,
}

impl Collaborators {
    fn downstream(&self) -> Downstream {
        Downstream {
            notifier: Arc::clone(&self.notifier),
            timeline: Arc::clone(&self.timeline),
            workflow: Arc::clone(&self.workflow),
        }
    }
}

/// Open a session on an agenda item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartIntroduction {
    pub event_id: EventId,
    pub agenda_item_id: AgendaItemId,
    pub target: TargetId,
    #[serde(flatten)]
    pub options: SessionOptions,
}

/// A binding vote and whether it closed the session.
#[derive(Clone, Debug, Serialize)]
pub struct CastOutcome {
    pub vote: Vote,
    /// Set when this vote completed the electorate and auto-closed the
    /// session.
    pub closed: Option<SessionResult>,
}

/// Advisory indication counts, never part of the result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Indications {
    Ballot {
        accept: u32,
        reject: u32,
        abstain: u32,
    },
    Election {
        counts: BTreeMap<CandidateId, u32>,
    },
}

/// Current standing of a session.
#[derive(Clone, Debug, Serialize)]
pub struct LiveTally {
    pub session_id: SessionId,
    pub phase: Phase,
    /// Frozen once the session completed, computed on demand before that.
    pub tally: SessionTally,
    pub indications: Indications,
    /// Binding votes cast by currently eligible voters.
    pub voted: usize,
    pub eligible: usize,
    pub remaining_secs: Option<u64>,
}

/// Generated ids: `<prefix><epoch hex>_<sequence>`.
struct IdGenerator {
    epoch: u64,
    sequence: AtomicU64,
}

impl IdGenerator {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            sequence: AtomicU64::new(0),
        }
    }

    fn next(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn session(&self) -> SessionId {
        SessionId::from_parts(self.epoch, self.next())
    }

    fn vote(&self) -> VoteId {
        VoteId::from_parts(self.epoch, self.next())
    }

    fn candidate(&self) -> CandidateId {
        CandidateId::from_parts(self.epoch, self.next())
    }
}

struct Inner {
    config: CoordinatorConfig,
    store: Arc<dyn VotingStore>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    metrics: Arc<VotingMetrics>,
    session_locks: LockTable<SessionId>,
    amendment_locks: LockTable<AmendmentId>,
    election_locks: LockTable<ElectionId>,
    timers: TimerRegistry,
    ids: IdGenerator,
    shutdown: broadcast::Sender<()>,
    fanout: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

/// Cheap to clone; all clones drive the same coordinator.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Build a coordinator and spawn its background tasks.
    ///
    /// Must be called inside a tokio runtime. Sessions that were already in
    /// the voting phase get their timers back.
    pub fn start(
        config: CoordinatorConfig,
        store: Arc<dyn VotingStore>,
        collaborators: Collaborators,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let (bus, outbox) = EventBus::new(config.event_channel_capacity);
        let metrics = Arc::new(VotingMetrics::new());
        let (shutdown, _) = broadcast::channel(1);
        let policy = RetryPolicy {
            max_attempts: config.notification_max_attempts,
            backoff: config.notification_backoff(),
        };
        let fanout = spawn_fanout(
            outbox,
            collaborators.downstream(),
            policy,
            Arc::clone(&metrics),
            shutdown.subscribe(),
        );
        let epoch = collaborators.clock.now().as_secs();

        let coordinator = Self {
            inner: Arc::new(Inner {
                config,
                store,
                clock: collaborators.clock,
                bus,
                metrics,
                session_locks: LockTable::new(),
                amendment_locks: LockTable::new(),
                election_locks: LockTable::new(),
                timers: TimerRegistry::default(),
                ids: IdGenerator::new(epoch),
                shutdown,
                fanout: Mutex::new(Some(fanout)),
                stopped: AtomicBool::new(false),
            }),
        };
        coordinator.recover()?;
        Ok(coordinator)
    }

    fn recover(&self) -> Result<(), CoordinatorError> {
        let active = self.inner.store.active_sessions()?;
        self.inner.metrics.active_sessions.set(active.len() as i64);
        for session in active.iter().filter(|s| s.phase == Phase::Voting) {
            tracing::info!(session = %session.id, "resuming session timer");
            self.schedule_timer(&session.id);
        }
        Ok(())
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> Arc<VotingMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Receive every event committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.bus.subscribe()
    }

    /// Stop timers and the fan-out task. Events already published are still
    /// delivered; new commands fail with [`CoordinatorError::ShuttingDown`].
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(());
        self.inner.timers.cancel_all();
        self.inner.metrics.active_timers.set(0);
        let fanout = self
            .inner
            .fanout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = fanout {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "fan-out task ended abnormally");
            }
        }
        tracing::info!("session coordinator stopped");
    }

    fn ensure_running(&self) -> Result<(), CoordinatorError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ShuttingDown);
        }
        Ok(())
    }

    // ── Session commands ────────────────────────────────────────────────

    /// Open a session in the introduction phase.
    ///
    /// A retry carrying the idempotency key of a session already opened on
    /// the same agenda item returns that session unchanged.
    pub async fn start_introduction(
        &self,
        request: StartIntroduction,
        actor: &UserId,
    ) -> Result<VotingSession, CoordinatorError> {
        let span = start_introduction_span(
            request.event_id.as_str(),
            request.agenda_item_id.as_str(),
        );
        async move {
            self.ensure_running()?;
            let inner = &self.inner;
            let roster = inner.store.roster(&request.event_id)?;
            require_manager(&roster, actor)?;

            let key = request.options.idempotency_key.clone();
            if let Some(existing) = self.replay(&request, key.as_deref())? {
                tracing::debug!(session = %existing.id, "idempotent replay of start introduction");
                return Ok(existing);
            }
            if let Some(active) = inner
                .store
                .active_session_for(&request.event_id, &request.agenda_item_id)?
            {
                return Err(conflict(&active));
            }
            if let Some(active) = inner.store.active_session_on(&request.target)? {
                return Err(conflict(&active));
            }
            if roster.eligible_voters().is_empty() {
                return Err(VotingError::NoEligibleVoters(request.event_id.clone()).into());
            }
            self.validate_target(&request.target)?;

            let session = VotingSession::open(
                inner.ids.session(),
                request.event_id.clone(),
                request.agenda_item_id.clone(),
                request.target.clone(),
                actor.clone(),
                request.options.clone(),
                inner.clock.now(),
            );
            if let Err(e) = inner.store.insert_session(&session) {
                // Lost a race against a concurrent start on the same item.
                if let Some(existing) = self.replay(&request, key.as_deref())? {
                    return Ok(existing);
                }
                return Err(CoordinatorError::from_store(e, Phase::Introduction));
            }

            tracing::info!(
                session = %session.id,
                target = %session.target,
                majority = ?session.majority_type,
                "voting session opened for introduction"
            );
            inner.metrics.sessions_started.inc();
            inner.metrics.active_sessions.inc();
            inner.bus.publish(SessionEvent::SessionStarted {
                session: session.clone(),
                actor: actor.clone(),
            });
            Ok(session)
        }
        .instrument(span)
        .await
    }

    /// Introduction → voting.
    pub async fn start_voting(
        &self,
        session_id: &SessionId,
        actor: &UserId,
    ) -> Result<VotingSession, CoordinatorError> {
        let span = session_command_span("start_voting", session_id.as_str());
        async move {
            self.ensure_running()?;
            let inner = &self.inner;
            let _guard = inner.session_locks.acquire(session_id).await;
            let session = self.load_session(session_id)?;
            let roster = inner.store.roster(&session.event_id)?;
            require_manager(&roster, actor)?;

            let expected = session.version;
            let mut next = session;
            next.start_voting(inner.clock.now(), inner.config.default_time_limit_secs)?;
            self.gate_voting(&next).await?;
            inner
                .store
                .compare_and_swap(&next, expected)
                .map_err(|e| CoordinatorError::from_store(e, Phase::Introduction))?;

            tracing::info!(
                session = %next.id,
                time_limit_secs = ?next.time_limit_secs,
                "voting phase started"
            );
            self.schedule_timer(&next.id);
            inner.bus.publish(SessionEvent::VotingStarted {
                session: next.clone(),
                actor: actor.clone(),
            });
            Ok(next)
        }
        .instrument(span)
        .await
    }

    /// Cast a first binding vote. May auto-close the session when the last
    /// eligible voter has voted.
    pub async fn cast_vote(
        &self,
        session_id: &SessionId,
        voter: &UserId,
        ballot: Ballot,
    ) -> Result<CastOutcome, CoordinatorError> {
        let span = session_command_span("cast_vote", session_id.as_str());
        let outcome: Result<CastOutcome, CoordinatorError> = async move {
            self.ensure_running()?;
            let inner = &self.inner;
            let _guard = inner.session_locks.acquire(session_id).await;
            let session = self.load_session(session_id)?;
            let now = inner.clock.now();
            let session = self.close_if_expired(session, now, "cast a binding vote").await?;
            session.ensure_accepting_votes()?;

            let roster = inner.store.roster(&session.event_id)?;
            require_voter(&roster, voter)?;
            self.validate_ballot(&session, &ballot)?;
            self.ensure_sub_ballot_open(&session).await?;
            let mut book = VoteBook::from_votes(inner.store.votes_for_session(&session.id)?);

            let vote = Vote {
                id: inner.ids.vote(),
                session_id: session.id.clone(),
                voter: voter.clone(),
                ballot,
                is_indication: false,
                cast_at: now,
                updated_at: None,
            };
            book.record_binding(vote.clone())?;
            inner.store.put_vote(&vote)?;
            inner.metrics.votes_cast.with_label_values(&["binding"]).inc();
            tracing::debug!(session = %session.id, voter = %voter, "binding vote cast");
            inner.bus.publish(SessionEvent::VoteCast { vote: vote.clone() });

            let eligible = roster.eligible_voters();
            let voted = book.binding_count_among(&eligible);
            let closed = match session.auto_close_due(now, voted, eligible.len()) {
                Some(reason) => Some(self.close_locked(session, reason, None, now).await?),
                None => None,
            };
            Ok(CastOutcome { vote, closed })
        }
        .instrument(span)
        .await;
        self.count_rejection(outcome)
    }

    /// Replace the voter's binding vote while voting is open.
    pub async fn change_vote(
        &self,
        session_id: &SessionId,
        voter: &UserId,
        ballot: Ballot,
    ) -> Result<Vote, CoordinatorError> {
        let span = session_command_span("change_vote", session_id.as_str());
        let outcome: Result<Vote, CoordinatorError> = async move {
            self.ensure_running()?;
            let inner = &self.inner;
            let _guard = inner.session_locks.acquire(session_id).await;
            let session = self.load_session(session_id)?;
            let now = inner.clock.now();
            let session = self.close_if_expired(session, now, "change a binding vote").await?;
            session.ensure_accepting_votes()?;

            let roster = inner.store.roster(&session.event_id)?;
            require_voter(&roster, voter)?;
            self.validate_ballot(&session, &ballot)?;
            self.ensure_sub_ballot_open(&session).await?;
            let mut book = VoteBook::from_votes(inner.store.votes_for_session(&session.id)?);
            let vote = book.replace_binding(voter, ballot, now)?;
            inner.store.put_vote(&vote)?;
            inner.metrics.votes_cast.with_label_values(&["changed"]).inc();
            tracing::debug!(session = %session.id, voter = %voter, "binding vote changed");
            inner.bus.publish(SessionEvent::VoteChanged { vote: vote.clone() });
            Ok(vote)
        }
        .instrument(span)
        .await;
        self.count_rejection(outcome)
    }

    /// Record an advisory indication during introduction. A second
    /// indication by the same voter supersedes the first.
    pub async fn cast_indication(
        &self,
        session_id: &SessionId,
        voter: &UserId,
        ballot: Ballot,
    ) -> Result<Vote, CoordinatorError> {
        let span = session_command_span("cast_indication", session_id.as_str());
        let outcome: Result<Vote, CoordinatorError> = async move {
            self.ensure_running()?;
            let inner = &self.inner;
            let _guard = inner.session_locks.acquire(session_id).await;
            let session = self.load_session(session_id)?;
            session.ensure_accepting_indications()?;

            let roster = inner.store.roster(&session.event_id)?;
            require_voter(&roster, voter)?;
            self.validate_ballot(&session, &ballot)?;
            let mut book = VoteBook::from_votes(inner.store.votes_for_session(&session.id)?);

            let now = inner.clock.now();
            let previous = book.indication_of(voter).cloned();
            let vote = Vote {
                id: previous
                    .as_ref()
                    .map(|v| v.id.clone())
                    .unwrap_or_else(|| inner.ids.vote()),
                session_id: session.id.clone(),
                voter: voter.clone(),
                ballot,
                is_indication: true,
                cast_at: previous.as_ref().map(|v| v.cast_at).unwrap_or(now),
                updated_at: previous.as_ref().map(|_| now),
            };
            book.record_indication(vote.clone());
            inner.store.put_vote(&vote)?;
            inner.metrics.votes_cast.with_label_values(&["indication"]).inc();
            tracing::debug!(session = %session.id, voter = %voter, "indication recorded");
            inner.bus.publish(SessionEvent::IndicationCast { vote: vote.clone() });
            Ok(vote)
        }
        .instrument(span)
        .await;
        self.count_rejection(outcome)
    }

    /// Manager close: voting → completed with the tally frozen.
    pub async fn close_voting(
        &self,
        session_id: &SessionId,
        actor: &UserId,
    ) -> Result<VotingSession, CoordinatorError> {
        let span = session_command_span("close_voting", session_id.as_str());
        async move {
            self.ensure_running()?;
            let inner = &self.inner;
            let _guard = inner.session_locks.acquire(session_id).await;
            let session = self.load_session(session_id)?;
            let roster = inner.store.roster(&session.event_id)?;
            require_manager(&roster, actor)?;
            self.close_locked(session, CloseReason::Manual, Some(actor), inner.clock.now())
                .await?;
            self.load_session(session_id)
        }
        .instrument(span)
        .await
    }

    /// Re-evaluate auto-close for one session. Driven by the session timer;
    /// safe to call at any time.
    pub async fn tick(&self, session_id: &SessionId) -> Result<TickOutcome, CoordinatorError> {
        let inner = &self.inner;
        let _guard = inner.session_locks.acquire(session_id).await;
        let session = match inner.store.get_session(session_id) {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => return Ok(TickOutcome::Finished),
            Err(e) => return Err(e.into()),
        };
        if session.phase != Phase::Voting {
            return Ok(TickOutcome::Finished);
        }
        let roster = inner.store.roster(&session.event_id)?;
        let eligible = roster.eligible_voters();
        let book = VoteBook::from_votes(inner.store.votes_for_session(&session.id)?);
        let now = inner.clock.now();
        match session.auto_close_due(now, book.binding_count_among(&eligible), eligible.len()) {
            Some(reason) => {
                self.close_locked(session, reason, None, now).await?;
                Ok(TickOutcome::Closed)
            }
            None => Ok(TickOutcome::Pending),
        }
    }

    // ── Election commands ───────────────────────────────────────────────

    /// File a candidacy for `user`, who needs the passive voting right.
    pub async fn become_candidate(
        &self,
        event: &EventId,
        election: &ElectionId,
        user: &UserId,
    ) -> Result<ElectionCandidate, CoordinatorError> {
        let span = candidacy_span("become_candidate", election.as_str());
        async move {
            self.ensure_running()?;
            let inner = &self.inner;
            let _guard = inner.election_locks.acquire(election).await;
            self.ensure_election_open(event, election)?;
            let roster = inner.store.roster(event)?;
            let mut candidates = self.load_candidates(election)?;
            let candidate = candidates
                .become_candidate(
                    inner.ids.candidate(),
                    user.clone(),
                    roster.may_stand(user),
                    inner.clock.now(),
                )?
                .clone();
            self.commit_candidacy(candidate, "candidacy filed")
        }
        .instrument(span)
        .await
    }

    /// Nominated → accepted, by the candidate.
    pub async fn accept_candidacy(
        &self,
        event: &EventId,
        election: &ElectionId,
        candidate: &CandidateId,
        by: &UserId,
    ) -> Result<ElectionCandidate, CoordinatorError> {
        let span = candidacy_span("accept_candidacy", election.as_str());
        async move {
            self.ensure_running()?;
            let _guard = self.inner.election_locks.acquire(election).await;
            self.ensure_election_open(event, election)?;
            let mut candidates = self.load_candidates(election)?;
            let accepted = candidates.accept(candidate, by)?.clone();
            self.commit_candidacy(accepted, "candidacy accepted")
        }
        .instrument(span)
        .await
    }

    /// Withdraw a candidacy, by the candidate. Votes already cast for them
    /// stay on record but are no longer counted.
    pub async fn withdraw_candidacy(
        &self,
        event: &EventId,
        election: &ElectionId,
        candidate: &CandidateId,
        by: &UserId,
    ) -> Result<ElectionCandidate, CoordinatorError> {
        let span = candidacy_span("withdraw_candidacy", election.as_str());
        async move {
            self.ensure_running()?;
            let _guard = self.inner.election_locks.acquire(election).await;
            self.ensure_election_open(event, election)?;
            let mut candidates = self.load_candidates(election)?;
            let withdrawn = candidates
                .withdraw(candidate, by, self.inner.clock.now())?
                .clone();
            self.commit_candidacy(withdrawn, "candidacy withdrawn")
        }
        .instrument(span)
        .await
    }

    fn commit_candidacy(
        &self,
        candidate: ElectionCandidate,
        message: &'static str,
    ) -> Result<ElectionCandidate, CoordinatorError> {
        self.inner.store.put_candidate(&candidate)?;
        tracing::info!(
            election = %candidate.election_id,
            candidate = %candidate.id,
            user = %candidate.user_id,
            "{message}"
        );
        self.inner.bus.publish(SessionEvent::CandidacyChanged {
            candidate: candidate.clone(),
        });
        Ok(candidate)
    }

    // ── Change-request queue commands ───────────────────────────────────

    /// Open the next change request of an amendment for its sub-ballot.
    pub async fn activate_change_request(
        &self,
        event: &EventId,
        amendment: &AmendmentId,
        change_request: &ChangeRequestId,
        actor: &UserId,
    ) -> Result<ChangeRequest, CoordinatorError> {
        let span = queue_command_span("activate", amendment.as_str());
        async move {
            self.ensure_running()?;
            let inner = &self.inner;
            require_manager(&inner.store.roster(event)?, actor)?;
            let _guard = inner.amendment_locks.acquire(amendment).await;
            let mut queue = self.load_queue(amendment)?;
            let activated = queue.activate(change_request, inner.clock.now())?.clone();
            inner.store.put_change_requests(std::slice::from_ref(&activated))?;
            tracing::info!(change_request = %activated.id, "change request opened for voting");
            inner.bus.publish(SessionEvent::ChangeRequestActivated {
                change_request: activated.clone(),
                actor: actor.clone(),
            });
            Ok(activated)
        }
        .instrument(span)
        .await
    }

    /// Give the pending change requests a new voting order.
    pub async fn reorder_change_requests(
        &self,
        event: &EventId,
        amendment: &AmendmentId,
        order: &[ChangeRequestId],
        actor: &UserId,
    ) -> Result<Vec<ChangeRequest>, CoordinatorError> {
        let span = queue_command_span("reorder", amendment.as_str());
        async move {
            self.ensure_running()?;
            let inner = &self.inner;
            require_manager(&inner.store.roster(event)?, actor)?;
            let _guard = inner.amendment_locks.acquire(amendment).await;
            let mut queue = self.load_queue(amendment)?;
            queue.reorder(order)?;
            inner.store.put_change_requests(queue.ordered())?;
            tracing::info!(pending = order.len(), "change requests reordered");
            inner.bus.publish(SessionEvent::ChangeRequestsReordered {
                amendment: amendment.clone(),
                order: order.to_vec(),
                actor: actor.clone(),
            });
            Ok(queue.into_items())
        }
        .instrument(span)
        .await
    }

    // ── Inbound sync from the surrounding application ───────────────────

    /// Replace an event's participants and roles.
    pub fn sync_roster(&self, roster: &EventRoster) -> Result<(), CoordinatorError> {
        self.inner.store.put_roster(roster)?;
        tracing::debug!(
            event = %roster.event_id,
            participants = roster.participant_count(),
            "event roster updated"
        );
        Ok(())
    }

    /// Register (or update the metadata of) a change request. Voting state
    /// (`activated_at`, `completed_at`, `result`) is owned by the queue and
    /// kept from the stored copy.
    pub async fn register_change_request(
        &self,
        request: ChangeRequest,
    ) -> Result<ChangeRequest, CoordinatorError> {
        let inner = &self.inner;
        let _guard = inner.amendment_locks.acquire(&request.amendment_id).await;
        let queue = self.load_queue(&request.amendment_id)?;
        let stored = queue.get(&request.id).cloned();
        let merged = match stored {
            Some(stored) => ChangeRequest {
                activated_at: stored.activated_at,
                completed_at: stored.completed_at,
                result: stored.result,
                ..request
            },
            None => ChangeRequest {
                activated_at: None,
                completed_at: None,
                result: None,
                ..request
            },
        };
        inner.store.put_change_requests(std::slice::from_ref(&merged))?;
        Ok(merged)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn session(&self, id: &SessionId) -> Result<VotingSession, CoordinatorError> {
        self.load_session(id)
    }

    pub fn sessions_for_event(
        &self,
        event: &EventId,
    ) -> Result<Vec<VotingSession>, CoordinatorError> {
        Ok(self.inner.store.sessions_for_event(event)?)
    }

    /// Current counts. Read under the session lock so the snapshot never
    /// straddles a commit.
    pub async fn live_tally(&self, id: &SessionId) -> Result<LiveTally, CoordinatorError> {
        let inner = &self.inner;
        let _guard = inner.session_locks.acquire(id).await;
        let session = self.load_session(id)?;
        let roster = inner.store.roster(&session.event_id)?;
        let eligible = roster.eligible_voters();
        let book = VoteBook::from_votes(inner.store.votes_for_session(id)?);
        let tally = match &session.tally {
            Some(frozen) => frozen.clone(),
            None => self.compute_tally(&session, &book, &eligible)?,
        };
        let indications = match &session.target {
            TargetId::Election(election) => Indications::Election {
                counts: self.load_candidates(election)?.indication_counts(&book),
            },
            _ => {
                let (mut accept, mut reject, mut abstain) = (0, 0, 0);
                for value in book.indication_choices() {
                    match value {
                        VoteValue::Accept => accept += 1,
                        VoteValue::Reject => reject += 1,
                        VoteValue::Abstain => abstain += 1,
                    }
                }
                Indications::Ballot {
                    accept,
                    reject,
                    abstain,
                }
            }
        };
        Ok(LiveTally {
            session_id: session.id.clone(),
            phase: session.phase,
            tally,
            indications,
            voted: book.binding_count_among(&eligible),
            eligible: eligible.len(),
            remaining_secs: session
                .is_active()
                .then(|| session.remaining_secs(inner.clock.now()))
                .flatten(),
        })
    }

    pub fn eligible_voters(
        &self,
        event: &EventId,
    ) -> Result<BTreeSet<UserId>, CoordinatorError> {
        Ok(self.inner.store.roster(event)?.eligible_voters())
    }

    pub fn is_eligible(&self, event: &EventId, user: &UserId) -> Result<bool, CoordinatorError> {
        Ok(self.inner.store.roster(event)?.is_eligible(user))
    }

    /// The amendment's change requests in voting order.
    pub fn change_requests(
        &self,
        amendment: &AmendmentId,
    ) -> Result<Vec<ChangeRequest>, CoordinatorError> {
        Ok(self.load_queue(amendment)?.into_items())
    }

    pub fn next_change_request(
        &self,
        amendment: &AmendmentId,
    ) -> Result<Option<ChangeRequest>, CoordinatorError> {
        Ok(self.load_queue(amendment)?.next_pending().cloned())
    }

    /// Standing candidates of an election.
    pub fn ballot(
        &self,
        election: &ElectionId,
    ) -> Result<Vec<ElectionCandidate>, CoordinatorError> {
        Ok(self.load_candidates(election)?.ballot().cloned().collect())
    }

    pub fn timer_running(&self, session: &SessionId) -> bool {
        self.inner.timers.contains(session)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn load_session(&self, id: &SessionId) -> Result<VotingSession, CoordinatorError> {
        self.inner
            .store
            .get_session(id)
            .map_err(|e| CoordinatorError::from_store(e, Phase::Introduction))
    }

    fn load_queue(
        &self,
        amendment: &AmendmentId,
    ) -> Result<ChangeRequestQueue, CoordinatorError> {
        Ok(ChangeRequestQueue::new(
            amendment.clone(),
            self.inner.store.change_requests(amendment)?,
        ))
    }

    fn load_candidates(
        &self,
        election: &ElectionId,
    ) -> Result<CandidateRoster, CoordinatorError> {
        Ok(CandidateRoster::new(
            election.clone(),
            self.inner.store.candidates(election)?,
        ))
    }

    /// A session previously opened on this agenda item with the same key.
    fn replay(
        &self,
        request: &StartIntroduction,
        key: Option<&str>,
    ) -> Result<Option<VotingSession>, CoordinatorError> {
        let Some(key) = key else {
            return Ok(None);
        };
        Ok(self
            .inner
            .store
            .sessions_for_event(&request.event_id)?
            .into_iter()
            .find(|s| {
                s.agenda_item_id == request.agenda_item_id
                    && s.idempotency_key.as_deref() == Some(key)
            }))
    }

    fn validate_target(&self, target: &TargetId) -> Result<(), CoordinatorError> {
        if let TargetId::ChangeRequest {
            amendment,
            change_request,
        } = target
        {
            let queue = self.load_queue(amendment)?;
            match queue.get(change_request) {
                None => {
                    return Err(VotingError::NotFound(format!(
                        "change request {change_request} of amendment {amendment}"
                    ))
                    .into())
                }
                Some(cr) if cr.is_completed() => {
                    return Err(VotingError::QueueOrderingViolation(format!(
                        "change request {change_request} was already decided"
                    ))
                    .into())
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Queue conditions for entering the voting phase.
    async fn gate_voting(&self, session: &VotingSession) -> Result<(), CoordinatorError> {
        if let Some(other) = self
            .inner
            .store
            .active_session_on(&session.target)?
            .filter(|s| s.id != session.id)
        {
            return Err(conflict(&other));
        }
        match &session.target {
            TargetId::Amendment(amendment) => {
                let _guard = self.inner.amendment_locks.acquire(amendment).await;
                self.load_queue(amendment)?.ensure_final_vote_allowed()?;
            }
            TargetId::ChangeRequest {
                amendment,
                change_request,
            } => {
                let _guard = self.inner.amendment_locks.acquire(amendment).await;
                self.load_queue(amendment)?.ensure_open(change_request)?;
            }
            TargetId::Election(_) => {}
        }
        Ok(())
    }

    /// A change request's sub-ballot only admits binding votes while the
    /// change request is open.
    async fn ensure_sub_ballot_open(
        &self,
        session: &VotingSession,
    ) -> Result<(), CoordinatorError> {
        if let TargetId::ChangeRequest {
            amendment,
            change_request,
        } = &session.target
        {
            let _guard = self.inner.amendment_locks.acquire(amendment).await;
            self.load_queue(amendment)?.ensure_open(change_request)?;
        }
        Ok(())
    }

    fn validate_ballot(
        &self,
        session: &VotingSession,
        ballot: &Ballot,
    ) -> Result<(), CoordinatorError> {
        match (&session.target, ballot) {
            (TargetId::Election(election), Ballot::Candidate(candidate)) => {
                self.load_candidates(election)?.ensure_votable(candidate)?;
            }
            (TargetId::Election(_), Ballot::Choice(_)) => {
                return Err(VotingError::InvalidBallot(
                    "election ballots must name a candidate".into(),
                )
                .into());
            }
            (_, Ballot::Candidate(_)) => {
                return Err(VotingError::InvalidBallot(
                    "only election ballots may name a candidate".into(),
                )
                .into());
            }
            (_, Ballot::Choice(_)) => {}
        }
        Ok(())
    }

    fn ensure_election_open(
        &self,
        event: &EventId,
        election: &ElectionId,
    ) -> Result<(), CoordinatorError> {
        let decided = self
            .inner
            .store
            .sessions_for_event(event)?
            .into_iter()
            .any(|s| s.target.election() == Some(election) && s.phase == Phase::Completed);
        if decided {
            return Err(VotingError::InvalidPhaseTransition {
                action: "change a candidacy",
                phase: Phase::Completed,
            }
            .into());
        }
        Ok(())
    }

    fn compute_tally(
        &self,
        session: &VotingSession,
        book: &VoteBook,
        eligible: &BTreeSet<UserId>,
    ) -> Result<SessionTally, CoordinatorError> {
        Ok(match &session.target {
            TargetId::Election(election) => {
                SessionTally::Election(self.load_candidates(election)?.tally(book))
            }
            _ => SessionTally::Ballot(tally_with_policy(
                book.binding_choices(),
                session.majority_type,
                u32::try_from(eligible.len()).unwrap_or(u32::MAX),
                &self.inner.config.tally_policy,
            )),
        })
    }

    /// Close a session whose deadline already passed before admitting a
    /// late command, then report the command as out of phase.
    async fn close_if_expired(
        &self,
        session: VotingSession,
        now: Timestamp,
        action: &'static str,
    ) -> Result<VotingSession, CoordinatorError> {
        // Zero counts leave only the timeout condition in play.
        if session.auto_close_due(now, 0, 0) != Some(CloseReason::Timeout) {
            return Ok(session);
        }
        self.close_locked(session, CloseReason::Timeout, None, now).await?;
        Err(VotingError::InvalidPhaseTransition {
            action,
            phase: Phase::Completed,
        }
        .into())
    }

    /// Voting → completed. Caller holds the session lock.
    async fn close_locked(
        &self,
        mut session: VotingSession,
        reason: CloseReason,
        actor: Option<&UserId>,
        now: Timestamp,
    ) -> Result<SessionResult, CoordinatorError> {
        let inner = &self.inner;
        let expected = session.version;
        let roster = inner.store.roster(&session.event_id)?;
        let eligible = roster.eligible_voters();
        let book = VoteBook::from_votes(inner.store.votes_for_session(&session.id)?);
        let tally = self.compute_tally(&session, &book, &eligible)?;
        let result = session.complete(now, tally, reason)?;
        inner
            .store
            .compare_and_swap(&session, expected)
            .map_err(|e| CoordinatorError::from_store(e, Phase::Voting))?;

        if let TargetId::ChangeRequest {
            amendment,
            change_request,
        } = &session.target
        {
            self.complete_change_request(amendment, change_request, now, result)
                .await;
        }

        tracing::info!(
            session = %session.id,
            %result,
            %reason,
            votes = book.binding_count(),
            eligible = eligible.len(),
            "voting session completed"
        );
        let label = reason.to_string();
        inner
            .metrics
            .sessions_closed
            .with_label_values(&[label.as_str()])
            .inc();
        inner.metrics.active_sessions.dec();

        let id = session.id.clone();
        inner.bus.publish(SessionEvent::SessionClosed {
            session,
            reason,
            actor: actor.cloned(),
        });
        // Last: when the timer itself is closing, its abort lands at the
        // next await, after this returns.
        inner.timers.cancel(&id);
        inner.metrics.active_timers.set(inner.timers.len() as i64);
        inner.session_locks.forget(&id);
        Ok(result)
    }

    /// Record a sub-ballot's result on its change request. The session is
    /// already committed; a failure here is logged, not returned.
    async fn complete_change_request(
        &self,
        amendment: &AmendmentId,
        change_request: &ChangeRequestId,
        now: Timestamp,
        result: SessionResult,
    ) {
        let _guard = self.inner.amendment_locks.acquire(amendment).await;
        let completed = self.load_queue(amendment).and_then(|mut queue| {
            let cr = queue.complete(change_request, now, result)?.clone();
            self.inner
                .store
                .put_change_requests(std::slice::from_ref(&cr))?;
            Ok(cr)
        });
        match completed {
            Ok(cr) => tracing::info!(change_request = %cr.id, %result, "change request decided"),
            Err(e) => tracing::error!(
                change_request = %change_request,
                error = %e,
                "failed to record change request result"
            ),
        }
    }

    fn schedule_timer(&self, session_id: &SessionId) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.timer_tick();
        let mut shutdown = self.inner.shutdown.subscribe();
        let session = session_id.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let coordinator = SessionCoordinator { inner };
                        let outcome = coordinator
                            .tick(&session)
                            .instrument(timer_tick_span(session.as_str()))
                            .await;
                        match outcome {
                            Ok(TickOutcome::Pending) => {}
                            Ok(TickOutcome::Closed | TickOutcome::Finished) => break,
                            Err(e) => {
                                tracing::warn!(session = %session, error = %e, "timer tick failed");
                            }
                        }
                    }
                }
            }
        });
        self.inner.timers.insert(session_id.clone(), handle);
        self.inner
            .metrics
            .active_timers
            .set(self.inner.timers.len() as i64);
    }

    /// Count a rejected vote command by error kind.
    fn count_rejection<T>(
        &self,
        outcome: Result<T, CoordinatorError>,
    ) -> Result<T, CoordinatorError> {
        if let Err(e) = &outcome {
            let reason = match e.voting() {
                Some(VotingError::PermissionDenied(_)) => "permission_denied",
                Some(VotingError::InvalidPhaseTransition { .. }) => "invalid_phase",
                Some(VotingError::DuplicateVote(_)) => "duplicate_vote",
                Some(VotingError::InvalidBallot(_)) => "invalid_ballot",
                Some(VotingError::NotFound(_)) => "not_found",
                Some(_) => "rejected",
                None => "internal",
            };
            self.inner
                .metrics
                .votes_rejected
                .with_label_values(&[reason])
                .inc();
        }
        outcome
    }
}

fn require_manager(roster: &EventRoster, actor: &UserId) -> Result<(), VotingError> {
    if roster.is_manager(actor) {
        return Ok(());
    }
    Err(VotingError::PermissionDenied(format!(
        "{actor} lacks the manage voting right on event {}",
        roster.event_id
    )))
}

fn require_voter(roster: &EventRoster, voter: &UserId) -> Result<(), VotingError> {
    if roster.is_eligible(voter) {
        return Ok(());
    }
    Err(VotingError::PermissionDenied(format!(
        "{voter} lacks the active voting right on event {}",
        roster.event_id
    )))
}

fn conflict(active: &VotingSession) -> CoordinatorError {
    VotingError::SessionConflict {
        agenda_item: active.agenda_item_id.clone(),
        active: active.id.clone(),
    }
    .into()
}
