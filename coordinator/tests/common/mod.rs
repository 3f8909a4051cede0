//! Shared wiring for coordinator integration tests.
#![allow(dead_code)]

use polity_coordinator::{Collaborators, CoordinatorConfig, SessionCoordinator, StartIntroduction};
use polity_nullables::{NullClock, RecordingAmendmentWorkflow, RecordingNotifier, RecordingTimeline};
use polity_store::MemoryStore;
use polity_types::{AgendaItemId, EventId, RoleId, TargetId, UserId};
use polity_voting::{
    Action, Ballot, EventRoster, MajorityType, Resource, Role, SessionOptions, VoteValue,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const START: u64 = 1_700_000_000;

pub struct Harness {
    pub coordinator: SessionCoordinator,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<NullClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub timeline: Arc<RecordingTimeline>,
    pub workflow: Arc<RecordingAmendmentWorkflow>,
}

/// Fast retries so failure paths finish quickly.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        timer_tick_ms: 20,
        notification_backoff_ms: 1,
        ..CoordinatorConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: CoordinatorConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(NullClock::new(START));
    let notifier = Arc::new(RecordingNotifier::new());
    let timeline = Arc::new(RecordingTimeline::new());
    let workflow = Arc::new(RecordingAmendmentWorkflow::new());
    let coordinator = SessionCoordinator::start(
        config,
        store.clone(),
        Collaborators {
            clock: clock.clone(),
            notifier: notifier.clone(),
            timeline: timeline.clone(),
            workflow: workflow.clone(),
        },
    )
    .expect("coordinator should start");
    Harness {
        coordinator,
        store,
        clock,
        notifier,
        timeline,
        workflow,
    }
}

pub fn user(name: &str) -> UserId {
    UserId::new(name)
}

pub fn event() -> EventId {
    EventId::new("evt_assembly")
}

pub fn chair() -> UserId {
    user("chair")
}

/// An event with a chair (manage voting) and the given delegates (active
/// and passive voting).
pub fn roster(voters: &[&str]) -> EventRoster {
    let mut roster = EventRoster::new(event());
    roster.define_role(
        Role::new("delegate", "Delegate")
            .grant(Action::ActiveVoting, Resource::Events)
            .grant(Action::PassiveVoting, Resource::Events),
    );
    roster.define_role(Role::new("chair", "Chair").grant(Action::ManageVoting, Resource::Events));
    roster.assign(chair(), Some(RoleId::new("chair")));
    for v in voters {
        roster.assign(user(v), Some(RoleId::new("delegate")));
    }
    roster
}

pub fn delegates(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("d{i}")).collect()
}

pub fn seat(h: &Harness, voters: &[String]) {
    let names: Vec<&str> = voters.iter().map(String::as_str).collect();
    h.coordinator.sync_roster(&roster(&names)).unwrap();
}

pub fn request(agenda: &str, target: TargetId, options: SessionOptions) -> StartIntroduction {
    StartIntroduction {
        event_id: event(),
        agenda_item_id: AgendaItemId::new(agenda),
        target,
        options,
    }
}

pub fn simple(title: &str) -> SessionOptions {
    SessionOptions::new(title, MajorityType::Simple)
}

pub fn accept() -> Ballot {
    Ballot::Choice(VoteValue::Accept)
}

pub fn reject() -> Ballot {
    Ballot::Choice(VoteValue::Reject)
}

pub fn abstain() -> Ballot {
    Ballot::Choice(VoteValue::Abstain)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
