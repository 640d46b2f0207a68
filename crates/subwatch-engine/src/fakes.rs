//! Recording fakes for the ports, shared by the engine tests.

use std::{
  collections::{BTreeSet, HashMap},
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use subwatch_bus::{EventBus, handler};
use subwatch_core::{
  event::{DomainEvent, Topic},
  model::{Classification, IdentityRecord, IdentityStatus, ReportLine, SubscriptionState},
  ports::{MessageOptions, Notifier, StatusLookup, SubscriptionStateRepo, WatchlistRepository},
};

use crate::CancelToken;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FakeError(pub String);

// ─── Lookup ──────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeLookup {
  answers:      Arc<Mutex<HashMap<String, Result<Classification, String>>>>,
  /// Cancel this token when the named identity is looked up.
  cancel_on:    Arc<Mutex<Option<(String, CancelToken)>>>,
  pub lookups:  Arc<Mutex<Vec<String>>>,
}

impl FakeLookup {
  pub fn set(&self, identity: &str, classification: Classification) {
    self.answers.lock().unwrap().insert(identity.to_owned(), Ok(classification));
  }

  pub fn fail(&self, identity: &str, error: &str) {
    self.answers.lock().unwrap().insert(identity.to_owned(), Err(error.to_owned()));
  }

  pub fn cancel_when_checking(&self, identity: &str, token: &CancelToken) {
    *self.cancel_on.lock().unwrap() = Some((identity.to_owned(), token.clone()));
  }
}

impl StatusLookup for FakeLookup {
  type Error = FakeError;

  async fn lookup(&self, identity: &str) -> Result<Option<IdentityRecord>, FakeError> {
    self.lookups.lock().unwrap().push(identity.to_owned());
    if let Some((target, token)) = self.cancel_on.lock().unwrap().as_ref()
      && target == identity
    {
      token.cancel();
    }
    let answer = self.answers.lock().unwrap().get(identity).cloned();
    match answer {
      None => Ok(None),
      Some(Err(e)) => Err(FakeError(e)),
      Some(Ok(classification)) => Ok(Some(IdentityRecord {
        id: format!("id-{identity}"),
        login: identity.to_owned(),
        display_name: identity.to_uppercase(),
        classification,
      })),
    }
  }
}

// ─── State repository ────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeRepo {
  states:             Arc<Mutex<HashMap<String, SubscriptionState>>>,
  pub set_many_calls: Arc<AtomicUsize>,
  pub upsert_calls:   Arc<AtomicUsize>,
  pub fail_writes:    Arc<AtomicBool>,
}

impl FakeRepo {
  pub fn seed(&self, state: SubscriptionState) {
    self.states.lock().unwrap().insert(state.identity.clone(), state);
  }

  pub fn stored(&self, identity: &str) -> Option<SubscriptionState> {
    self.states.lock().unwrap().get(identity).cloned()
  }

  pub fn len(&self) -> usize { self.states.lock().unwrap().len() }
}

impl SubscriptionStateRepo for FakeRepo {
  type Error = FakeError;

  async fn get(&self, identity: &str) -> Result<Option<SubscriptionState>, FakeError> {
    Ok(self.stored(identity))
  }

  async fn upsert(&self, state: SubscriptionState) -> Result<(), FakeError> {
    self.upsert_calls.fetch_add(1, Ordering::SeqCst);
    self.seed(state);
    Ok(())
  }

  async fn set_many(&self, states: Vec<SubscriptionState>) -> Result<(), FakeError> {
    self.set_many_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(FakeError("disk full".into()));
    }
    for state in states {
      self.seed(state);
    }
    Ok(())
  }

  async fn list_all(&self) -> Result<Vec<SubscriptionState>, FakeError> {
    Ok(self.states.lock().unwrap().values().cloned().collect())
  }
}

// ─── Watchlist ───────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeWatchlist {
  pub entries: Arc<Mutex<BTreeSet<String>>>,
}

impl WatchlistRepository for FakeWatchlist {
  type Error = FakeError;

  async fn add(&self, identity: &str) -> Result<(), FakeError> {
    self.entries.lock().unwrap().insert(identity.to_owned());
    Ok(())
  }

  async fn remove(&self, identity: &str) -> Result<bool, FakeError> {
    Ok(self.entries.lock().unwrap().remove(identity))
  }

  async fn list(&self) -> Result<Vec<String>, FakeError> {
    Ok(self.entries.lock().unwrap().iter().cloned().collect())
  }

  async fn exists(&self, identity: &str) -> Result<bool, FakeError> {
    Ok(self.entries.lock().unwrap().contains(identity))
  }
}

// ─── Notifier ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  Change { identity: String, classification: Classification },
  Start,
  Stop,
  Report { lines: Vec<ReportLine>, checks: u64, errors: u64 },
  Message(String),
}

#[derive(Clone, Default)]
pub struct FakeNotifier {
  pub notices: Arc<Mutex<Vec<Notice>>>,
  pub failing: Arc<AtomicBool>,
}

impl FakeNotifier {
  pub fn failing() -> Self {
    let n = Self::default();
    n.failing.store(true, Ordering::SeqCst);
    n
  }

  pub fn notices(&self) -> Vec<Notice> { self.notices.lock().unwrap().clone() }

  fn record(&self, notice: Notice) -> Result<(), FakeError> {
    self.notices.lock().unwrap().push(notice);
    if self.failing.load(Ordering::SeqCst) {
      return Err(FakeError("telegram unreachable".into()));
    }
    Ok(())
  }
}

impl Notifier for FakeNotifier {
  type Error = FakeError;

  async fn notify_about_change(
    &self,
    status: &IdentityStatus,
    current: Classification,
  ) -> Result<(), FakeError> {
    self.record(Notice::Change { identity: status.identity.clone(), classification: current })
  }

  async fn notify_about_start(&self) -> Result<(), FakeError> { self.record(Notice::Start) }

  async fn notify_about_stop(&self) -> Result<(), FakeError> { self.record(Notice::Stop) }

  async fn notify_report(
    &self,
    lines: &[ReportLine],
    checks: u64,
    errors: u64,
  ) -> Result<(), FakeError> {
    self.record(Notice::Report { lines: lines.to_vec(), checks, errors })
  }

  async fn send_message(&self, text: &str, _options: MessageOptions) -> Result<(), FakeError> {
    self.record(Notice::Message(text.to_owned()))
  }
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// Record every event published on `bus`, in delivery order.
pub fn record_events(bus: &impl EventBus) -> Arc<Mutex<Vec<DomainEvent>>> {
  let log = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&log);
  bus.subscribe(
    Topic::All,
    handler(move |event| {
      let sink = Arc::clone(&sink);
      async move {
        sink.lock().unwrap().push(event);
        Ok(())
      }
    }),
  );
  log
}
