//! Background dictionary loading.
//!
//! Load requests are queued to a single dispatcher thread and handled one at
//! a time. Each request carries a planner that runs on the dispatcher when
//! the request's turn comes, so it sees every load finished by earlier
//! requests and never schedules a set twice. The planned units fan out over a
//! bounded group of scoped workers; the request completes when the group
//! joins, and exactly one `Completed` notification is sent for it before the
//! next request is planned.
//!
//! Notifications travel over a channel that the host's UI thread drains with
//! [`LoadScheduler::poll_notifications`]; nothing ever calls back into the
//! host from a worker.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use lm_core::variant::LocaleVariant;
use tracing::{debug, info, warn};

pub type Ticket = u64;

type UnitFn = Box<dyn FnOnce() -> Result<(), String> + Send>;
type Planner = Box<dyn FnOnce() -> Vec<LoadUnit> + Send>;

/// One independently loadable resource.
pub struct LoadUnit {
    pub label: String,
    /// Worth telling the user about (the large core tables).
    pub headline: bool,
    run: UnitFn,
}

impl LoadUnit {
    pub fn new(
        label: impl Into<String>,
        headline: bool,
        run: impl FnOnce() -> Result<(), String> + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            headline,
            run: Box::new(run),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadNotification {
    /// Sent only for announced requests that scheduled a headline unit.
    Started { ticket: Ticket, units: usize },
    /// Sent once per request after all of its units finished.
    Completed {
        ticket: Ticket,
        units: usize,
        failures: Vec<UnitFailure>,
        /// Whether the host should surface this completion to the user.
        announce: bool,
    },
}

impl LoadNotification {
    pub fn ticket(&self) -> Ticket {
        match self {
            LoadNotification::Started { ticket, .. } | LoadNotification::Completed { ticket, .. } => {
                *ticket
            }
        }
    }
}

struct LoadRequest {
    ticket: Ticket,
    notify: bool,
    variants: Vec<LocaleVariant>,
    plan: Planner,
}

/// Requests queued or running, per concrete variant.
type InFlight = Arc<[AtomicUsize; 2]>;

pub struct LoadScheduler {
    tx: mpsc::Sender<LoadRequest>,
    rx: Mutex<mpsc::Receiver<LoadNotification>>,
    /// Notifications read by `wait_completion` on behalf of other tickets.
    backlog: Mutex<VecDeque<LoadNotification>>,
    next_ticket: AtomicU64,
    in_flight: InFlight,
}

impl LoadScheduler {
    pub fn new(workers: usize) -> Self {
        let (tx, work_rx) = mpsc::channel::<LoadRequest>();
        let (note_tx, rx) = mpsc::channel::<LoadNotification>();
        let in_flight: InFlight = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
        {
            let in_flight = Arc::clone(&in_flight);
            let workers = workers.max(1);
            thread::Builder::new()
                .name("lm-load-dispatch".into())
                .spawn(move || dispatcher(work_rx, note_tx, workers, in_flight))
                .expect("failed to spawn load dispatcher");
        }
        Self {
            tx,
            rx: Mutex::new(rx),
            backlog: Mutex::new(VecDeque::new()),
            next_ticket: AtomicU64::new(1),
            in_flight,
        }
    }

    /// Queue a request. Returns immediately with its ticket.
    pub fn submit(
        &self,
        variants: &[LocaleVariant],
        notify: bool,
        plan: impl FnOnce() -> Vec<LoadUnit> + Send + 'static,
    ) -> Ticket {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let variants: Vec<LocaleVariant> = variants.iter().copied().filter(|v| v.is_concrete()).collect();
        for v in &variants {
            if let Some(i) = v.index() {
                self.in_flight[i].fetch_add(1, Ordering::SeqCst);
            }
        }
        let request = LoadRequest {
            ticket,
            notify,
            variants,
            plan: Box::new(plan),
        };
        if let Err(mpsc::SendError(request)) = self.tx.send(request) {
            warn!(ticket, "load dispatcher gone, dropping request");
            release(&self.in_flight, &request.variants);
        }
        ticket
    }

    /// Whether any queued or running request covers `variant`.
    pub fn is_loading(&self, variant: LocaleVariant) -> bool {
        variant
            .index()
            .is_some_and(|i| self.in_flight[i].load(Ordering::SeqCst) > 0)
    }

    /// Drain pending notifications without blocking.
    pub fn poll_notifications(&self) -> Vec<LoadNotification> {
        let mut out: Vec<LoadNotification> = self.backlog.lock().unwrap().drain(..).collect();
        if let Ok(rx) = self.rx.lock() {
            while let Ok(note) = rx.try_recv() {
                out.push(note);
            }
        }
        out
    }

    /// Block up to `timeout` for the completion of `ticket`.
    ///
    /// Other notifications read meanwhile stay queued for
    /// `poll_notifications`.
    pub fn wait_completion(&self, ticket: Ticket, timeout: Duration) -> Option<LoadNotification> {
        let is_match = |n: &LoadNotification| {
            matches!(n, LoadNotification::Completed { ticket: t, .. } if *t == ticket)
        };
        {
            let mut backlog = self.backlog.lock().unwrap();
            if let Some(pos) = backlog.iter().position(is_match) {
                return backlog.remove(pos);
            }
        }
        let deadline = Instant::now() + timeout;
        let rx = self.rx.lock().ok()?;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(note) if is_match(&note) => return Some(note),
                Ok(note) => self.backlog.lock().unwrap().push_back(note),
                Err(_) => return None,
            }
        }
    }
}

fn release(in_flight: &InFlight, variants: &[LocaleVariant]) {
    for v in variants {
        if let Some(i) = v.index() {
            in_flight[i].fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn dispatcher(
    rx: mpsc::Receiver<LoadRequest>,
    tx: mpsc::Sender<LoadNotification>,
    workers: usize,
    in_flight: InFlight,
) {
    while let Ok(req) = rx.recv() {
        let ticket = req.ticket;
        let units = match catch_unwind(AssertUnwindSafe(req.plan)) {
            Ok(units) => units,
            Err(_) => {
                warn!(ticket, "load planner panicked");
                Vec::new()
            }
        };
        let count = units.len();
        let announce = req.notify && units.iter().any(|u| u.headline);
        if announce {
            let _ = tx.send(LoadNotification::Started {
                ticket,
                units: count,
            });
        }
        debug!(ticket, units = count, "load request started");

        let failures = run_units(units, workers);

        release(&in_flight, &req.variants);
        if failures.is_empty() {
            info!(ticket, units = count, "load request complete");
        } else {
            warn!(ticket, units = count, failed = failures.len(), "load request complete with failures");
        }
        let _ = tx.send(LoadNotification::Completed {
            ticket,
            units: count,
            failures,
            announce,
        });
    }
    debug!("load dispatcher exiting");
}

/// Run `units` on up to `workers` scoped threads and join them all.
fn run_units(units: Vec<LoadUnit>, workers: usize) -> Vec<UnitFailure> {
    if units.is_empty() {
        return Vec::new();
    }
    let threads = workers.min(units.len());
    let queue = Mutex::new(VecDeque::from(units));
    let failures = Mutex::new(Vec::new());

    let work = || loop {
        let Some(unit) = queue.lock().unwrap().pop_front() else {
            break;
        };
        run_one(unit, &failures);
    };

    thread::scope(|s| {
        for i in 0..threads {
            if let Err(e) = thread::Builder::new()
                .name(format!("lm-load-{i}"))
                .spawn_scoped(s, work)
            {
                warn!(error = %e, "failed to spawn load worker");
            }
        }
    });
    // Anything left over had no worker to run it.
    work();

    failures.into_inner().unwrap()
}

fn run_one(unit: LoadUnit, failures: &Mutex<Vec<UnitFailure>>) {
    let label = unit.label;
    let reason = match catch_unwind(AssertUnwindSafe(unit.run)) {
        Ok(Ok(())) => {
            debug!(unit = %label, "load unit finished");
            return;
        }
        Ok(Err(reason)) => reason,
        Err(_) => "load unit panicked".to_string(),
    };
    warn!(unit = %label, %reason, "load unit failed");
    failures.lock().unwrap().push(UnitFailure { label, reason });
}
