//! Fall alert notification dispatcher
//!
//! `notify_fall_event` fans one alert out into a message per emergency
//! contact (plus a high-urgency one to the family doctor) and queues them.
//! Two threads do the rest:
//!
//! - the delivery worker waits on the queue's condition variable and sends
//!   each message by SMS and email; a message is SENT when any channel
//!   succeeded, FAILED otherwise, and is never retried;
//! - the response poller periodically asks the transport for receipts and
//!   replies and advances the active entry of the matching alert.
//!
//! The active map holds one entry per `(user, person)` pair. It turns SENT as
//! soon as one message of the current alert went out and FAILED only when
//! every one of them failed. RESPONDED and FAILED entries are dropped once
//! they are older than the configured retention.

pub mod transport;
pub mod types;

pub use transport::{EventKind, LoggingTransport, MessageTransport, ResponseEvent};
pub use types::{ContactTarget, NotificationMessage, NotificationStatus, Urgency};

use crate::config::NotificationConfig;
use crate::error::{MonitorError, Result};
use crate::store::UserStore;
use crate::types::{FallEvent, PersonId, UserId};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::io;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Invoked for every alert that reaches RESPONDED
pub type ResponseCallback = Arc<dyn Fn(&NotificationMessage) + Send + Sync>;

type PairKey = (UserId, PersonId);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Latest state of one alert for a `(user, person)` pair
struct ActiveEntry {
    alert_seq: u64,
    /// Representative message, carrying the aggregated status
    latest: NotificationMessage,
    /// Every message of the alert with its own outcome
    messages: Vec<NotificationMessage>,
    outstanding: usize,
    any_sent: bool,
    /// When the aggregated status turned RESPONDED or FAILED
    completed_at: Option<Instant>,
}

struct Shared {
    store: Arc<dyn UserStore>,
    transport: Arc<dyn MessageTransport>,
    config: NotificationConfig,
    queue: Mutex<VecDeque<NotificationMessage>>,
    queue_cv: Condvar,
    active: Mutex<HashMap<PairKey, ActiveEntry>>,
    callbacks: Mutex<Vec<ResponseCallback>>,
    running: AtomicBool,
    next_alert_seq: AtomicU64,
}

#[derive(Default)]
struct Workers {
    delivery: Option<thread::JoinHandle<()>>,
    poller: Option<thread::JoinHandle<()>>,
    poll_shutdown_tx: Option<Sender<()>>,
}

pub struct NotificationDispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Workers>,
}

impl NotificationDispatcher {
    /// Create a dispatcher; no thread runs until [`start`](Self::start)
    pub fn new(
        store: Arc<dyn UserStore>,
        transport: Arc<dyn MessageTransport>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                transport,
                config,
                queue: Mutex::new(VecDeque::new()),
                queue_cv: Condvar::new(),
                active: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                next_alert_seq: AtomicU64::new(0),
            }),
            workers: Mutex::new(Workers::default()),
        }
    }

    /// Spawn the delivery worker and the response poller
    pub fn start(&self) -> Result<()> {
        let mut workers = lock(&self.workers);
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }

        if let Err(e) = self.spawn_workers(&mut workers) {
            log::error!("Could not start notification workers: {}", e);
            self.stop_workers(&mut workers);
            return Err(e.into());
        }

        log::info!(
            "Notification dispatcher started (response poll every {:.1}s)",
            self.shared.config.response_poll_interval_secs
        );
        Ok(())
    }

    fn spawn_workers(&self, workers: &mut Workers) -> io::Result<()> {
        workers.delivery = Some(spawn_delivery(&self.shared)?);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        workers.poller = Some(spawn_poller(&self.shared, shutdown_rx)?);
        workers.poll_shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Clear the running flag, wake both threads and join whichever exist
    ///
    /// Returns whether the dispatcher was running.
    fn stop_workers(&self, workers: &mut Workers) -> bool {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);

        {
            // taking the lock orders the flag store before the worker's next check
            let _queue = lock(&self.shared.queue);
            self.shared.queue_cv.notify_all();
        }
        if let Some(tx) = workers.poll_shutdown_tx.take() {
            let _ = tx.try_send(());
        }

        if let Some(handle) = workers.delivery.take() {
            if handle.join().is_err() {
                log::error!("Notification delivery thread panicked");
            }
        }
        if let Some(handle) = workers.poller.take() {
            if handle.join().is_err() {
                log::error!("Response polling thread panicked");
            }
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Queue one alert for every contact of `recipient_user_id`
    ///
    /// Returns the number of messages queued. Unknown users and users with
    /// nobody to contact are logged and skipped.
    pub fn notify_fall_event(&self, event: &FallEvent, recipient_user_id: UserId) -> usize {
        let Some(user) = self.shared.store.get_user_by_id(recipient_user_id) else {
            log::warn!("User not found: {}", recipient_user_id);
            return 0;
        };

        let alert_seq = self.shared.next_alert_seq.fetch_add(1, Ordering::SeqCst);
        let triggered_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let body = format!(
            "EMERGENCY ALERT: {} has fallen and may need assistance. \
             This alert was triggered at {}. \
             Please respond to this message to confirm you are taking action.",
            user.name, triggered_at
        );

        let mut messages: Vec<NotificationMessage> = (0..user.emergency_contacts.len())
            .map(|index| {
                NotificationMessage::new(
                    alert_seq,
                    recipient_user_id,
                    event.person_id,
                    ContactTarget::EmergencyContact(index),
                    Urgency::Normal,
                    body.clone(),
                )
            })
            .collect();
        if user.family_doctor.is_some() {
            messages.push(NotificationMessage::new(
                alert_seq,
                recipient_user_id,
                event.person_id,
                ContactTarget::FamilyDoctor,
                Urgency::High,
                format!("{} (Medical assistance may be required)", body),
            ));
        }

        if messages.is_empty() {
            log::warn!("User {} has no one to notify", recipient_user_id);
            return 0;
        }

        prune_completed(&self.shared, Instant::now());

        let count = messages.len();
        {
            let mut queue = lock(&self.shared.queue);
            let mut active = lock(&self.shared.active);
            active.insert(
                (recipient_user_id, event.person_id),
                ActiveEntry {
                    alert_seq,
                    latest: messages[0].clone(),
                    messages: messages.clone(),
                    outstanding: count,
                    any_sent: false,
                    completed_at: None,
                },
            );
            queue.extend(messages);
        }
        self.shared.queue_cv.notify_one();

        log::info!(
            "Queued {} notifications for user {} (person {})",
            count,
            recipient_user_id,
            event.person_id
        );
        count
    }

    pub fn has_response(&self, user_id: UserId, person_id: PersonId) -> bool {
        lock(&self.shared.active)
            .get(&(user_id, person_id))
            .map(|entry| entry.latest.status == NotificationStatus::Responded)
            .unwrap_or(false)
    }

    /// Aggregated state of the latest alert for the pair
    pub fn latest_status(
        &self,
        user_id: UserId,
        person_id: PersonId,
    ) -> Option<NotificationMessage> {
        lock(&self.shared.active)
            .get(&(user_id, person_id))
            .map(|entry| entry.latest.clone())
    }

    /// Per-contact messages of the latest alert for the pair
    pub fn alert_messages(&self, user_id: UserId, person_id: PersonId) -> Vec<NotificationMessage> {
        lock(&self.shared.active)
            .get(&(user_id, person_id))
            .map(|entry| entry.messages.clone())
            .unwrap_or_default()
    }

    pub fn queued_len(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Register a callback for alerts reaching RESPONDED
    ///
    /// Callbacks run on the polling thread in registration order.
    pub fn on_response<F>(&self, callback: F)
    where
        F: Fn(&NotificationMessage) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).push(Arc::new(callback));
    }

    /// Channel receiving a copy of every RESPONDED alert
    pub fn subscribe(&self) -> Receiver<NotificationMessage> {
        let (tx, rx) = channel::unbounded();
        self.on_response(move |message| {
            let _ = tx.send(message.clone());
        });
        rx
    }

    /// Run one response check immediately; returns the number of entries advanced
    pub fn poll_responses(&self) -> usize {
        process_responses(&self.shared)
    }

    /// Drop RESPONDED and FAILED alerts older than the retention
    ///
    /// Runs after every response check; returns the number of entries removed.
    pub fn prune_completed(&self) -> usize {
        prune_completed(&self.shared, Instant::now())
    }

    /// Stop both threads and hand back the messages that were never sent
    ///
    /// A send in progress completes; returned messages stay PENDING in the
    /// active map.
    pub fn shutdown(&self) -> Vec<NotificationMessage> {
        let mut workers = lock(&self.workers);
        let was_running = self.stop_workers(&mut workers);

        let unsent: Vec<NotificationMessage> = lock(&self.shared.queue).drain(..).collect();
        if was_running {
            log::info!(
                "Notification dispatcher stopped, {} messages left unsent",
                unsent.len()
            );
        }
        unsent
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_delivery(shared: &Arc<Shared>) -> io::Result<thread::JoinHandle<()>> {
    let shared = shared.clone();
    thread::Builder::new()
        .name("notification-delivery".to_string())
        .spawn(move || delivery_loop(&shared))
}

fn spawn_poller(
    shared: &Arc<Shared>,
    shutdown_rx: Receiver<()>,
) -> io::Result<thread::JoinHandle<()>> {
    let shared = shared.clone();
    thread::Builder::new()
        .name("notification-responses".to_string())
        .spawn(move || poll_loop(&shared, &shutdown_rx))
}

fn delivery_loop(shared: &Shared) {
    loop {
        let message = {
            let mut queue = lock(&shared.queue);
            loop {
                if !shared.running.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(message) = queue.pop_front() {
                    break message;
                }
                queue = shared
                    .queue_cv
                    .wait(queue)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };

        let sent = deliver(shared, &message);
        record_outcome(shared, message, sent);
    }
}

/// Send one message over every channel its contact has
fn deliver(shared: &Shared, message: &NotificationMessage) -> bool {
    // re-read so edits made after queuing are honoured
    let Some(user) = shared.store.get_user_by_id(message.recipient_user_id) else {
        log::warn!("User not found: {}", message.recipient_user_id);
        return false;
    };

    let (phone, email, subject) = match message.target {
        ContactTarget::EmergencyContact(index) => match user.emergency_contacts.get(index) {
            Some(contact) => (
                contact.phone_number().map(str::to_string),
                contact.email_address().map(str::to_string),
                &shared.config.email_subject,
            ),
            None => {
                log::warn!(
                    "User {} no longer has emergency contact #{}",
                    user.id,
                    index
                );
                return false;
            }
        },
        ContactTarget::FamilyDoctor => match user.family_doctor.as_ref() {
            Some(doctor) => (
                doctor.phone_number().map(str::to_string),
                doctor.email_address().map(str::to_string),
                &shared.config.doctor_email_subject,
            ),
            None => {
                log::warn!("User {} no longer has a family doctor", user.id);
                return false;
            }
        },
    };

    let mut sent = false;
    if let Some(phone) = phone {
        match shared.transport.send_sms(&phone, &message.body) {
            Ok(()) => sent = true,
            Err(e) => log::warn!("{}", e),
        }
    }
    if let Some(email) = email {
        match shared.transport.send_email(&email, subject, &message.body) {
            Ok(()) => sent = true,
            Err(e) => log::warn!("{}", e),
        }
    }

    if !sent {
        log::warn!(
            "Notification {:?} for user {} could not be sent",
            message.target,
            message.recipient_user_id
        );
    }
    sent
}

fn record_outcome(shared: &Shared, mut message: NotificationMessage, sent: bool) {
    let outcome = if sent {
        NotificationStatus::Sent
    } else {
        NotificationStatus::Failed
    };
    message.status.advance(outcome);

    let mut active = lock(&shared.active);
    let Some(entry) = active.get_mut(&message.key()) else {
        return;
    };
    if entry.alert_seq != message.alert_seq {
        // superseded by a newer alert for the same pair
        return;
    }

    if let Some(slot) = entry.messages.iter_mut().find(|m| m.target == message.target) {
        slot.status = message.status;
    }
    entry.outstanding = entry.outstanding.saturating_sub(1);

    if sent {
        entry.any_sent = true;
        if entry.latest.status.can_transition_to(NotificationStatus::Sent) {
            entry.latest = message;
        }
    } else if entry.outstanding == 0
        && !entry.any_sent
        && entry.latest.status.can_transition_to(NotificationStatus::Failed)
    {
        log::error!(
            "Every notification for user {} (person {}) failed",
            message.recipient_user_id,
            message.person_id
        );
        entry.latest = message;
        entry.completed_at = Some(Instant::now());
    }
}

fn poll_loop(shared: &Shared, shutdown_rx: &Receiver<()>) {
    let interval = shared.config.response_poll_interval();
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        process_responses(shared);
        prune_completed(shared, Instant::now());
    }
}

fn prune_completed(shared: &Shared, now: Instant) -> usize {
    let retention = shared.config.completed_retention();
    let mut active = lock(&shared.active);
    let before = active.len();
    active.retain(|_, entry| {
        entry
            .completed_at
            .map_or(true, |at| now.saturating_duration_since(at) < retention)
    });
    let removed = before - active.len();
    if removed > 0 {
        log::debug!("Pruned {} completed alerts", removed);
    }
    removed
}

fn process_responses(shared: &Shared) -> usize {
    let events = match shared.transport.check_responses() {
        Ok(events) => events,
        Err(e) => {
            log::warn!("{}", e);
            return 0;
        }
    };

    let mut advanced = 0;
    for event in events {
        let responded = {
            let mut active = lock(&shared.active);
            let Some(entry) = active.get_mut(&(event.user_id, event.person_id)) else {
                log::debug!(
                    "Response for unknown alert (user {}, person {})",
                    event.user_id,
                    event.person_id
                );
                continue;
            };
            if !entry.latest.status.awaits_response() {
                continue;
            }

            let next = match &event.kind {
                EventKind::Delivered => NotificationStatus::Delivered,
                EventKind::Read => NotificationStatus::Read,
                EventKind::Replied { .. } => NotificationStatus::Responded,
            };
            if !entry.latest.status.advance(next) {
                continue;
            }
            advanced += 1;

            if let EventKind::Replied { body } = event.kind {
                entry.latest.response_body = Some(body);
                entry.latest.responded_at = Some(SystemTime::now());
                entry.completed_at = Some(Instant::now());
                Some(entry.latest.clone())
            } else {
                None
            }
        };

        if let Some(message) = responded {
            log::info!(
                "Response received for user {}, person {}: {}",
                message.recipient_user_id,
                message.person_id,
                message.response_body.as_deref().unwrap_or("")
            );
            let callbacks: Vec<ResponseCallback> = lock(&shared.callbacks).clone();
            for callback in callbacks {
                callback(&message);
            }
        }
    }
    advanced
}
