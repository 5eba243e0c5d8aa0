//! Per-user subscription sessions.
//!
//! A session keeps one user's subscription state fresh while they are signed
//! in: it syncs once on start, then re-syncs on a fixed interval in a
//! background task. The latest state is published through a `watch` channel.
//! Refresh failures publish the free tier.
//!
//! Sessions that nobody has read for the idle timeout stop refreshing and
//! remove themselves from the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tenant_credits_core::UserId;

use crate::sync::{SubscriptionState, SubscriptionSync};

type SessionMap = Arc<Mutex<HashMap<UserId, SubscriptionSession>>>;

/// When a session was last read.
#[derive(Clone)]
struct LastSeen(Arc<std::sync::Mutex<Instant>>);

impl LastSeen {
    fn now() -> Self {
        Self(Arc::new(std::sync::Mutex::new(Instant::now())))
    }

    fn touch(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }
}

/// A running refresh loop for one user.
///
/// Dropping the session stops the loop.
pub struct SubscriptionSession {
    receiver: watch::Receiver<SubscriptionState>,
    task: JoinHandle<()>,
    generation: u64,
    last_seen: LastSeen,
}

impl SubscriptionSession {
    /// Latest published state. Counts as activity.
    #[must_use]
    pub fn snapshot(&self) -> SubscriptionState {
        self.last_seen.touch();
        self.receiver.borrow().clone()
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns the sessions of all signed-in users.
pub struct SessionRegistry {
    sync: Arc<SubscriptionSync>,
    refresh_interval: Duration,
    idle_timeout: Duration,
    sessions: SessionMap,
    generations: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        sync: Arc<SubscriptionSync>,
        refresh_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sync,
            refresh_interval,
            idle_timeout,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Start (or restart) the user's session and return the state of the
    /// initial sync.
    pub async fn start(&self, user_id: UserId, email: Option<String>) -> SubscriptionState {
        let initial = refresh(&self.sync, &user_id, email.as_deref()).await;
        let (sender, receiver) = watch::channel(initial.clone());
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let last_seen = LastSeen::now();

        // Hold the map lock until the session is inserted, so a loop that
        // expires immediately still finds its own entry.
        let mut sessions = self.sessions.lock().await;
        let task = tokio::spawn(refresh_loop(
            RefreshContext {
                sync: self.sync.clone(),
                sessions: self.sessions.clone(),
                user_id,
                email,
                generation,
                last_seen: last_seen.clone(),
                every: self.refresh_interval,
                idle_timeout: self.idle_timeout,
            },
            sender,
        ));
        let previous = sessions.insert(
            user_id,
            SubscriptionSession {
                receiver,
                task,
                generation,
                last_seen,
            },
        );
        drop(sessions);

        tracing::info!(
            user_id = %user_id,
            restarted = previous.is_some(),
            subscribed = initial.subscribed,
            "Subscription session started"
        );

        initial
    }

    /// Stop the user's session. Returns whether one was running.
    pub async fn stop(&self, user_id: &UserId) -> bool {
        let removed = self.sessions.lock().await.remove(user_id);
        if removed.is_some() {
            tracing::info!(user_id = %user_id, "Subscription session stopped");
        }
        removed.is_some()
    }

    /// Latest state of the user's session, if one is running.
    pub async fn snapshot(&self, user_id: &UserId) -> Option<SubscriptionState> {
        self.sessions
            .lock()
            .await
            .get(user_id)
            .map(SubscriptionSession::snapshot)
    }

    /// Number of running sessions.
    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

async fn refresh(
    sync: &SubscriptionSync,
    user_id: &UserId,
    email: Option<&str>,
) -> SubscriptionState {
    match sync.check_and_sync(user_id, email).await {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Subscription refresh failed, falling back to free tier"
            );
            SubscriptionState::free()
        }
    }
}

struct RefreshContext {
    sync: Arc<SubscriptionSync>,
    sessions: SessionMap,
    user_id: UserId,
    email: Option<String>,
    generation: u64,
    last_seen: LastSeen,
    every: Duration,
    idle_timeout: Duration,
}

async fn refresh_loop(ctx: RefreshContext, sender: watch::Sender<SubscriptionState>) {
    let mut ticker = tokio::time::interval(ctx.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; start() already synced
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if ctx.last_seen.idle_for() >= ctx.idle_timeout {
            break;
        }
        let state = refresh(&ctx.sync, &ctx.user_id, ctx.email.as_deref()).await;
        sender.send_replace(state);
    }

    // A restart may have replaced this session; only remove our own entry.
    let mut sessions = ctx.sessions.lock().await;
    if sessions
        .get(&ctx.user_id)
        .is_some_and(|s| s.generation == ctx.generation)
    {
        tracing::info!(
            user_id = %ctx.user_id,
            idle_secs = ctx.idle_timeout.as_secs(),
            "Subscription session expired"
        );
        // Dropping the entry aborts this task, which is about to finish anyway
        let expired = sessions.remove(&ctx.user_id);
        drop(sessions);
        drop(expired);
    }
}
