//! Foreground policy
//!
//! Maps a coarse foreground/background signal onto the interest set of the
//! default subscriber (the notification observer). While the host is in the
//! background only the configured minimal set is pulled.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tv_core::config::ForegroundConfig;
use tv_core::traits::Observer;
use tv_core::{KindSet, ObserverId};

use crate::events::EventMultiplexer;

/// Host visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Foreground,
    Background,
}

impl From<bool> for Visibility {
    fn from(foreground: bool) -> Self {
        if foreground {
            Visibility::Foreground
        } else {
            Visibility::Background
        }
    }
}

/// Re-registers the default subscriber when visibility changes
pub struct ForegroundPolicy {
    events: Arc<EventMultiplexer>,
    observer_id: ObserverId,
    observer: Arc<dyn Observer>,
    config: ForegroundConfig,
}

impl ForegroundPolicy {
    pub fn new(
        events: Arc<EventMultiplexer>,
        observer: Arc<dyn Observer>,
        config: ForegroundConfig,
    ) -> Self {
        Self {
            events,
            observer_id: ObserverId::new(),
            observer,
            config,
        }
    }

    /// Id the default subscriber is registered under
    pub fn observer_id(&self) -> ObserverId {
        self.observer_id
    }

    /// Interest set for `visibility`
    pub fn kinds_for(&self, visibility: Visibility) -> KindSet {
        match visibility {
            Visibility::Foreground => self.config.foreground,
            Visibility::Background => self.config.background,
        }
    }

    /// Register the default subscriber with the set for `visibility`
    pub fn apply(&self, visibility: Visibility) {
        let kinds = self.kinds_for(visibility);
        tracing::debug!(?visibility, ?kinds, "Applying foreground policy");
        self.events
            .register_observer(self.observer_id, Arc::clone(&self.observer), kinds);
    }

    /// Drop the default subscriber
    pub fn release(&self) {
        self.events.unregister_observer(self.observer_id);
    }

    /// Apply every signal from `signals` until it closes or `cancel` fires
    pub fn follow(
        self: &Arc<Self>,
        mut signals: mpsc::Receiver<Visibility>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let policy = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    signal = signals.recv() => match signal {
                        Some(visibility) => policy.apply(visibility),
                        None => break,
                    },
                }
            }
            tracing::debug!("Visibility source detached");
        })
    }
}
