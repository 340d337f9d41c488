//! Idle monitor: self-terminates a task list nobody is using.
//!
//! A periodic timer evaluates an idleness predicate supplied by the
//! manager (no recent task, no pollers, empty buffer); when it holds, a
//! one-shot callback fires and the monitor exits. There is no separate
//! idle counter to desynchronize - the predicate reads the same state the
//! data path updates.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub struct Liveness {
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Liveness {
    pub fn spawn(
        interval: Duration,
        is_idle: impl Fn() -> bool + Send + 'static,
        on_idle: impl FnOnce() + Send + 'static,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately, skip it
            let mut on_idle = Some(on_idle);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if is_idle() {
                            debug!("task list idle, triggering shutdown");
                            if let Some(on_idle) = on_idle.take() {
                                on_idle();
                            }
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        Self {
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the monitor without firing the idle callback. Idempotent; the
    /// first call yields the loop handle so callers can await its exit.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let _ = self.shutdown_tx.send(true);
        self.handle.lock().expect("liveness handle poisoned").take()
    }
}
