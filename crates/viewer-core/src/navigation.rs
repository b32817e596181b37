//! Anchor navigation
//!
//! A [`NavigationTarget`] names a page and a vertical position inside it. It
//! is resolved into a scroll offset against whatever geometry exists at the
//! time, and retried with escalating delays until the target page has
//! actually been rendered or the retry budget runs out.

use crate::config::EngineConfig;
use pageflow_scheduler::{Generation, GenerationCounter};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Logical navigation anchor, independent of pixel geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NavigationTarget {
    /// 1-based page number
    pub page_no: u32,
    /// Vertical position inside the page, 0.0 (top) to 1.0 (bottom)
    pub y_ratio: f32,
}

impl NavigationTarget {
    /// Build a target, forcing the page to at least 1 and the ratio into [0, 1].
    pub fn new(page_no: u32, y_ratio: f32) -> Self {
        let y_ratio = if y_ratio.is_finite() {
            y_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            page_no: page_no.max(1),
            y_ratio,
        }
    }
}

impl fmt::Display for NavigationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_no, self.y_ratio)
    }
}

/// Error parsing a `PAGE:RATIO` target
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid navigation target '{0}', expected PAGE or PAGE:RATIO")]
pub struct ParseTargetError(String);

impl FromStr for NavigationTarget {
    type Err = ParseTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTargetError(s.to_string());
        let (page, ratio) = match s.split_once(':') {
            Some((page, ratio)) => (page, ratio.trim().parse::<f32>().map_err(|_| err())?),
            None => (s, 0.0),
        };
        let page = page.trim().parse::<u32>().map_err(|_| err())?;
        if page == 0 {
            return Err(err());
        }
        Ok(Self::new(page, ratio))
    }
}

/// Height to resolve a target against: the rendered height when it passes
/// the sanity threshold, then the measured height, then the estimate.
pub fn pick_height(rendered: Option<f32>, measured: Option<f32>, estimate: f32, min_rendered: f32) -> f32 {
    rendered
        .filter(|height| *height > min_rendered)
        .or(measured)
        .unwrap_or(estimate)
}

/// Scroll offset placing `y_ratio` of a page at `offset_factor` of the
/// container height.
pub fn resolve_offset(
    top: f32,
    height: f32,
    y_ratio: f32,
    container_height: f32,
    offset_factor: f32,
) -> f32 {
    (top + height * y_ratio.clamp(0.0, 1.0) - container_height * offset_factor).max(0.0)
}

/// Result of one resolution attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attempt {
    /// The container was scrolled to `offset`
    Scrolled { offset: f32, rendered: bool },
    /// The container or the target placeholder does not exist yet
    NotReady,
}

/// The part of the viewer navigation drives.
pub trait NavigationHost: Send + Sync {
    /// Resolve `target` against the current geometry and scroll to it.
    fn try_scroll(&self, target: &NavigationTarget) -> Attempt;

    /// Force `page` into the mounted window.
    fn force_mount(&self, page: u32);

    /// Called once a navigation ends without being superseded.
    fn finished(&self, _target: &NavigationTarget, _outcome: &NavigationOutcome) {}
}

/// How a navigation ended
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NavigationOutcome {
    /// Scrolled with the page rendered
    Converged { page_no: u32, attempts: u32, offset: f32 },
    /// Scrolled, but the page never reported a rendered height
    Unrendered { page_no: u32, attempts: u32, offset: f32 },
    /// The target never became resolvable
    GaveUp { page_no: u32, attempts: u32 },
    /// A newer navigation took over
    Superseded { page_no: u32 },
}

#[derive(Debug, Clone, Copy)]
struct RetryDelays {
    base: Duration,
    step: Duration,
}

impl RetryDelays {
    fn delay(&self, retry: u32) -> Duration {
        self.base.saturating_add(self.step.saturating_mul(retry))
    }
}

async fn run_navigation(
    host: Arc<dyn NavigationHost>,
    target: NavigationTarget,
    attempts: u32,
    generation: Generation,
    delays: RetryDelays,
) -> NavigationOutcome {
    let page_no = target.page_no;
    let mut scrolled_to = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(delays.delay(attempt - 1)).await;
        }
        if !generation.is_current() {
            debug!(page_no, attempt, "navigation superseded");
            return NavigationOutcome::Superseded { page_no };
        }

        match host.try_scroll(&target) {
            Attempt::Scrolled { offset, rendered: true } => {
                info!(page_no, attempt, offset, "navigation converged");
                return NavigationOutcome::Converged {
                    page_no,
                    attempts: attempt + 1,
                    offset,
                };
            }
            Attempt::Scrolled { offset, rendered: false } => {
                debug!(page_no, attempt, offset, "scrolled to placeholder, waiting for render");
                scrolled_to = Some(offset);
            }
            Attempt::NotReady => {
                debug!(page_no, attempt, "target not ready, forcing mount");
                host.force_mount(page_no);
            }
        }
    }

    debug!(page_no, attempts, "navigation retries exhausted");
    match scrolled_to {
        Some(offset) => NavigationOutcome::Unrendered {
            page_no,
            attempts,
            offset,
        },
        None => NavigationOutcome::GaveUp { page_no, attempts },
    }
}

/// Schedules and supersedes navigations.
pub struct NavigationController {
    navigations: GenerationCounter,
    delays: RetryDelays,
    running: Mutex<Option<JoinHandle<NavigationOutcome>>>,
    last_outcome: Arc<Mutex<Option<NavigationOutcome>>>,
}

impl NavigationController {
    pub fn new(navigations: GenerationCounter, config: &EngineConfig) -> Self {
        Self {
            navigations,
            delays: RetryDelays {
                base: Duration::from_millis(config.nav_base_delay_ms),
                step: Duration::from_millis(config.nav_delay_step_ms),
            },
            running: Mutex::new(None),
            last_outcome: Arc::new(Mutex::new(None)),
        }
    }

    /// Navigate to `target`, superseding any pending navigation.
    ///
    /// The first attempt runs immediately; the remaining `max_retries - 1`
    /// follow with escalating delays.
    pub fn schedule_navigate(
        &self,
        host: Arc<dyn NavigationHost>,
        target: NavigationTarget,
        max_retries: u32,
    ) -> Generation {
        let generation = self.navigations.bump();
        debug!(%target, generation = generation.value(), "navigation scheduled");

        let last_outcome = self.last_outcome.clone();
        let delays = self.delays;
        let task_generation = generation.clone();
        let task = tokio::spawn(async move {
            let outcome = run_navigation(
                host.clone(),
                target,
                max_retries.max(1),
                task_generation.clone(),
                delays,
            )
            .await;
            if !matches!(outcome, NavigationOutcome::Superseded { .. }) {
                *last_outcome.lock() = Some(outcome);
                if task_generation.is_current() {
                    host.finished(&target, &outcome);
                }
            }
            outcome
        });
        *self.running.lock() = Some(task);
        generation
    }

    /// Drop the pending navigation
    pub fn cancel(&self) {
        self.navigations.bump();
    }

    /// Wait for the most recently scheduled navigation to end.
    pub async fn settle(&self) -> Option<NavigationOutcome> {
        let task = self.running.lock().take()?;
        task.await.ok()
    }

    /// Outcome of the last navigation that was not superseded
    pub fn last_outcome(&self) -> Option<NavigationOutcome> {
        *self.last_outcome.lock()
    }

    /// Forget the last outcome
    pub fn clear(&self) {
        *self.last_outcome.lock() = None;
    }
}
