//! Idle scheduling
//!
//! Background work that should not compete with interactive work first hands
//! control back to the host. Hosts with a real idle facility implement
//! [`IdleScheduler`]; everyone else gets a zero-delay deferral.

use async_trait::async_trait;
use std::time::Duration;

/// Host facility that resolves once the host is idle.
#[async_trait]
pub trait IdleScheduler: Send + Sync {
    /// Wait until the host has spare time.
    async fn wait_idle(&self);
}

/// Zero-delay deferral: yields once to the runtime and resumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct YieldNow;

#[async_trait]
impl IdleScheduler for YieldNow {
    async fn wait_idle(&self) {
        tokio::task::yield_now().await;
    }
}

/// Idle approximation by a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct DelayIdle {
    delay: Duration,
}

impl DelayIdle {
    /// Resume `delay` after being asked to wait
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl IdleScheduler for DelayIdle {
    async fn wait_idle(&self) {
        tokio::time::sleep(self.delay).await;
    }
}
