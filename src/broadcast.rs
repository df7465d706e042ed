//! Operator broadcasts.

use crate::address::Endpoint;
use crate::context::BotContext;
use crate::error::Error;
use crate::observability::{BROADCAST_FAILURES, BROADCAST_SENDS};
use crate::session::Roster;

/// A send that failed during a broadcast.
#[derive(Clone, Debug)]
pub struct BroadcastFailure {
    /// The server that rejected the line.
    pub endpoint: Endpoint,
    /// Why.
    pub error: Error,
}

/// Result of one broadcast.
#[derive(Clone, Debug, Default)]
pub struct BroadcastReport {
    /// Sessions a send was attempted on.
    pub attempted: usize,
    /// Sessions that accepted the line.
    pub delivered: usize,
    /// Sessions that did not.
    pub failures: Vec<BroadcastFailure>,
}

/// Sends one line to every connected session, one at a time.
///
/// Sessions are visited in registration order with the configured inter-send
/// delay between consecutive sends.  A failed send is logged and the walk goes
/// on.
#[derive(Clone)]
pub struct BroadcastCoordinator {
    roster: Roster,
    ctx: BotContext,
}

impl BroadcastCoordinator {
    /// Creates a coordinator over `roster`.
    pub fn new(roster: Roster, ctx: BotContext) -> Self {
        Self { roster, ctx }
    }

    /// Sends `text` everywhere it can.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use teebot::{BotContext, BroadcastCoordinator, PlainTextRenderer, Settings};
    /// # tokio_test::block_on(async {
    /// let ctx = BotContext::new(Settings::default(), Arc::new(PlainTextRenderer::new()));
    /// let coordinator = BroadcastCoordinator::new(Vec::new().into(), ctx);
    /// let report = coordinator.broadcast("anyone there?").await;
    /// assert_eq!(report.attempted, 0);
    /// # });
    /// ```
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let delay = self.ctx.settings.inter_send_delay();
        for session in self.roster.iter() {
            if !session.is_broadcast_target() {
                continue;
            }
            if report.attempted > 0 {
                tokio::time::sleep(delay).await;
            }
            report.attempted += 1;
            match session.send(text).await {
                Ok(()) => {
                    BROADCAST_SENDS.click();
                    self.ctx.stats.record_sent();
                    report.delivered += 1;
                    self.ctx
                        .renderer
                        .print_success(&format!("Sent to {}: {text}", session.endpoint()));
                }
                Err(error) => {
                    BROADCAST_FAILURES.click();
                    self.ctx.renderer.print_error(&format!(
                        "Broadcast to {} failed: {error}",
                        session.endpoint()
                    ));
                    report.failures.push(BroadcastFailure {
                        endpoint: session.endpoint().clone(),
                        error,
                    });
                }
            }
        }
        report
    }
}
