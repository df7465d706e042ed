use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::render::Renderer;
use crate::settings::Settings;
use crate::stats::Stats;

/// State shared by the session manager, dispatch pipeline, and broadcast
/// coordinator.
#[derive(Clone)]
pub struct BotContext {
    /// Read-only settings.
    pub settings: Arc<Settings>,
    /// Process-wide counters.
    pub stats: Arc<Stats>,
    /// Operator console.
    pub renderer: Arc<dyn Renderer>,
    /// Cancelled once shutdown begins.
    pub shutdown: CancellationToken,
}

impl BotContext {
    /// Creates a context with fresh stats and an uncancelled shutdown token.
    pub fn new(settings: Settings, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            settings: Arc::new(settings),
            stats: Arc::new(Stats::new()),
            renderer,
            shutdown: CancellationToken::new(),
        }
    }

    /// True once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
