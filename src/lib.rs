// Public modules
pub mod activity;
pub mod address;
pub mod broadcast;
pub mod client;
pub mod console;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod render;
pub mod session;
pub mod settings;
pub mod stats;
pub mod transport;
pub mod utils;

mod observability;

#[cfg(test)]
mod testing;

// Re-exports
pub use address::{AddressBook, Endpoint};
pub use broadcast::{BroadcastCoordinator, BroadcastReport};
pub use client::{ChatCompletions, Completer, CompletionRequest};
pub use context::BotContext;
pub use dispatch::{DispatchOutcome, DispatchPipeline};
pub use error::{Error, Result};
pub use generator::ResponseGenerator;
pub use observability::register_biometrics;
pub use render::{PlainTextRenderer, Renderer};
pub use session::{ConnectionState, Session, SessionManager, ShutdownReport};
pub use settings::{BotArgs, Settings};
pub use stats::{Stats, StatsSnapshot};
pub use transport::{Connector, InboundChatEvent, LineConnector, Scope, Transport, TransportEvent};
