use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSION_CONNECTS: Counter = Counter::new("teebot.session.connects");
pub(crate) static SESSION_ERRORS: Counter = Counter::new("teebot.session.errors");
pub(crate) static SESSION_DISCONNECTS: Counter = Counter::new("teebot.session.disconnects");
pub(crate) static SESSION_RECONNECTS_SCHEDULED: Counter =
    Counter::new("teebot.session.reconnects_scheduled");
pub(crate) static SESSION_EXHAUSTED: Counter = Counter::new("teebot.session.exhausted");

pub(crate) static DISPATCH_INBOUND: Counter = Counter::new("teebot.dispatch.inbound");
pub(crate) static DISPATCH_IGNORED: Counter = Counter::new("teebot.dispatch.ignored");
pub(crate) static DISPATCH_REPLIES: Counter = Counter::new("teebot.dispatch.replies");
pub(crate) static DISPATCH_SEND_ERRORS: Counter = Counter::new("teebot.dispatch.send_errors");

pub(crate) static GENERATOR_REQUESTS: Counter = Counter::new("teebot.generator.requests");
pub(crate) static GENERATOR_FILTERED: Counter = Counter::new("teebot.generator.filtered");
pub(crate) static GENERATOR_FAILURES: Counter = Counter::new("teebot.generator.failures");
pub(crate) static GENERATOR_DURATION: Moments =
    Moments::new("teebot.generator.request_duration_seconds");

pub(crate) static BROADCAST_SENDS: Counter = Counter::new("teebot.broadcast.sends");
pub(crate) static BROADCAST_FAILURES: Counter = Counter::new("teebot.broadcast.failures");

pub(crate) static MESSAGES_SENT: Counter = Counter::new("teebot.messages.sent");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSION_CONNECTS);
    collector.register_counter(&SESSION_ERRORS);
    collector.register_counter(&SESSION_DISCONNECTS);
    collector.register_counter(&SESSION_RECONNECTS_SCHEDULED);
    collector.register_counter(&SESSION_EXHAUSTED);

    collector.register_counter(&DISPATCH_INBOUND);
    collector.register_counter(&DISPATCH_IGNORED);
    collector.register_counter(&DISPATCH_REPLIES);
    collector.register_counter(&DISPATCH_SEND_ERRORS);

    collector.register_counter(&GENERATOR_REQUESTS);
    collector.register_counter(&GENERATOR_FILTERED);
    collector.register_counter(&GENERATOR_FAILURES);
    collector.register_moments(&GENERATOR_DURATION);

    collector.register_counter(&BROADCAST_SENDS);
    collector.register_counter(&BROADCAST_FAILURES);

    collector.register_counter(&MESSAGES_SENT);
}
