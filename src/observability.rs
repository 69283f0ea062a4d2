use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSIONS_STARTED: Counter = Counter::new("chatapp.session.started");
pub(crate) static SESSIONS_ENDED: Counter = Counter::new("chatapp.session.ended");
pub(crate) static SESSION_SUBMISSIONS: Counter = Counter::new("chatapp.session.submissions");
pub(crate) static SESSION_REFUSED_SUBMISSIONS: Counter =
    Counter::new("chatapp.session.refused_submissions");
pub(crate) static SESSION_STALE_DISCARDS: Counter = Counter::new("chatapp.session.stale_discards");
pub(crate) static SESSION_SUMMARIES: Counter = Counter::new("chatapp.session.summaries");

pub(crate) static COMPLETION_REQUESTS: Counter = Counter::new("chatapp.completion.requests");
pub(crate) static COMPLETION_ERRORS: Counter = Counter::new("chatapp.completion.errors");
pub(crate) static COMPLETION_DURATION: Moments =
    Moments::new("chatapp.completion.duration_seconds");

pub(crate) static TOKEN_SILENT: Counter = Counter::new("chatapp.token.silent");
pub(crate) static TOKEN_INTERACTIVE: Counter = Counter::new("chatapp.token.interactive");
pub(crate) static TOKEN_ERRORS: Counter = Counter::new("chatapp.token.errors");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSIONS_STARTED);
    collector.register_counter(&SESSIONS_ENDED);
    collector.register_counter(&SESSION_SUBMISSIONS);
    collector.register_counter(&SESSION_REFUSED_SUBMISSIONS);
    collector.register_counter(&SESSION_STALE_DISCARDS);
    collector.register_counter(&SESSION_SUMMARIES);

    collector.register_counter(&COMPLETION_REQUESTS);
    collector.register_counter(&COMPLETION_ERRORS);
    collector.register_moments(&COMPLETION_DURATION);

    collector.register_counter(&TOKEN_SILENT);
    collector.register_counter(&TOKEN_INTERACTIVE);
    collector.register_counter(&TOKEN_ERRORS);
}
