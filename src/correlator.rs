//! Shared contract of the per-protocol correlators.

/// Intra-protocol correlator: groups a stream of parsed messages into
/// sessions and answers typed queries about them.
///
/// `add_message` is safe to call concurrently from multiple decoder threads;
/// each implementation serialises access to its session store with its own
/// mutex. `finalize` is called exactly once after ingestion is done: it
/// computes derived per-session state (classification, metrics) and pushes
/// discovered identifiers into the subscriber context manager.
pub trait Correlator {
    /// The typed message this correlator ingests.
    type Message;

    /// Ingests one parsed message. Unusable messages are counted and
    /// skipped, never propagated as errors.
    fn add_message(&self, msg: Self::Message);

    /// Finishes all sessions. Called once, after the last `add_message`.
    fn finalize(&self);
}
