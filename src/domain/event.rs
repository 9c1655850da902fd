/// Events the Pipeline dispatches to the host, one per Session lifecycle step.
///
/// Within a Session, `Partial` events are delivered strictly in the order
/// received from the recognizer, followed by at most one `Final`. Across a
/// reconnect boundary the `Final` of one Session precedes any `Partial` of
/// the next.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `confirmed` is the append-only confirmed prefix; `stash` is the
    /// still-mutable unconfirmed tail. `confirmed || stash` is always the
    /// best current transcription estimate.
    Partial { confirmed: String, stash: String },

    /// A terminal hypothesis closing a Session, already run through the
    /// Enhancer if one is configured and it succeeded.
    Final { text: String },

    /// An unrecoverable failure; the Pipeline is guaranteed to be `Idle`
    /// by the time this is dispatched and no further events will follow
    /// for the same start-session.
    Error { message: String },

    /// Not part of the distilled event set: a recoverable, non-fatal
    /// condition the host may want to surface (e.g. dropped audio frames
    /// under sustained queue saturation). Never terminates a Session.
    Warning { message: String },
}
