//! Error type surfaced by [`crate::Coalescer::coalesce`].

/// The error kinds a coalesce call can fail with.
///
/// A propagated query failure (`Query`) is shared identically across every
/// waiter in the group that produced it — there is no retry at this layer.
/// `ShutdownInProgress` and `ExceededTimeLimit` are private to the call that
/// observed them and should be treated as transient by the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoalesceError<E>
where
    E: std::fmt::Debug + std::fmt::Display + Clone,
{
    /// The underlying `query_fn` returned a failure. Surfaced unchanged to
    /// every coalesced caller in the group, including the leader.
    #[error("underlying query failed: {0}")]
    Query(E),

    /// The coalescer was shut down, or became shut down, while this call
    /// was in flight.
    #[error("coalescer is shutting down")]
    ShutdownInProgress,

    /// This follower's wait exceeded `MaxWaitTime` without the leader
    /// publishing a result.
    #[error("wait exceeded the configured time limit")]
    ExceededTimeLimit,
}
