//! Message types for actor communication.

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Take the next job off the submission queue and run it.
    ///
    /// The worker sends this to itself after every job, so exactly one is
    /// ever in flight.
    Next,
}
