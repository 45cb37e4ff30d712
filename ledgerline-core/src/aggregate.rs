//! Command-side domain primitives.
//!
//! Aggregates rebuild their state from committed events ([`Aggregate::apply`])
//! and validate commands ([`Handle`]). Persistence is left to
//! [`Repository`](crate::repository::Repository).

/// Command-side entity whose state is the fold of its stream's events.
///
/// The aggregate state doubles as the snapshot payload, which is why it must
/// be cheap enough to clone.
// ANCHOR: aggregate_trait
pub trait Aggregate: Default + Clone + Send + Sync + 'static {
    type Event: Clone + Send + Sync + 'static;
    type Error;

    /// Apply an event to update aggregate state.
    ///
    /// This is called during replay to rebuild aggregate state from history,
    /// and after a successful commit when a snapshot is taken.
    fn apply(&mut self, event: &Self::Event);
}
// ANCHOR_END: aggregate_trait

/// Entry point for command handling.
///
/// Each command type gets its own implementation, letting the aggregate express
/// validation logic in a strongly typed way.
///
/// ```ignore
/// impl Handle<PlaceOrder> for Order {
///     fn handle(&self, command: &PlaceOrder) -> Result<Vec<Self::Event>, Self::Error> {
///         if self.placed {
///             return Err(OrderError::AlreadyPlaced);
///         }
///         Ok(vec![OrderEvent::Placed { lines: command.lines.clone() }])
///     }
/// }
/// ```
// ANCHOR: handle_trait
pub trait Handle<C>: Aggregate {
    /// Handle a command and produce events.
    ///
    /// Returning no events makes the command a no-op: nothing is committed.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the command is invalid for the current
    /// aggregate state.
    fn handle(&self, command: &C) -> Result<Vec<Self::Event>, Self::Error>;
}
// ANCHOR_END: handle_trait
