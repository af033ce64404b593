//! Command/event split used by the invoice lifecycle state machines.

/// Something with an identity and a count of applied changes.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Events applied since the aggregate was created or restored.
    fn version(&self) -> u64;
}

/// A state machine driven by commands.
///
/// `handle` checks preconditions against the current state and returns the
/// events a command would produce without touching state, so a rejected
/// command never reaches the network. `apply` folds one event into state.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Handle `command` and apply the resulting events in order.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = aggregate.handle(command)?;
    for event in &events {
        aggregate.apply(event);
    }
    Ok(events)
}
