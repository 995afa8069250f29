//! Method registry — the ordered table of interchangeable stress methods.
//!
//! Every engine registers its methods once at startup, in a fixed order.
//! The name [`ALL_METHOD`] is reserved for the aggregate, which runs every
//! enabled method in registration order and stops at the first failure.
//!
//! Identity (name, operation, position) is immutable after registration.
//! The `enabled`/`exercised` flags are run-scoped: the fault-tolerant engine
//! clears `enabled` when a method traps, and a cleared method is never run
//! again by that registry, including through the aggregate.

use log::debug;

use crate::error::StressError;

/// Reserved name of the "run every method" aggregate.
pub const ALL_METHOD: &str = "all";

/// Position of a method inside its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(usize);

impl MethodId {
    /// Zero-based registration index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// What the operator selected: one method, or the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Every enabled method, in registration order.
    All,
    /// A single registered method.
    Single(MethodId),
}

/// A named burst-executable operation plus its run-scoped flags.
#[derive(Debug, Clone)]
pub struct StressMethod<Op> {
    name: &'static str,
    op: Op,
    enabled: bool,
    exercised: bool,
}

impl<Op> StressMethod<Op> {
    /// Method name as accepted on the command line.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The method's operation.
    pub fn op(&self) -> &Op {
        &self.op
    }

    /// Whether the method may still be invoked.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether at least one burst of this method completed and verified.
    pub fn was_exercised(&self) -> bool {
        self.exercised
    }
}

/// Result of one pass of the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatePass {
    /// This many sub-methods ran to completion.
    Ran(usize),
    /// No sub-method was enabled; no work was done.
    NothingToExercise,
}

/// Ordered, name-unique table of stress methods.
#[derive(Debug, Clone)]
pub struct MethodRegistry<Op> {
    /// Stressor name used in diagnostics ("cacheline", "misaligned").
    stressor: &'static str,
    methods: Vec<StressMethod<Op>>,
    /// Cleared once the aggregate found nothing left to run.
    aggregate_enabled: bool,
}

impl<Op> MethodRegistry<Op> {
    /// Create an empty registry for the named stressor.
    pub fn new(stressor: &'static str) -> Self {
        Self {
            stressor,
            methods: Vec::new(),
            aggregate_enabled: true,
        }
    }

    /// Stressor name this registry belongs to.
    pub fn stressor(&self) -> &'static str {
        self.stressor
    }

    /// Append a method.  Duplicate and reserved names are configuration errors.
    pub fn register(&mut self, name: &'static str, op: Op) -> Result<MethodId, StressError> {
        if name == ALL_METHOD {
            return Err(StressError::ReservedMethod(name));
        }
        if self.methods.iter().any(|m| m.name == name) {
            return Err(StressError::DuplicateMethod(name));
        }
        self.methods.push(StressMethod {
            name,
            op,
            enabled: true,
            exercised: false,
        });
        Ok(MethodId(self.methods.len() - 1))
    }

    /// Look a method name up.  Unknown names are configuration errors.
    pub fn resolve(&self, name: &str) -> Result<Selection, StressError> {
        if name == ALL_METHOD {
            return Ok(Selection::All);
        }
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(|i| Selection::Single(MethodId(i)))
            .ok_or_else(|| StressError::UnknownMethod {
                stressor: self.stressor,
                name: name.to_string(),
                known: self.names(),
            })
    }

    /// Every accepted name, aggregate first, then registration order.
    pub fn names(&self) -> Vec<&'static str> {
        std::iter::once(ALL_METHOD)
            .chain(self.methods.iter().map(|m| m.name))
            .collect()
    }

    /// Display name for a selection.
    pub fn selection_name(&self, selection: Selection) -> &'static str {
        match selection {
            Selection::All => ALL_METHOD,
            Selection::Single(id) => self.get(id).name,
        }
    }

    /// Fetch a method by id.
    ///
    /// Ids are only minted by this registry, so out-of-range ids are a bug.
    pub fn get(&self, id: MethodId) -> &StressMethod<Op> {
        &self.methods[id.0]
    }

    /// Id of the method registered at `index`, if any.
    pub fn id_at(&self, index: usize) -> Option<MethodId> {
        (index < self.methods.len()).then_some(MethodId(index))
    }

    /// Number of registered methods (the aggregate is not counted).
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Iterate methods in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (MethodId, &StressMethod<Op>)> {
        self.methods.iter().enumerate().map(|(i, m)| (MethodId(i), m))
    }

    /// Whether any method is still enabled.
    pub fn has_enabled(&self) -> bool {
        self.methods.iter().any(|m| m.enabled)
    }

    /// Whether a selection can still do any work.
    pub fn is_usable(&self, selection: Selection) -> bool {
        match selection {
            Selection::All => self.aggregate_enabled && self.has_enabled(),
            Selection::Single(id) => self.get(id).enabled,
        }
    }

    /// Permanently disable a method for the lifetime of this registry.
    pub fn disable(&mut self, id: MethodId) {
        let method = &mut self.methods[id.0];
        if method.enabled {
            debug!("{}: method {} disabled", self.stressor, method.name);
        }
        method.enabled = false;
    }

    /// Record that a burst of this method completed and verified.
    pub fn mark_exercised(&mut self, id: MethodId) {
        self.methods[id.0].exercised = true;
    }

    /// Whether the aggregate is still usable.
    pub fn aggregate_enabled(&self) -> bool {
        self.aggregate_enabled
    }

    /// Mark the aggregate unusable for the remainder of the run.
    pub fn disable_aggregate(&mut self) {
        self.aggregate_enabled = false;
    }

    /// Names of methods that completed at least one verified burst.
    pub fn exercised_names(&self) -> Vec<&'static str> {
        self.methods
            .iter()
            .filter(|m| m.exercised)
            .map(|m| m.name)
            .collect()
    }

    /// Names of methods that were disabled or never exercised.
    pub fn skipped_names(&self) -> Vec<&'static str> {
        self.methods
            .iter()
            .filter(|m| !m.exercised)
            .map(|m| m.name)
            .collect()
    }

    /// Run one pass of the aggregate.
    ///
    /// Calls `run` for every enabled method in registration order, polling
    /// `keep_running` before each.  Stops at the first error and returns it.
    pub fn run_aggregate<E>(
        &self,
        mut keep_running: impl FnMut() -> bool,
        mut run: impl FnMut(MethodId, &StressMethod<Op>) -> Result<(), E>,
    ) -> Result<AggregatePass, E> {
        if !self.aggregate_enabled || !self.has_enabled() {
            return Ok(AggregatePass::NothingToExercise);
        }
        let mut ran = 0;
        for (id, method) in self.iter() {
            if !method.enabled {
                continue;
            }
            if !keep_running() {
                break;
            }
            run(id, method)?;
            ran += 1;
        }
        Ok(AggregatePass::Ran(ran))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MethodRegistry<u8> {
        let mut r = MethodRegistry::new("test");
        r.register("first", 1).unwrap();
        r.register("second", 2).unwrap();
        r.register("third", 3).unwrap();
        r
    }

    #[test]
    fn register_preserves_order() {
        let r = registry();
        assert_eq!(r.names(), vec!["all", "first", "second", "third"]);
        assert_eq!(r.len(), 3);
        let ops: Vec<u8> = r.iter().map(|(_, m)| *m.op()).collect();
        assert_eq!(ops, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut r = registry();
        let err = r.register("second", 9).unwrap_err();
        assert!(matches!(err, StressError::DuplicateMethod("second")));
        assert!(err.is_configuration());
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn aggregate_name_is_reserved() {
        let mut r = registry();
        let err = r.register("all", 0).unwrap_err();
        assert!(matches!(err, StressError::ReservedMethod("all")));
    }

    #[test]
    fn resolve_known_and_aggregate() {
        let r = registry();
        assert_eq!(r.resolve("all").unwrap(), Selection::All);
        let Selection::Single(id) = r.resolve("second").unwrap() else {
            panic!("expected single method");
        };
        assert_eq!(id.index(), 1);
        assert_eq!(r.get(id).name(), "second");
        assert_eq!(r.selection_name(Selection::Single(id)), "second");
        assert_eq!(r.id_at(1), Some(id));
        assert_eq!(r.id_at(3), None);
    }

    #[test]
    fn resolve_unknown_is_configuration_error() {
        let r = registry();
        let err = r.resolve("fourth").unwrap_err();
        match &err {
            StressError::UnknownMethod { stressor, name, known } => {
                assert_eq!(*stressor, "test");
                assert_eq!(name, "fourth");
                assert_eq!(known, &vec!["all", "first", "second", "third"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_configuration());
    }

    #[test]
    fn aggregate_runs_enabled_in_order() {
        let mut r = registry();
        r.disable(MethodId(1));
        let mut seen = Vec::new();
        let pass = r
            .run_aggregate(|| true, |_, m| {
                seen.push(m.name());
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(pass, AggregatePass::Ran(2));
        assert_eq!(seen, vec!["first", "third"]);
    }

    #[test]
    fn aggregate_short_circuits_on_failure() {
        let r = registry();
        let mut seen = Vec::new();
        let result = r.run_aggregate(|| true, |_, m| {
            seen.push(m.name());
            if m.name() == "second" {
                Err("boom")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(seen, vec!["first", "second"]);
    }

    #[test]
    fn aggregate_with_nothing_enabled_does_no_work() {
        let mut r = registry();
        for id in [MethodId(0), MethodId(1), MethodId(2)] {
            r.disable(id);
        }
        assert!(!r.is_usable(Selection::All));
        let mut calls = 0;
        let pass = r
            .run_aggregate(|| true, |_, _| {
                calls += 1;
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(pass, AggregatePass::NothingToExercise);
        assert_eq!(calls, 0);
    }

    #[test]
    fn aggregate_stops_when_predicate_turns_false() {
        let r = registry();
        let mut budget = 2;
        let pass = r
            .run_aggregate(
                || {
                    let go = budget > 0;
                    budget -= 1;
                    go
                },
                |_, _| Ok::<_, ()>(()),
            )
            .unwrap();
        assert_eq!(pass, AggregatePass::Ran(2));
    }

    #[test]
    fn disabled_aggregate_is_unusable() {
        let mut r = registry();
        assert!(r.is_usable(Selection::All));
        r.disable_aggregate();
        assert!(!r.is_usable(Selection::All));
        let pass = r.run_aggregate(|| true, |_, _| Ok::<_, ()>(())).unwrap();
        assert_eq!(pass, AggregatePass::NothingToExercise);
    }

    #[test]
    fn exercised_and_skipped_partition_methods() {
        let mut r = registry();
        r.mark_exercised(MethodId(0));
        r.mark_exercised(MethodId(2));
        r.disable(MethodId(1));
        assert_eq!(r.exercised_names(), vec!["first", "third"]);
        assert_eq!(r.skipped_names(), vec!["second"]);
        assert!(!r.is_usable(Selection::Single(MethodId(1))));
        assert!(r.is_usable(Selection::Single(MethodId(2))));
    }
}
