//! Cooperative scheduling of expensive, iterative work.
//!
//! A [`Sequence`] is a FIFO of cost-tagged closures. Nothing runs until a
//! driver calls [`Sequence::exec`], which pops and runs exactly one unit, so
//! the caller decides when to hand control back to its host between units.
//! Loops are expressed with [`Sequence::iterate`]: every pass is its own unit
//! that re-inserts the next pass at the head of the queue.
//!
//! A sequence settles once, through [`Sequence::resolve`] or
//! [`Sequence::reject`]. Settling clears the queue and notifies every
//! listener registered with [`Sequence::on_complete`].

use std::collections::VecDeque;
use std::ops::ControlFlow;

use crate::error::SequenceError;

/// Largest estimated cost a single unit may carry.
///
/// Roughly the number of primitive operations that fit in one cooperative
/// time slice without starving the host.
pub const MAX_COMPLEXITY: f64 = 37_000.0;

/// Base of a unit's cost estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CostData {
    /// Size of the collection the unit walks over.
    Length(usize),
    /// A literal operation count.
    Number(f64),
}

impl CostData {
    pub fn of<T>(items: &[T]) -> Self {
        CostData::Length(items.len())
    }

    /// `base ^ exponent`; a literal number with exponent 0 is taken as is.
    pub fn estimate(self, complexity_exponent: u32) -> f64 {
        match self {
            CostData::Length(len) => (len as f64).powi(complexity_exponent as i32),
            CostData::Number(n) if complexity_exponent == 0 => n,
            CostData::Number(n) => n.powi(complexity_exponent as i32),
        }
    }
}

type StepFn<S, V> = Box<dyn FnOnce(&mut Sequence<S, V>) -> Result<(), SequenceError>>;
type Listener<V> = Box<dyn FnOnce(Result<V, SequenceError>)>;

struct ScheduledUnit<S, V> {
    exec: StepFn<S, V>,
    cost: f64,
}

/// A named queue of work over some shared state `S`, settling to a `V`.
pub struct Sequence<S, V> {
    name: String,
    state: S,
    units: VecDeque<ScheduledUnit<S, V>>,
    outcome: Option<Result<V, SequenceError>>,
    listeners: Vec<Listener<V>>,
}

impl<S: 'static, V: Clone + 'static> Sequence<S, V> {
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state,
            units: VecDeque::new(),
            outcome: None,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    fn unit(
        &self,
        step: StepFn<S, V>,
        cost: CostData,
        complexity_exponent: u32,
    ) -> Result<ScheduledUnit<S, V>, SequenceError> {
        let cost = cost.estimate(complexity_exponent);
        if cost > MAX_COMPLEXITY {
            return Err(SequenceError::ComplexityExceeded {
                sequence: self.name.clone(),
                cost,
            });
        }
        Ok(ScheduledUnit { exec: step, cost })
    }

    /// Queue `step` at the tail.
    pub fn append<F>(
        &mut self,
        step: F,
        cost: CostData,
        complexity_exponent: u32,
    ) -> Result<(), SequenceError>
    where
        F: FnOnce(&mut Sequence<S, V>) -> Result<(), SequenceError> + 'static,
    {
        let unit = self.unit(Box::new(step), cost, complexity_exponent)?;
        self.units.push_back(unit);
        Ok(())
    }

    /// Queue `step` at `index` (clamped to the queue length). Index 0 makes it
    /// the very next unit to run.
    pub fn insert_at<F>(
        &mut self,
        step: F,
        cost: CostData,
        index: usize,
        complexity_exponent: u32,
    ) -> Result<(), SequenceError>
    where
        F: FnOnce(&mut Sequence<S, V>) -> Result<(), SequenceError> + 'static,
    {
        let unit = self.unit(Box::new(step), cost, complexity_exponent)?;
        let index = index.min(self.units.len());
        self.units.insert(index, unit);
        Ok(())
    }

    /// Express `for (i = initial; predicate(i); i = increment(i)) body(state, i)`
    /// as one unit per pass.
    ///
    /// The first pass is appended; every later pass is inserted at the head so
    /// the loop finishes before anything queued behind it.
    pub fn iterate<P, I, B>(
        &mut self,
        initial: usize,
        predicate: P,
        increment: I,
        body: B,
        cost: CostData,
        complexity_exponent: u32,
    ) -> Result<(), SequenceError>
    where
        P: Fn(usize) -> bool + 'static,
        I: Fn(usize) -> usize + 'static,
        B: FnMut(&mut S, usize) -> Result<(), SequenceError> + 'static,
    {
        let step = Self::iteration(initial, predicate, increment, body, cost, complexity_exponent);
        let unit = self.unit(step, cost, complexity_exponent)?;
        self.units.push_back(unit);
        Ok(())
    }

    fn iteration<P, I, B>(
        index: usize,
        predicate: P,
        increment: I,
        mut body: B,
        cost: CostData,
        complexity_exponent: u32,
    ) -> StepFn<S, V>
    where
        P: Fn(usize) -> bool + 'static,
        I: Fn(usize) -> usize + 'static,
        B: FnMut(&mut S, usize) -> Result<(), SequenceError> + 'static,
    {
        Box::new(move |seq: &mut Sequence<S, V>| {
            if !predicate(index) {
                return Ok(());
            }
            body(&mut seq.state, index)?;
            let next = increment(index);
            let step = Self::iteration(next, predicate, increment, body, cost, complexity_exponent);
            let unit = seq.unit(step, cost, complexity_exponent)?;
            seq.units.push_front(unit);
            Ok(())
        })
    }

    /// Pop and run exactly one unit. `None` when there is nothing to run.
    ///
    /// A unit that fails rejects the whole sequence.
    pub fn exec(&mut self) -> Option<Result<(), SequenceError>> {
        if self.outcome.is_some() {
            return None;
        }
        let unit = self.units.pop_front()?;
        tracing::trace!(sequence = %self.name, cost = unit.cost, "exec");
        let result = (unit.exec)(self);
        if let Err(err) = &result {
            self.reject(err.clone());
        }
        Some(result)
    }

    pub fn has_pending_work(&self) -> bool {
        self.outcome.is_none() && !self.units.is_empty()
    }

    pub fn pending_units(&self) -> usize {
        self.units.len()
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&Result<V, SequenceError>> {
        self.outcome.as_ref()
    }

    pub fn resolve(&mut self, value: V) {
        self.settle(Ok(value));
    }

    pub fn reject(&mut self, error: SequenceError) {
        self.settle(Err(error));
    }

    fn settle(&mut self, outcome: Result<V, SequenceError>) {
        if self.outcome.is_some() {
            return;
        }
        self.units.clear();
        for listener in self.listeners.drain(..) {
            listener(outcome.clone());
        }
        self.outcome = Some(outcome);
    }

    /// Register a completion handler. Each handler is called exactly once; a
    /// handler registered after settling is called immediately.
    pub fn on_complete<F>(&mut self, listener: F)
    where
        F: FnOnce(Result<V, SequenceError>) + 'static,
    {
        match &self.outcome {
            Some(outcome) => listener(outcome.clone()),
            None => self.listeners.push(Box::new(listener)),
        }
    }

    /// Run units until the sequence settles, calling `between` after every
    /// unit so the host can yield or cancel.
    ///
    /// A sequence whose queue drains without a resolve is rejected with
    /// [`SequenceError::Unresolved`].
    pub fn drive<F>(&mut self, mut between: F) -> Result<V, SequenceError>
    where
        F: FnMut() -> ControlFlow<()>,
    {
        while self.exec().is_some() {
            if self.is_settled() {
                break;
            }
            if between().is_break() {
                self.reject(SequenceError::Cancelled(self.name.clone()));
            }
        }
        if !self.is_settled() {
            self.reject(SequenceError::Unresolved(self.name.clone()));
        }
        match &self.outcome {
            Some(outcome) => outcome.clone(),
            None => Err(SequenceError::Unresolved(self.name.clone())),
        }
    }
}
