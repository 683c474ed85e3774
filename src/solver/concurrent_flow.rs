//! Coefficient flow on a pool of worker threads.
//!
//! Workers share a FIFO queue of faces to check.
//! Cell coefficients are claimed with an atomic compare-and-swap
//! from an unassigned sentinel, so two workers forcing different values
//! on the same cell always results in one of them seeing the conflict.
//! Faces are marked processed with an atomic swap
//! so that each is checked exactly once.
//! The first contradiction or error found by any worker
//! is latched and stops all workers.

use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        OnceLock,
    },
};

use super::{
    BoundingChain, BoundingChainSolver, FaceConstraint, FlowItem, FlowProblem, SolveError,
};
use crate::{cell::Cell, chain::Chain, complex::SimplicialComplex};

/// Tunables of [`ConcurrentCoefficientFlow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConcurrentFlowOptions {
    /// Number of worker threads.
    pub workers: NonZeroUsize,
}

impl Default for ConcurrentFlowOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// [`CoefficientFlow`][super::CoefficientFlow] with propagation
/// spread over several threads.
///
/// Produces the same results as the sequential version
/// regardless of scheduling; only the location reported in
/// [`BoundingChain::Inconsistent`] may differ between runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConcurrentCoefficientFlow {
    /// Tunables of the worker pool.
    pub options: ConcurrentFlowOptions,
}

impl ConcurrentCoefficientFlow {
    /// Create a solver with the given options.
    #[inline]
    pub fn new(options: ConcurrentFlowOptions) -> Self {
        Self { options }
    }

    /// Propagate from `seed` with the coefficient `seed_coefficient`.
    ///
    /// See [`CoefficientFlow::solve`][super::CoefficientFlow::solve].
    pub fn solve(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
        seed: &Cell,
        seed_coefficient: f64,
    ) -> Result<BoundingChain, SolveError> {
        let problem = FlowProblem::new(complex, boundary)?;
        let seed = problem.seed(seed, seed_coefficient)?;
        self.flow(&problem, (seed, seed_coefficient), std::iter::empty())
    }

    /// Propagate from seeds derived from the free faces of the complex.
    ///
    /// See [`CoefficientFlow::solve_embedded`][super::CoefficientFlow::solve_embedded].
    pub fn solve_embedded(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
    ) -> Result<BoundingChain, SolveError> {
        let problem = FlowProblem::new(complex, boundary)?;
        let mut seeds = problem.free_face_seeds();
        let first = seeds.next().ok_or(SolveError::NoFreeFace)?;
        self.flow(&problem, first, seeds)
    }

    /// Run the worker pool from `seed`, then again from each of `more_seeds`
    /// whose cell is still unassigned after the pool has finished.
    fn flow(
        &self,
        problem: &FlowProblem<'_>,
        seed: (usize, f64),
        mut more_seeds: impl Iterator<Item = (usize, f64)>,
    ) -> Result<BoundingChain, SolveError> {
        let state = SharedFlow::new(problem);
        let workers = self.options.workers.get();

        let mut next_seed = Some(seed);
        while let Some((seed, seed_coefficient)) = next_seed {
            log::debug!("running {workers} workers from cell {seed} = {seed_coefficient}");
            state.claim(seed, seed_coefficient);
            state
                .queue
                .lock()
                .items
                .extend(problem.items_for(seed, seed_coefficient));

            std::thread::scope(|s| {
                for _ in 0..workers {
                    s.spawn(|| state.run_worker());
                }
            });

            if state.cancelled.load(Ordering::Acquire) {
                break;
            }
            next_seed = more_seeds.find(|&(cell, _)| !state.is_assigned(cell));
        }

        state.into_outcome()
    }
}

impl BoundingChainSolver for ConcurrentCoefficientFlow {
    fn bounding_chain(
        &self,
        complex: &SimplicialComplex,
        boundary: &Chain,
    ) -> Result<BoundingChain, SolveError> {
        self.solve_embedded(complex, boundary)
    }
}

/// Bit pattern of a cell with no coefficient yet.
/// This is a NaN, which propagation never produces
/// since non-finite inputs are rejected up front.
const UNASSIGNED: u64 = u64::MAX;

/// Result of trying to assign a coefficient to a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Claim {
    /// The cell was unassigned and now has the value.
    Claimed,
    /// The cell already had the same value.
    Agreed,
    /// The cell already had a different value.
    Conflict,
}

/// The first thing that stopped the computation.
#[derive(Debug)]
enum Failure {
    Inconsistent { dim: usize, index: usize },
    Error(SolveError),
}

#[derive(Debug, Default)]
struct WorkQueue {
    items: VecDeque<FlowItem>,
    /// items taken off the queue but not finished yet.
    /// these may still add more work
    in_flight: usize,
}

/// An item taken off the queue by a worker.
/// Returns the work it produced and releases its place in `in_flight`
/// when dropped, also when the worker panics,
/// so that the other workers don't wait for it forever.
struct InFlight<'s, 'p, 'c> {
    flow: &'s SharedFlow<'p, 'c>,
    produced: Vec<FlowItem>,
}

impl<'s, 'p, 'c> InFlight<'s, 'p, 'c> {
    fn new(flow: &'s SharedFlow<'p, 'c>) -> Self {
        Self {
            flow,
            produced: Vec::new(),
        }
    }
}

impl Drop for InFlight<'_, '_, '_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.flow.cancelled.store(true, Ordering::Release);
        }
        let mut queue = self.flow.queue.lock();
        queue.items.extend(self.produced.drain(..));
        queue.in_flight -= 1;
        drop(queue);
        // wake waiters both for new items and for termination
        self.flow.work_available.notify_all();
    }
}

/// State shared between the workers.
struct SharedFlow<'p, 'c> {
    problem: &'p FlowProblem<'c>,
    /// f64 bits of each cell's coefficient, or UNASSIGNED
    coefficients: Vec<AtomicU64>,
    processed: Vec<AtomicBool>,
    queue: Mutex<WorkQueue>,
    work_available: Condvar,
    cancelled: AtomicBool,
    failure: OnceLock<Failure>,
}

impl<'p, 'c> SharedFlow<'p, 'c> {
    fn new(problem: &'p FlowProblem<'c>) -> Self {
        Self {
            problem,
            coefficients: (0..problem.cell_count())
                .map(|_| AtomicU64::new(UNASSIGNED))
                .collect(),
            processed: (0..problem.face_count())
                .map(|_| AtomicBool::new(false))
                .collect(),
            queue: Mutex::new(WorkQueue::default()),
            work_available: Condvar::new(),
            cancelled: AtomicBool::new(false),
            failure: OnceLock::new(),
        }
    }

    /// Assign `coefficient` to `cell` unless it already has a value,
    /// in which case compare against that.
    fn claim(&self, cell: usize, coefficient: f64) -> Claim {
        match self.coefficients[cell].compare_exchange(
            UNASSIGNED,
            coefficient.to_bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Claim::Claimed,
            // compare as floats so that 0.0 and -0.0 agree
            Err(existing) if f64::from_bits(existing) == coefficient => Claim::Agreed,
            Err(_) => Claim::Conflict,
        }
    }

    fn is_assigned(&self, cell: usize) -> bool {
        self.coefficients[cell].load(Ordering::Acquire) != UNASSIGNED
    }

    /// Latch the first failure and stop everyone.
    fn fail(&self, failure: Failure) {
        let _ = self.failure.set(failure);
        self.cancelled.store(true, Ordering::Release);
    }

    fn run_worker(&self) {
        loop {
            let item = {
                let mut queue = self.queue.lock();
                loop {
                    if self.cancelled.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(item) = queue.items.pop_front() {
                        queue.in_flight += 1;
                        break item;
                    }
                    if queue.in_flight == 0 {
                        // nothing queued and nobody can add more
                        return;
                    }
                    self.work_available.wait(&mut queue);
                }
            };

            let mut slot = InFlight::new(self);
            slot.produced = self.process(item);
        }
    }

    /// Check the constraint at one face,
    /// returning the work generated by newly assigned cells.
    fn process(&self, item: FlowItem) -> Vec<FlowItem> {
        if self.processed[item.face].swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        log::trace!(
            "face {} from cell {} = {}",
            item.face,
            item.cell,
            item.coefficient
        );

        let problem = self.problem;
        match problem.constraint(&item) {
            Err(err) => self.fail(Failure::Error(err)),
            Ok(FaceConstraint::Satisfied) => {}
            Ok(FaceConstraint::Violated) => self.fail(Failure::Inconsistent {
                dim: problem.dim - 1,
                index: item.face,
            }),
            Ok(FaceConstraint::Forces { cell, coefficient }) => {
                match self.claim(cell, coefficient) {
                    Claim::Claimed => {
                        return problem
                            .items_for(cell, coefficient)
                            .filter(|it| !self.processed[it.face].load(Ordering::Acquire))
                            .collect();
                    }
                    Claim::Agreed => {}
                    Claim::Conflict => self.fail(Failure::Inconsistent {
                        dim: problem.dim,
                        index: cell,
                    }),
                }
            }
        }
        Vec::new()
    }

    /// Turn the final state into a result after all workers have stopped.
    fn into_outcome(self) -> Result<BoundingChain, SolveError> {
        let problem = self.problem;
        match self.failure.into_inner() {
            Some(Failure::Error(err)) => return Err(err),
            Some(Failure::Inconsistent { dim, index }) => {
                log::debug!("inconsistency at {dim}-cell {index}");
                return Ok(BoundingChain::Inconsistent { dim, index });
            }
            None => {}
        }

        let processed: Vec<bool> = self.processed.into_iter().map(AtomicBool::into_inner).collect();
        if let Some(face) = problem.unreached_support(|face| processed[face]) {
            log::debug!("boundary is nonzero at face {face} not connected to any seed");
            return Ok(BoundingChain::Inconsistent {
                dim: problem.dim - 1,
                index: face,
            });
        }

        Ok(problem.finish(
            self.coefficients
                .into_iter()
                .map(AtomicU64::into_inner)
                .enumerate()
                .filter(|(_, bits)| *bits != UNASSIGNED)
                .map(|(i, bits)| (i, f64::from_bits(bits))),
        ))
    }
}
