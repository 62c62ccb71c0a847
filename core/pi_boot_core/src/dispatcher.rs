//! Driver dispatcher shared by the PEI and DXE cores.
//!
//! Each call to [`Dispatcher::next_batch`] is one dispatch pass. It evaluates every pending file against the
//! installed interfaces and returns the files that may run now, in the order they must run:
//!
//! - Files whose expression is `True` and carries no ordering constraint form the batch.
//! - A `BEFORE`/`AFTER` file joins the batch when its target is in it. An `AFTER` file also joins when its target
//!   already ran in an earlier pass.
//! - The batch is ordered topologically over those constraints. Files that are not ordered relative to each other
//!   keep the order they were discovered in.
//!
//! A file whose expression is malformed never runs. Files left pending when the core stops dispatching are
//! reported, with files whose constraints form a loop marked as such.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{
    collections::{BTreeMap, BTreeSet},
    vec::Vec,
};
use core::fmt;

use pi_internal_depex::{AssociatedDependency, Depex, DepexError, DepexResult, GuidSet};
use pi_sdk::{error::EfiError, guid_fmt, OrdGuid};
use r_efi::efi;

use crate::fv::DriverFile;

/// Why a file did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchFailure {
    /// The dependency expression is malformed.
    Depex(DepexError),
    /// The security policy refused the image.
    Security(EfiError),
    /// The image could not be resolved into an entry point.
    Load(EfiError),
    /// The entry point returned an error.
    Start(EfiError),
    /// Still waiting for interfaces when dispatch stopped.
    Unsatisfied,
    /// Its `BEFORE`/`AFTER` constraint leads back to itself.
    Cycle,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchFailure::Depex(err) => write!(f, "malformed dependency expression: {err}"),
            DispatchFailure::Security(err) => write!(f, "refused by security policy: {err:?}"),
            DispatchFailure::Load(err) => write!(f, "load failed: {err:?}"),
            DispatchFailure::Start(err) => write!(f, "entry point failed: {err:?}"),
            DispatchFailure::Unsatisfied => write!(f, "dependencies never satisfied"),
            DispatchFailure::Cycle => write!(f, "ordering constraint cycle"),
        }
    }
}

/// Outcome of a phase's dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Files that ran successfully, in the order they ran.
    pub dispatched: Vec<efi::Guid>,
    pub failed: Vec<(efi::Guid, DispatchFailure)>,
}

impl DispatchReport {
    pub fn failure_of(&self, name: &efi::Guid) -> Option<DispatchFailure> {
        self.failed.iter().find(|(failed, _)| failed == name).map(|(_, failure)| *failure)
    }
}

struct Pending {
    seq: usize,
    driver: DriverFile,
}

enum Verdict {
    Ready,
    Constrained(AssociatedDependency),
    Wait,
    Never(DepexError),
}

#[derive(Default)]
pub struct Dispatcher {
    pending: Vec<Pending>,
    next_seq: usize,
    known: BTreeSet<OrdGuid>,
    dispatched: Vec<efi::Guid>,
    dispatched_set: BTreeSet<OrdGuid>,
    failures: Vec<(efi::Guid, DispatchFailure)>,
    implicit: Option<Depex>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expression applied to files that carry none. Without one such files are always ready.
    pub fn with_implicit_dependency(mut self, depex: Depex) -> Self {
        self.implicit = Some(depex);
        self
    }

    /// Queue a discovered file. Returns `false`, and ignores it, when a file of the same name was already queued.
    pub fn add(&mut self, driver: DriverFile) -> bool {
        if !self.known.insert(OrdGuid(driver.name)) {
            log::debug!(target: "pi_dispatcher", "{} already known; ignoring duplicate", guid_fmt!(driver.name));
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Pending { seq, driver });
        true
    }

    pub fn extend(&mut self, drivers: impl IntoIterator<Item = DriverFile>) -> usize {
        drivers.into_iter().map(|driver| self.add(driver)).filter(|added| *added).count()
    }

    /// Release a pending schedule-on-request file. [`EfiError::NotFound`] if no pending file by that name waits on
    /// a request.
    pub fn schedule(&mut self, name: &efi::Guid) -> Result<(), EfiError> {
        let depex = self
            .pending
            .iter_mut()
            .find(|pending| pending.driver.name == *name)
            .and_then(|pending| pending.driver.depex.as_mut())
            .filter(|depex| depex.is_sor())
            .ok_or(EfiError::NotFound)?;
        depex.schedule();
        log::info!(target: "pi_dispatcher", "scheduled {}", guid_fmt!(name));
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_dispatched(&self, name: &efi::Guid) -> bool {
        self.dispatched_set.contains(&OrdGuid(*name))
    }

    fn verdict(&self, driver: &DriverFile, installed: &(impl GuidSet + ?Sized)) -> Verdict {
        let Some(depex) = driver.depex.as_ref().or(self.implicit.as_ref()) else {
            return Verdict::Ready;
        };
        match depex.evaluate(installed) {
            DepexResult::True => match depex.ordering() {
                Some(constraint) => Verdict::Constrained(constraint),
                None => Verdict::Ready,
            },
            DepexResult::False => Verdict::Wait,
            DepexResult::Error(err) => Verdict::Never(err),
        }
    }

    /// Run one dispatch pass and return the files to start, in order. Empty when nothing can run.
    pub fn next_batch(&mut self, installed: &(impl GuidSet + ?Sized)) -> Vec<DriverFile> {
        let mut ready = Vec::new();
        let mut constrained = Vec::new();
        let mut waiting = Vec::new();
        for pending in core::mem::take(&mut self.pending) {
            match self.verdict(&pending.driver, installed) {
                Verdict::Ready => ready.push((pending, None)),
                Verdict::Constrained(constraint) => constrained.push((pending, constraint)),
                Verdict::Wait => waiting.push(pending),
                Verdict::Never(err) => {
                    log::error!(
                        target: "pi_dispatcher",
                        "{} will never be dispatched: {err}",
                        guid_fmt!(pending.driver.name)
                    );
                    self.failures.push((pending.driver.name, DispatchFailure::Depex(err)));
                }
            }
        }

        // Constrained files join once their target is in the batch, which may itself be a joined file.
        let mut in_batch: BTreeSet<OrdGuid> = ready.iter().map(|(pending, _)| OrdGuid(pending.driver.name)).collect();
        loop {
            let (joining, rest): (Vec<_>, Vec<_>) = constrained.into_iter().partition(|(_, constraint)| {
                let target = OrdGuid(constraint.target());
                in_batch.contains(&target)
                    || (matches!(constraint, AssociatedDependency::After(_)) && self.dispatched_set.contains(&target))
            });
            constrained = rest;
            if joining.is_empty() {
                break;
            }
            for (pending, constraint) in joining {
                in_batch.insert(OrdGuid(pending.driver.name));
                ready.push((pending, Some(constraint)));
            }
        }
        waiting.extend(constrained.into_iter().map(|(pending, _)| pending));

        let (batch, leftover) = order_batch(ready);
        if !leftover.is_empty() {
            log::error!(target: "pi_dispatcher", "{} files in an ordering cycle held back", leftover.len());
        }
        waiting.extend(leftover);
        waiting.sort_by_key(|pending| pending.seq);
        self.pending = waiting;

        if !batch.is_empty() {
            log::debug!(target: "pi_dispatcher", "pass ready: {} files, {} pending", batch.len(), self.pending.len());
        }
        batch
    }

    /// Record how a file returned by [`next_batch`](Self::next_batch) fared.
    pub fn complete(&mut self, name: efi::Guid, outcome: Result<(), DispatchFailure>) {
        match outcome {
            Ok(()) => {
                self.dispatched_set.insert(OrdGuid(name));
                self.dispatched.push(name);
            }
            Err(failure) => {
                log::error!(target: "pi_dispatcher", "{} failed: {failure}", guid_fmt!(name));
                self.failures.push((name, failure));
            }
        }
    }

    fn in_cycle(&self, start: &efi::Guid) -> bool {
        let targets: BTreeMap<OrdGuid, efi::Guid> = self
            .pending
            .iter()
            .filter_map(|pending| {
                let constraint = pending.driver.depex.as_ref()?.ordering()?;
                Some((OrdGuid(pending.driver.name), constraint.target()))
            })
            .collect();
        let mut current = *start;
        for _ in 0..targets.len() {
            match targets.get(&OrdGuid(current)) {
                Some(next) if next == start => return true,
                Some(next) => current = *next,
                None => return false,
            }
        }
        false
    }

    /// What ran and what did not. Files still pending are reported as unsatisfied or cyclic.
    pub fn report(&self) -> DispatchReport {
        let mut failed = self.failures.clone();
        for pending in &self.pending {
            let name = pending.driver.name;
            let failure = if self.in_cycle(&name) { DispatchFailure::Cycle } else { DispatchFailure::Unsatisfied };
            failed.push((name, failure));
        }
        DispatchReport { dispatched: self.dispatched.clone(), failed }
    }

    /// Log every file still pending, with the interfaces it references that are not installed.
    pub fn log_undispatched(&self, installed: &(impl GuidSet + ?Sized)) {
        for pending in &self.pending {
            let name = guid_fmt!(pending.driver.name);
            match pending.driver.depex.as_ref() {
                Some(depex) => {
                    for missing in depex.referenced_guids().filter(|guid| !installed.contains_guid(guid)) {
                        log::warn!(target: "pi_dispatcher", "{name} not dispatched: waiting on {}", guid_fmt!(missing));
                    }
                    if let Some(constraint) = depex.ordering() {
                        log::warn!(target: "pi_dispatcher", "{name} not dispatched: constraint {constraint:?} unmet");
                    }
                }
                None => log::warn!(target: "pi_dispatcher", "{name} not dispatched: implicit dependency unmet"),
            }
        }
    }
}

/// Kahn sort of a batch. Edges point from a file to the files that must follow it; among files with no remaining
/// predecessor the earliest discovered goes first. Files that never lose their predecessors are returned separately.
fn order_batch(batch: Vec<(Pending, Option<AssociatedDependency>)>) -> (Vec<DriverFile>, Vec<Pending>) {
    let index_of: BTreeMap<OrdGuid, usize> =
        batch.iter().enumerate().map(|(index, (pending, _))| (OrdGuid(pending.driver.name), index)).collect();

    let mut successors = alloc::vec![Vec::new(); batch.len()];
    let mut indegree = alloc::vec![0usize; batch.len()];
    for (index, (_, constraint)) in batch.iter().enumerate() {
        let Some(constraint) = constraint else { continue };
        let Some(&target) = index_of.get(&OrdGuid(constraint.target())) else { continue };
        let (from, to) = match constraint {
            AssociatedDependency::Before(_) => (index, target),
            AssociatedDependency::After(_) => (target, index),
        };
        successors[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: BTreeSet<(usize, usize)> = batch
        .iter()
        .enumerate()
        .filter(|(index, _)| indegree[*index] == 0)
        .map(|(index, (pending, _))| (pending.seq, index))
        .collect();
    let mut order = Vec::with_capacity(batch.len());
    while let Some((_, index)) = ready.pop_first() {
        order.push(index);
        for &next in &successors[index] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert((batch[next].0.seq, next));
            }
        }
    }

    let mut slots: Vec<Option<Pending>> = batch.into_iter().map(|(pending, _)| Some(pending)).collect();
    let ordered = order.iter().filter_map(|index| slots[*index].take()).map(|pending| pending.driver).collect();
    let leftover = slots.into_iter().flatten().collect();
    (ordered, leftover)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_internal_depex::{after, before, push, Opcode};
    use std::vec;

    fn guid(n: u8) -> efi::Guid {
        efi::Guid::from_bytes(&[n; 16])
    }

    fn file(n: u8, depex: Option<&[Opcode]>) -> DriverFile {
        DriverFile { name: guid(n), file_type: 0x07, depex: depex.map(Depex::from), image: vec![0x4d, 0x5a] }
    }

    fn names(batch: &[DriverFile]) -> Vec<efi::Guid> {
        batch.iter().map(|driver| driver.name).collect()
    }

    fn run(dispatcher: &mut Dispatcher, installed: &mut Vec<efi::Guid>) -> Vec<Vec<efi::Guid>> {
        let mut passes = Vec::new();
        loop {
            let batch = dispatcher.next_batch(&*installed);
            if batch.is_empty() {
                return passes;
            }
            for driver in &batch {
                dispatcher.complete(driver.name, Ok(()));
                installed.push(driver.name);
            }
            passes.push(names(&batch));
        }
    }

    #[test]
    fn after_constraint_orders_a_ready_pair() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(file(1, Some(&[after(&guid(2)), Opcode::End])));
        dispatcher.add(file(2, Some(&[Opcode::True, Opcode::End])));
        let batch = dispatcher.next_batch(&Vec::<efi::Guid>::new());
        assert_eq!(names(&batch), vec![guid(2), guid(1)]);
    }

    #[test]
    fn before_constraint_moves_a_file_ahead() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(file(1, None));
        dispatcher.add(file(2, None));
        dispatcher.add(file(3, Some(&[before(&guid(1)), Opcode::End])));
        let batch = dispatcher.next_batch(&Vec::<efi::Guid>::new());
        assert_eq!(names(&batch), vec![guid(3), guid(1), guid(2)]);
    }

    #[test]
    fn discovery_order_breaks_ties_across_passes() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(file(1, Some(&[push(&guid(3)), Opcode::End])));
        dispatcher.add(file(2, None));
        dispatcher.add(file(3, None));
        dispatcher.add(file(4, Some(&[push(&guid(1)), push(&guid(2)), Opcode::And, Opcode::End])));

        let mut installed = Vec::new();
        let passes = run(&mut dispatcher, &mut installed);
        assert_eq!(passes, vec![vec![guid(2), guid(3)], vec![guid(1)], vec![guid(4)]]);
        assert!(dispatcher.report().failed.is_empty());
    }

    #[test]
    fn after_an_already_dispatched_target_still_runs() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(file(1, None));
        let mut installed = Vec::new();
        run(&mut dispatcher, &mut installed);

        dispatcher.add(file(5, Some(&[after(&guid(1)), Opcode::End])));
        dispatcher.add(file(6, Some(&[before(&guid(1)), Opcode::End])));
        let passes = run(&mut dispatcher, &mut installed);
        assert_eq!(passes, vec![vec![guid(5)]]);
        assert_eq!(dispatcher.report().failed, vec![(guid(6), DispatchFailure::Unsatisfied)]);
    }

    #[test]
    fn malformed_expressions_never_run() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(file(1, Some(&[Opcode::True])));
        dispatcher.add(file(2, Some(&[Opcode::And, Opcode::End])));
        assert!(dispatcher.next_batch(&Vec::<efi::Guid>::new()).is_empty());
        assert_eq!(dispatcher.pending_count(), 0);
        let report = dispatcher.report();
        assert_eq!(report.failure_of(&guid(1)), Some(DispatchFailure::Depex(DepexError::MissingEnd)));
        assert_eq!(report.failure_of(&guid(2)), Some(DispatchFailure::Depex(DepexError::StackUnderflow)));
    }

    #[test]
    fn constraint_cycles_are_reported() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(file(1, Some(&[after(&guid(2)), Opcode::End])));
        dispatcher.add(file(2, Some(&[after(&guid(1)), Opcode::End])));
        dispatcher.add(file(3, Some(&[push(&guid(9)), Opcode::End])));
        let mut installed = Vec::new();
        assert!(run(&mut dispatcher, &mut installed).is_empty());

        let report = dispatcher.report();
        assert_eq!(report.failure_of(&guid(1)), Some(DispatchFailure::Cycle));
        assert_eq!(report.failure_of(&guid(2)), Some(DispatchFailure::Cycle));
        assert_eq!(report.failure_of(&guid(3)), Some(DispatchFailure::Unsatisfied));
    }

    #[test]
    fn schedule_on_request_waits_for_schedule() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(file(1, Some(&[Opcode::Sor, Opcode::True, Opcode::End])));
        assert!(dispatcher.next_batch(&Vec::<efi::Guid>::new()).is_empty());
        assert_eq!(dispatcher.schedule(&guid(2)), Err(EfiError::NotFound));
        dispatcher.schedule(&guid(1)).unwrap();
        assert_eq!(names(&dispatcher.next_batch(&Vec::<efi::Guid>::new())), vec![guid(1)]);
    }

    #[test]
    fn implicit_dependency_gates_files_without_expression() {
        let mut dispatcher =
            Dispatcher::new().with_implicit_dependency(Depex::from(&[push(&guid(8)), Opcode::End][..]));
        assert!(dispatcher.add(file(1, None)));
        assert!(!dispatcher.add(file(1, None)));
        assert!(dispatcher.next_batch(&Vec::<efi::Guid>::new()).is_empty());
        assert_eq!(names(&dispatcher.next_batch(&vec![guid(8)])), vec![guid(1)]);
    }

    #[test]
    fn failed_starts_are_reported() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(file(1, None));
        let batch = dispatcher.next_batch(&Vec::<efi::Guid>::new());
        dispatcher.complete(batch[0].name, Err(DispatchFailure::Load(EfiError::LoadError)));
        let report = dispatcher.report();
        assert!(report.dispatched.is_empty());
        assert_eq!(report.failed, vec![(guid(1), DispatchFailure::Load(EfiError::LoadError))]);
        assert!(!dispatcher.is_dispatched(&guid(1)));
    }
}
