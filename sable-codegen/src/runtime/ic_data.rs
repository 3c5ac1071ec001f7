use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::il::{DeoptId, Function, FunctionId};
use crate::object_model::{ClassId, Symbol};
use crate::runtime::ArgumentsDescriptor;

#[derive(Clone, Debug)]
pub struct ICCheck {
    pub class_ids: Vec<ClassId>,
    pub target: Arc<Function>,
    pub count: usize,
}

/// Receiver classes observed at one call site. Append-only: the runtime adds
/// checks on cache misses, entries are never removed.
pub struct ICData {
    pub owner: FunctionId,
    pub target_name: Symbol,
    pub arguments_descriptor: Arc<ArgumentsDescriptor>,
    pub deopt_id: DeoptId,
    pub num_args_tested: usize,
    checks: Mutex<Vec<ICCheck>>,
}

impl ICData {
    pub fn new(
        owner: FunctionId,
        target_name: Symbol,
        arguments_descriptor: Arc<ArgumentsDescriptor>,
        deopt_id: DeoptId,
        num_args_tested: usize,
    ) -> ICData {
        ICData {
            owner,
            target_name,
            arguments_descriptor,
            deopt_id,
            num_args_tested,
            checks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_check(&self, class_ids: Vec<ClassId>, target: Arc<Function>) {
        assert_eq!(class_ids.len(), self.num_args_tested);
        let mut checks = self.checks.lock();

        if let Some(check) = checks.iter_mut().find(|check| check.class_ids == class_ids) {
            check.count += 1;
            return;
        }

        checks.push(ICCheck {
            class_ids,
            target,
            count: 1,
        });
    }

    /// Static calls record their single target without receiver classes.
    pub fn add_target(&self, target: Arc<Function>) {
        assert_eq!(self.num_args_tested, 0);
        let mut checks = self.checks.lock();

        if checks.is_empty() {
            checks.push(ICCheck {
                class_ids: Vec::new(),
                target,
                count: 0,
            });
        }
    }

    pub fn number_of_checks(&self) -> usize {
        self.checks.lock().len()
    }

    pub fn checks(&self) -> Vec<ICCheck> {
        self.checks.lock().clone()
    }

    pub fn aggregate_count(&self) -> usize {
        self.checks.lock().iter().map(|check| check.count).sum()
    }

    /// Checks ordered by descending count, ties keep insertion order.
    pub fn sorted_by_count(&self) -> Vec<ICCheck> {
        let mut checks = self.checks();
        checks.sort_by(|l, r| r.count.cmp(&l.count));
        checks
    }

    pub fn is_megamorphic(&self, max_checks: usize) -> bool {
        self.number_of_checks() > max_checks
    }
}

impl fmt::Debug for ICData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ICData")
            .field("target_name", &self.target_name)
            .field("deopt_id", &self.deopt_id)
            .field("num_args_tested", &self.num_args_tested)
            .field("checks", &self.number_of_checks())
            .finish()
    }
}
