//! Sequential strategy: every task on the calling thread, in index order.

use super::{Strategy, StrategyRun, TaskPlan, execute_task};
use pacebench_core::StrategyKind;
use std::time::Instant;

/// Baseline strategy
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialStrategy;

impl Strategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    fn run(&self, plan: &TaskPlan) -> StrategyRun {
        let case = plan.workload.case;
        let param = plan.workload.param;

        let start = Instant::now();
        let outcomes = (0..plan.task_count)
            .map(|idx| execute_task(&case, param, idx))
            .collect();

        StrategyRun::Ran {
            wall_seconds: start.elapsed().as_secs_f64(),
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::test_support::sleeping;

    #[test]
    fn test_runs_every_task_in_order() {
        let plan = TaskPlan {
            workload: sleeping(2),
            task_count: 3,
            worker_count: 8,
        };
        let StrategyRun::Ran {
            wall_seconds,
            outcomes,
        } = SequentialStrategy.run(&plan)
        else {
            panic!("sequential strategy is always available");
        };
        assert_eq!(outcomes.len(), 3);
        let task_total: f64 = outcomes.iter().map(|o| *o.as_ref().unwrap()).sum();
        assert!(wall_seconds >= task_total);
    }
}
