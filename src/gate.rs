//! Read-only acceptance criteria checks behind the two completion gates.
//!
//! The repository loads a consistent snapshot inside its write transaction
//! and hands it here; nothing in this module touches storage.

use crate::error::{BlockedTask, BlockingCriterion, Error, GateReport, GateTarget, Result};
use crate::models::{AcStatus, AcceptanceCriteria, Task};

/// Collects the blocking criteria of one task, or `None` if it may complete.
pub fn blocked_task(task: &Task, criteria: &[AcceptanceCriteria]) -> Option<BlockedTask> {
    let mut unverified = Vec::new();
    let mut failed = Vec::new();

    for ac in criteria.iter().filter(|ac| ac.status.is_blocking()) {
        let entry = BlockingCriterion {
            id: ac.id.clone(),
            task_id: task.id.clone(),
            description: ac.description.clone(),
            status: ac.status,
            notes: ac.notes.clone(),
        };
        if ac.status == AcStatus::Failed {
            failed.push(entry);
        } else {
            unverified.push(entry);
        }
    }

    if unverified.is_empty() && failed.is_empty() {
        return None;
    }
    Some(BlockedTask {
        task_id: task.id.clone(),
        task_title: task.title.clone(),
        unverified,
        failed,
    })
}

/// Task completion gate.
pub fn check_task(task: &Task, criteria: &[AcceptanceCriteria]) -> Result<()> {
    match blocked_task(task, criteria) {
        Some(blocked) => Err(Error::GateBlocked(GateReport {
            target: GateTarget::Task,
            tasks: vec![blocked],
        })),
        None => Ok(()),
    }
}

/// Iteration completion gate: every member task must pass the task gate.
/// Blocked tasks are reported in the order given.
pub fn check_iteration<'a, I>(number: i64, members: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a Task, &'a [AcceptanceCriteria])>,
{
    let tasks: Vec<BlockedTask> = members
        .into_iter()
        .filter_map(|(task, criteria)| blocked_task(task, criteria))
        .collect();

    if tasks.is_empty() {
        Ok(())
    } else {
        Err(Error::GateBlocked(GateReport {
            target: GateTarget::Iteration(number),
            tasks,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{CreateAcInput, CreateTaskInput};

    fn task(id: &str) -> Task {
        Task::new(
            id,
            CreateTaskInput {
                track_id: "TP-track-1".to_string(),
                title: format!("task {}", id),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn ac(id: &str, task_id: &str) -> AcceptanceCriteria {
        AcceptanceCriteria::new(
            id,
            CreateAcInput {
                task_id: task_id.to_string(),
                description: format!("criterion {}", id),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn task_without_criteria_passes() {
        assert!(check_task(&task("TP-task-1"), &[]).is_ok());
    }

    #[test]
    fn only_blocking_criteria_are_reported() {
        let t = task("TP-task-1");
        let mut verified = ac("TP-ac-1", &t.id);
        verified.verify(None, Utc::now());
        let mut skipped = ac("TP-ac-2", &t.id);
        skipped.skip("not applicable", Utc::now()).unwrap();
        let pending = ac("TP-ac-3", &t.id);
        let mut failed = ac("TP-ac-4", &t.id);
        failed.fail("wrong output", Utc::now()).unwrap();

        let err = check_task(&t, &[verified, skipped, pending, failed]).unwrap_err();
        let report = err.gate_report().unwrap();
        assert_eq!(report.target, GateTarget::Task);
        assert_eq!(report.criterion_ids(), vec!["TP-ac-3", "TP-ac-4"]);
        assert_eq!(report.tasks[0].failed[0].notes, "wrong output");
    }

    #[test]
    fn all_non_blocking_statuses_pass() {
        let t = task("TP-task-1");
        let mut a = ac("TP-ac-1", &t.id);
        a.verify_automatically(Some("ci".to_string()), Utc::now());
        let mut b = ac("TP-ac-2", &t.id);
        b.skip("duplicate", Utc::now()).unwrap();
        assert!(check_task(&t, &[a, b]).is_ok());
    }

    #[test]
    fn iteration_gate_groups_by_task() {
        let a = task("TP-task-1");
        let b = task("TP-task-2");
        let a_criteria = vec![ac("TP-ac-1", &a.id)];
        let b_criteria: Vec<AcceptanceCriteria> = Vec::new();

        let err = check_iteration(
            1,
            [(&a, a_criteria.as_slice()), (&b, b_criteria.as_slice())],
        )
        .unwrap_err();
        let report = err.gate_report().unwrap();
        assert_eq!(report.target, GateTarget::Iteration(1));
        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.tasks[0].task_id, "TP-task-1");
    }
}
