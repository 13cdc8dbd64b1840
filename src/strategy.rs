//! Parallel strategy (§4.6) and the post-execution finalization phase (§4.7).
//!
//! Distribution is pure and deterministic so it can be tested without any
//! agent machinery: task `i` always goes to agent `i mod num_agents`.

use crate::prompt::Task;
use std::collections::VecDeque;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("no agents available to distribute tasks to")]
    NoAgents,
    #[error("agent {0} has no more queued tasks")]
    QueueEmpty(usize),
}

/// Round-robin distribution: task `i` (0-indexed within `tasks`) is assigned
/// to agent `i % num_agents`. Every task appears in exactly one queue, and
/// every queue preserves the relative order of its assigned tasks.
pub fn distribute(tasks: &[Task], num_agents: usize) -> Result<Vec<VecDeque<Task>>, StrategyError> {
    if num_agents == 0 {
        return Err(StrategyError::NoAgents);
    }
    let mut queues: Vec<VecDeque<Task>> = (0..num_agents).map(|_| VecDeque::new()).collect();
    for (i, task) in tasks.iter().enumerate() {
        queues[i % num_agents].push_back(task.clone());
    }
    Ok(queues)
}

/// Per-agent FIFO task queue plus bookkeeping for how many tasks it has
/// completed, used by the monitor loop to decide when to send the next task
/// or declare the agent's queue exhausted.
pub struct AgentQueue {
    pub agent_id: usize,
    pub pending: VecDeque<Task>,
    pub completed: Vec<Task>,
}

impl AgentQueue {
    pub fn new(agent_id: usize, tasks: VecDeque<Task>) -> Self {
        Self {
            agent_id,
            pending: tasks,
            completed: Vec::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pop the next task to send, without marking the current one complete
    /// (callers mark completion explicitly once the agent reports done).
    pub fn peek_next(&self) -> Option<&Task> {
        self.pending.front()
    }

    pub fn advance(&mut self) -> Result<Task, StrategyError> {
        let task = self
            .pending
            .pop_front()
            .ok_or(StrategyError::QueueEmpty(self.agent_id))?;
        self.completed.push(task.clone());
        Ok(task)
    }
}

/// Build a message sent to an agent for a new task: the task's full content
/// plus its position among the agent's assigned tasks.
pub fn task_message(task: &Task, position: usize, total_for_agent: usize) -> String {
    format!(
        "Task {}/{} (#{}): {}",
        position + 1,
        total_for_agent,
        task.number,
        task.content
    )
}

/// Whether every agent queue has been fully drained — the strategy's
/// execute loop uses this to decide it's time to move to finalization.
pub fn all_queues_exhausted(queues: &[AgentQueue]) -> bool {
    queues.iter().all(AgentQueue::is_exhausted)
}

/// Default finalization task list (§4.7), used when no operator-specified
/// `finalization_tasks` override is configured.
pub fn default_finalization_tasks() -> Vec<String> {
    vec![
        "Review the merged project for consistency across contributions".into(),
        "Resolve any TODOs or leftover merge conflicts".into(),
        "Ensure the project builds and its test suite passes".into(),
        "Write or update the top-level README describing the result".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(n: usize) -> Vec<Task> {
        (1..=n as u32)
            .map(|i| Task {
                number: i,
                content: format!("task {i}"),
                description: format!("task {i}"),
                estimated_duration: None,
                dependencies: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn distribution_is_deterministic_round_robin() {
        let t = tasks(5);
        let queues = distribute(&t, 2).unwrap();
        let agent0: Vec<u32> = queues[0].iter().map(|t| t.number).collect();
        let agent1: Vec<u32> = queues[1].iter().map(|t| t.number).collect();
        assert_eq!(agent0, vec![1, 3, 5]);
        assert_eq!(agent1, vec![2, 4]);
    }

    #[test]
    fn distribution_covers_every_task_exactly_once() {
        let t = tasks(11);
        let queues = distribute(&t, 3).unwrap();
        let mut seen: Vec<u32> = queues.iter().flat_map(|q| q.iter().map(|t| t.number)).collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=11).collect::<Vec<_>>());
    }

    #[test]
    fn zero_agents_is_an_error() {
        let t = tasks(3);
        assert!(matches!(distribute(&t, 0), Err(StrategyError::NoAgents)));
    }

    #[test]
    fn agent_queue_advances_and_tracks_completed() {
        let t = tasks(2);
        let queues = distribute(&t, 1).unwrap();
        let mut queue = AgentQueue::new(0, queues.into_iter().next().unwrap());
        assert!(!queue.is_exhausted());
        let first = queue.advance().unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(queue.completed.len(), 1);
        queue.advance().unwrap();
        assert!(queue.is_exhausted());
        assert!(matches!(queue.advance(), Err(StrategyError::QueueEmpty(0))));
    }

    #[test]
    fn all_queues_exhausted_requires_every_agent_drained() {
        let t = tasks(3);
        let queues: Vec<AgentQueue> = distribute(&t, 2)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(id, q)| AgentQueue::new(id, q))
            .collect();
        assert!(!all_queues_exhausted(&queues));
    }

    #[test]
    fn task_message_reports_position_and_total() {
        let t = Task {
            number: 7,
            content: "do the thing".into(),
            description: "do the thing".into(),
            estimated_duration: None,
            dependencies: Vec::new(),
        };
        let msg = task_message(&t, 1, 3);
        assert_eq!(msg, "Task 2/3 (#7): do the thing");
    }

    #[test]
    fn default_finalization_tasks_are_nonempty() {
        assert!(!default_finalization_tasks().is_empty());
    }
}
