//! Flow graph construction.
//!
//! [`FlowBuilder`] accumulates tasks into a petgraph `DiGraph` and hands out
//! [`TaskHandle`]s that later tasks list as dependencies. Edges point from a
//! dependency to its dependent. Conditions are evaluated once, at build
//! time, so the compiled [`Flow`] is a static DAG.

use std::collections::HashSet;
use std::future::Future;

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tokio_util::sync::CancellationToken;

use crate::core::task::{boxed_action, ActionResult, FlowId, RetryPolicy, Task, TaskHandle};
use crate::error::{Error, Result};

/// Accumulates tasks and their dependencies.
///
/// # Example
///
/// ```ignore
/// let mut builder = FlowBuilder::new("Shoot cluster creation");
/// let namespace = builder.add_task("deploy-namespace", deploy_namespace, RetryPolicy::every(retry), &[])?;
/// let secrets = builder.add_task("deploy-secrets", deploy_secrets, RetryPolicy::once(), &[namespace])?;
/// let flow = builder.build()?;
/// ```
pub struct FlowBuilder {
    id: FlowId,
    name: String,
    graph: DiGraph<Task, ()>,
    names: HashSet<String>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: FlowId::new(),
            name: name.into(),
            graph: DiGraph::new(),
            names: HashSet::new(),
        }
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    /// Register an unconditional task.
    ///
    /// # Errors
    /// Returns an error if `name` is already registered or any dependency
    /// handle was issued by a different flow.
    pub fn add_task<F, Fut>(
        &mut self,
        name: &str,
        action: F,
        retry: impl Into<RetryPolicy>,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        self.insert(name, action, retry.into(), true, dependencies)
    }

    /// Register a task that only runs when `condition` holds.
    ///
    /// A false condition marks the task Skipped before execution starts,
    /// whatever its dependencies end up doing. Dependents treat a skipped
    /// task as satisfied.
    pub fn add_conditional_task<F, Fut>(
        &mut self,
        name: &str,
        action: F,
        retry: impl Into<RetryPolicy>,
        condition: bool,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        self.insert(name, action, retry.into(), condition, dependencies)
    }

    fn insert<F, Fut>(
        &mut self,
        name: &str,
        action: F,
        retry: RetryPolicy,
        condition: bool,
        dependencies: &[TaskHandle],
    ) -> Result<TaskHandle>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        if self.names.contains(name) {
            return Err(Error::DuplicateTask(name.to_string()));
        }
        for dep in dependencies {
            self.validate_handle(name, dep)?;
        }

        let index = self
            .graph
            .add_node(Task::new(name, boxed_action(action), retry, condition));
        for dep in dependencies {
            // update_edge collapses handles listed twice
            self.graph.update_edge(dep.index, index, ());
        }
        self.names.insert(name.to_string());

        tracing::trace!(
            flow = %self.name,
            task = %name,
            dependencies = dependencies.len(),
            condition,
            "registered task"
        );

        Ok(TaskHandle {
            flow: self.id,
            index,
        })
    }

    fn validate_handle(&self, task: &str, handle: &TaskHandle) -> Result<()> {
        if handle.flow != self.id {
            return Err(Error::ForeignTaskHandle {
                task: task.to_string(),
                handle_flow: handle.flow,
            });
        }
        if self.graph.node_weight(handle.index).is_none() {
            return Err(Error::UnknownDependency {
                task: task.to_string(),
            });
        }
        Ok(())
    }

    /// Number of tasks registered so far.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Validate the structure and compile the flow.
    ///
    /// # Errors
    /// Returns an error if the dependency relation contains a cycle.
    pub fn build(self) -> Result<Flow> {
        if is_cyclic_directed(&self.graph) {
            let at = toposort(&self.graph, None)
                .err()
                .and_then(|cycle| self.graph.node_weight(cycle.node_id()))
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(Error::CyclicDependency(at));
        }

        tracing::debug!(
            flow = %self.name,
            tasks = self.graph.node_count(),
            dependencies = self.graph.edge_count(),
            "flow built"
        );

        Ok(Flow {
            id: self.id,
            name: self.name,
            graph: self.graph,
        })
    }
}

impl std::fmt::Debug for FlowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBuilder")
            .field("name", &self.name)
            .field("tasks", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}

/// A validated, immutable task graph.
///
/// Built once per reconcile attempt, executed once, then discarded.
pub struct Flow {
    id: FlowId,
    name: String,
    graph: DiGraph<Task, ()>,
}

impl Flow {
    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of tasks in the flow.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the flow.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Tasks whose condition was false at build time.
    pub fn skipped_count(&self) -> usize {
        self.graph.node_weights().filter(|t| t.is_skipped()).count()
    }

    /// Tasks that will actually execute; the denominator for progress.
    pub fn runnable_count(&self) -> usize {
        self.task_count() - self.skipped_count()
    }

    /// Get a task by handle, if the handle belongs to this flow.
    pub fn task(&self, handle: &TaskHandle) -> Option<&Task> {
        if handle.flow != self.id {
            return None;
        }
        self.graph.node_weight(handle.index)
    }

    /// Look up a task's handle by name.
    pub fn handle_of(&self, name: &str) -> Option<TaskHandle> {
        self.graph
            .node_indices()
            .find(|&i| self.graph[i].name() == name)
            .map(|index| TaskHandle {
                flow: self.id,
                index,
            })
    }

    /// Names of the tasks the given task depends on.
    pub fn dependencies_of(&self, handle: &TaskHandle) -> Vec<&str> {
        self.neighbors(handle, Direction::Incoming)
    }

    /// Names of the tasks depending on the given task.
    pub fn dependents_of(&self, handle: &TaskHandle) -> Vec<&str> {
        self.neighbors(handle, Direction::Outgoing)
    }

    fn neighbors(&self, handle: &TaskHandle, direction: Direction) -> Vec<&str> {
        if self.task(handle).is_none() {
            return Vec::new();
        }
        self.graph
            .neighbors_directed(handle.index, direction)
            .filter_map(|n| self.graph.node_weight(n))
            .map(|t| t.name())
            .collect()
    }

    /// Task names in an order where every task follows its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let task_name = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.name.as_str())
                .unwrap_or("unknown");
            Error::CyclicDependency(task_name.to_string())
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .map(|t| t.name())
            .collect())
    }

    pub(crate) fn graph(&self) -> &DiGraph<Task, ()> {
        &self.graph
    }

    pub(crate) fn in_degree(&self, index: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(index, Direction::Incoming)
            .count()
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
