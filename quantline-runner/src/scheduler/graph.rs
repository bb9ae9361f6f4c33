//! TaskGraph: validated, immutable DAG of tasks.
//!
//! Construction rejects duplicate names, self-dependencies, unknown
//! dependencies and cycles. The resulting graph keeps declaration order and
//! exposes a deterministic topological order in which, among tasks whose
//! dependencies are all placed, higher priority comes first and ties fall
//! back to declaration order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::error::DependencyError;
use super::task::{Priority, Task};

pub struct TaskGraph<T> {
    tasks: Vec<Task<T>>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl<T> TaskGraph<T> {
    pub fn new(mut tasks: Vec<Task<T>>) -> Result<Self, DependencyError> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter_mut().enumerate() {
            task.dedup_dependencies();
            if index.insert(task.name().to_string(), i).is_some() {
                return Err(DependencyError::DuplicateTask {
                    name: task.name().to_string(),
                });
            }
        }

        let mut dependencies = vec![Vec::new(); tasks.len()];
        let mut dependents = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            for dep in task.dependencies() {
                if dep == task.name() {
                    return Err(DependencyError::SelfDependency {
                        task: task.name().to_string(),
                    });
                }
                let &d = index
                    .get(dep)
                    .ok_or_else(|| DependencyError::MissingDependency {
                        task: task.name().to_string(),
                        dependency: dep.clone(),
                    })?;
                dependencies[i].push(d);
                dependents[d].push(i);
            }
        }

        let mut graph = Self {
            tasks,
            index,
            dependencies,
            dependents,
            order: Vec::new(),
        };
        graph.order = graph.priority_order()?;
        Ok(graph)
    }

    /// Kahn's algorithm with a (priority, declaration index) heap.
    fn priority_order(&self) -> Result<Vec<usize>, DependencyError> {
        let n = self.tasks.len();
        let mut remaining: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<(Priority, usize)>> = (0..n)
            .filter(|&i| remaining[i] == 0)
            .map(|i| Reverse((self.tasks[i].priority(), i)))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse((_, i))) = ready.pop() {
            order.push(i);
            for &d in &self.dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.push(Reverse((self.tasks[d].priority(), d)));
                }
            }
        }

        if order.len() < n {
            let path = self.find_cycle(&remaining);
            return Err(DependencyError::Cycle { path });
        }
        Ok(order)
    }

    /// Walk dependency edges among unplaced tasks until a node repeats.
    /// Every unplaced task has an unplaced dependency, so the walk must loop.
    fn find_cycle(&self, remaining: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.tasks.len()).find(|&i| remaining[i] > 0) else {
            return Vec::new();
        };

        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut walk = Vec::new();
        let mut current = start;
        loop {
            if let Some(&at) = position.get(&current) {
                // walk[at..] is the cycle; report it in execution direction
                let mut cycle: Vec<String> = walk[at..]
                    .iter()
                    .rev()
                    .map(|&i: &usize| self.tasks[i].name().to_string())
                    .collect();
                cycle.push(cycle[0].clone());
                return cycle;
            }
            position.insert(current, walk.len());
            walk.push(current);
            match self.dependencies[current]
                .iter()
                .copied()
                .find(|&d| remaining[d] > 0)
            {
                Some(next) => current = next,
                None => return vec![self.tasks[current].name().to_string()],
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> &[Task<T>] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&Task<T>> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    /// Task names in priority-aware topological order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.tasks[i].name()).collect()
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    pub(crate) fn dependencies_of(&self, i: usize) -> &[usize] {
        &self.dependencies[i]
    }

    pub(crate) fn dependents_of(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }
}
