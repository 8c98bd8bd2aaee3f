//! Priority ordered stack of auxiliary constraint tasks.
//!
//! Tasks are layered beneath the primary twist tracking objective. The stack keeps them
//! sorted by ascending priority value (lower value = more important), lets the controller
//! switch them on and off, and offers a cursor to visit the active ones in order.

use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Auxiliary constraint task: a Jacobian block with its target vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Task<P> {
    pub priority: P,
    pub id: String,
    pub task_jacobian: DMatrix<f64>,
    pub task: DVector<f64>,
    pub is_active: bool,
}

impl<P> Task<P> {
    /// Active task with empty Jacobian and target.
    pub fn new(priority: P, id: impl Into<String>) -> Self {
        Self::with_task(priority, id, DMatrix::zeros(0, 0), DVector::zeros(0))
    }

    /// Active task with the given Jacobian block and target.
    pub fn with_task(priority: P, id: impl Into<String>, task_jacobian: DMatrix<f64>, task: DVector<f64>) -> Self {
        Self { priority, id: id.into(), task_jacobian, task, is_active: true }
    }

    pub fn set_priority(&mut self, priority: P) {
        self.priority = priority;
    }
}

/// Position of a task inside a [`TaskStackController`]. Handles are invalidated by any
/// insertion or clearing of the stack; a stale handle no longer resolves to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    index: usize,
    generation: u64,
}

impl TaskHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Stack of tasks kept sorted by ascending priority, with unique identifiers.
///
/// # Iteration
///
/// The stack owns a cursor. [`begin_task_iter`](Self::begin_task_iter) moves it to the first
/// task; every [`next_active_task`](Self::next_active_task) call returns the next active task
/// at or after the cursor and moves the cursor past it, or `None` once the end is reached.
/// Without a new `begin_task_iter` the scan resumes where it stopped, so a traversal can be
/// split across several calls. A scan that has reached the end keeps returning `None` until
/// it is restarted. Modifying the stack from another place while a scan is in progress is
/// not supported.
#[derive(Debug, Clone)]
pub struct TaskStackController<P> {
    tasks: Vec<Task<P>>,
    /// `None` is the end sentinel.
    cursor: Option<usize>,
    /// Bumped whenever task positions shift.
    generation: u64,
}

/// Task stack with unsigned integer priorities.
pub type DefaultTaskStack = TaskStackController<u32>;

impl<P: Ord> Default for TaskStackController<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Ord> TaskStackController<P> {
    /// Empty stack with the cursor at its beginning.
    pub fn new() -> Self {
        Self { tasks: Vec::new(), cursor: Some(0), generation: 0 }
    }

    /// Inserts the task keeping the stack sorted. Tasks of equal priority stay in arrival
    /// order. If a task with the same id already exists only its Jacobian and target are
    /// replaced; its priority, activation and position are kept.
    pub fn add_task(&mut self, task: Task<P>) {
        if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            existing.task_jacobian = task.task_jacobian;
            existing.task = task.task;
            return;
        }

        let position = self
            .tasks
            .iter()
            .position(|t| task.priority < t.priority)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(position, task);
        self.generation += 1;

        // Keep a paused scan from revisiting the task it already passed.
        if let Some(cursor) = self.cursor.as_mut() {
            if position < *cursor {
                *cursor += 1;
            }
        }
    }

    pub fn activate_all_tasks(&mut self) {
        self.tasks.iter_mut().for_each(|t| t.is_active = true);
    }

    pub fn deactivate_all_tasks(&mut self) {
        self.tasks.iter_mut().for_each(|t| t.is_active = false);
    }

    /// Activates the first task (lowest priority value) only. Other tasks are not touched.
    pub fn activate_highest_prio_task(&mut self) {
        if let Some(task) = self.tasks.first_mut() {
            warn!("Activation of highest prio task in stack: {}", task.id);
            task.is_active = true;
        }
    }

    /// Deactivates the task with the given id; unknown ids are ignored.
    pub fn deactivate_task(&mut self, task_id: &str) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.is_active = false;
        }
    }

    /// Deactivates the task at `handle`; stale handles are ignored.
    pub fn deactivate_task_at(&mut self, handle: TaskHandle) {
        match self.get_mut(handle) {
            Some(task) => task.is_active = false,
            None => warn!("Stale task handle {} ignored", handle.index),
        }
    }

    fn handle(&self, index: usize) -> TaskHandle {
        TaskHandle { index, generation: self.generation }
    }

    /// Moves the cursor to the first task. Returns the handle of the first task, if any.
    pub fn begin_task_iter(&mut self) -> Option<TaskHandle> {
        self.cursor = Some(0);
        if self.tasks.is_empty() { None } else { Some(self.handle(0)) }
    }

    /// Next active task at or after the cursor, moving the cursor past it.
    pub fn next_active_task(&mut self) -> Option<(TaskHandle, &Task<P>)> {
        let start = self.cursor?;
        match self.tasks.iter().skip(start).position(|t| t.is_active) {
            Some(offset) => {
                let index = start + offset;
                self.cursor = Some(index + 1);
                Some((self.handle(index), &self.tasks[index]))
            }
            None => {
                self.cursor = None;
                None
            }
        }
    }

    /// Removes all tasks and moves the cursor to the end sentinel.
    pub fn clear_all_tasks(&mut self) {
        self.tasks.clear();
        self.cursor = None;
        self.generation += 1;
    }

    /// All tasks, sorted by ascending priority.
    pub fn tasks(&self) -> &[Task<P>] {
        &self.tasks
    }

    /// Task at `handle`, `None` if the handle is stale or out of range.
    pub fn get(&self, handle: TaskHandle) -> Option<&Task<P>> {
        if handle.generation != self.generation {
            return None;
        }
        self.tasks.get(handle.index)
    }

    pub fn get_mut(&mut self, handle: TaskHandle) -> Option<&mut Task<P>> {
        if handle.generation != self.generation {
            return None;
        }
        self.tasks.get_mut(handle.index)
    }

    pub fn find(&self, task_id: &str) -> Option<TaskHandle> {
        self.tasks.iter().position(|t| t.id == task_id).map(|index| self.handle(index))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether the cursor has reached the end sentinel.
    pub fn iteration_finished(&self) -> bool {
        self.cursor.map_or(true, |c| c >= self.tasks.len())
    }
}
