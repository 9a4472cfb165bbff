//! Explicit task registration.
//!
//! Tasks are added one call at a time through [`TaskRegistryBuilder`], either
//! individually or as a [`TaskGroup`]. The finished [`TaskRegistry`] is passed
//! to the server; there is no global instance.
//!
//! ```rust
//! use routines_server::registry::{Task, TaskGroup, TaskRegistry};
//!
//! let registry = TaskRegistry::builder()
//!     .task(Task::new("Reports", "Rebuild index", |stream, _args| {
//!         stream.send_line("rebuilding");
//!         Ok(())
//!     }))
//!     .group(TaskGroup::new("Cache").task("Flush", |stream, _args| {
//!         stream.send_line("flushed");
//!         Ok(())
//!     }))
//!     .build()
//!     .unwrap();
//!
//! assert!(registry.get("reports_rebuild_index").is_some());
//! assert!(registry.get("cache_flush").is_some());
//! ```

use crate::config::RoutineSettings;
use crate::error::{Result, ServerError};
use crate::stream::Stream;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The group tasks land in when none is named.
pub const DEFAULT_GROUP: &str = "Main";

/// A task body. It receives the run's [`Stream`] and the decoded arguments.
pub type Callback = Arc<dyn Fn(&mut Stream, &[Value]) -> anyhow::Result<()> + Send + Sync>;

/// One named unit of work.
#[derive(Clone)]
pub struct Task {
    group: String,
    title: String,
    action: String,
    priority: i32,
    settings: RoutineSettings,
    callback: Callback,
}

impl Task {
    pub fn new<F>(group: impl Into<String>, title: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut Stream, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            group: group.into(),
            title: title.into(),
            action: String::new(),
            priority: 10,
            settings: RoutineSettings::default(),
            callback: Arc::new(callback),
        }
    }

    /// Lower priorities are listed first. Defaults to 10.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides limits or banners for this task only.
    pub fn settings(mut self, settings: RoutineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Routing key, assigned when the registry is built.
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn registered_settings(&self) -> RoutineSettings {
        self.settings
    }

    pub fn call(&self, stream: &mut Stream, args: &[Value]) -> anyhow::Result<()> {
        (self.callback)(stream, args)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("group", &self.group)
            .field("title", &self.title)
            .field("action", &self.action)
            .field("priority", &self.priority)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Several tasks sharing a group name, priority and settings.
///
/// Group settings sit beneath each task's own, which is how a whole group
/// turns its banners off.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    name: String,
    priority: i32,
    settings: RoutineSettings,
    tasks: Vec<Task>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 10,
            settings: RoutineSettings::default(),
            tasks: Vec::new(),
        }
    }

    /// Priority for tasks added after this call.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn settings(mut self, settings: RoutineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn task<F>(mut self, title: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut Stream, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let task = Task::new(self.name.clone(), title, callback).priority(self.priority);
        self.tasks.push(task);
        self
    }

    /// Adds a prepared task, moving it into this group.
    pub fn add(mut self, mut task: Task) -> Self {
        task.group = self.name.clone();
        self.tasks.push(task);
        self
    }

    fn into_tasks(self) -> impl Iterator<Item = Task> {
        let settings = self.settings;
        self.tasks.into_iter().map(move |mut task| {
            task.settings = settings.merge(task.settings);
            task
        })
    }
}

#[derive(Default)]
pub struct TaskRegistryBuilder {
    tasks: Vec<Task>,
}

impl TaskRegistryBuilder {
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn group(mut self, group: TaskGroup) -> Self {
        self.tasks.extend(group.into_tasks());
        self
    }

    /// Fills in default group and titles, assigns action keys and fixes the
    /// listing order.
    ///
    /// Fails if two tasks end up with the same action.
    pub fn build(self) -> Result<TaskRegistry> {
        let mut group_order: Vec<String> = Vec::new();
        let mut slot_counts: HashMap<(String, i32), usize> = HashMap::new();
        let mut tasks = Vec::with_capacity(self.tasks.len());

        for mut task in self.tasks {
            if task.group.trim().is_empty() {
                task.group = DEFAULT_GROUP.to_string();
            }
            let slot = slot_counts
                .entry((task.group.clone(), task.priority))
                .or_default();
            *slot += 1;
            if task.title.trim().is_empty() {
                task.title = format!("Task #{slot}");
            }
            task.action = action_key(&task.group, &task.title);
            if !group_order.contains(&task.group) {
                group_order.push(task.group.clone());
            }
            tasks.push(task);
        }

        // Stable, so equal priorities keep insertion order.
        tasks.sort_by_key(|task| {
            let group_rank = group_order.iter().position(|g| *g == task.group);
            (group_rank, task.priority)
        });

        let mut by_action = HashMap::with_capacity(tasks.len());
        for (index, task) in tasks.iter().enumerate() {
            if let Some(previous) = by_action.insert(task.action.clone(), index) {
                return Err(ServerError::DuplicateAction {
                    action: task.action.clone(),
                    first: format!("{} / {}", tasks[previous].group, tasks[previous].title),
                    second: format!("{} / {}", task.group, task.title),
                });
            }
        }

        Ok(TaskRegistry {
            tasks: tasks.into_iter().map(Arc::new).collect(),
            by_action,
        })
    }
}

/// All registered tasks, in listing order.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<Task>>,
    by_action: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    pub fn get(&self, action: &str) -> Option<&Arc<Task>> {
        self.by_action.get(action).map(|&index| &self.tasks[index])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks grouped for display.
    pub fn listing(&self) -> Vec<GroupListing> {
        let mut groups: Vec<GroupListing> = Vec::new();
        for task in &self.tasks {
            let entry = TaskListing {
                title: task.title.clone(),
                action: task.action.clone(),
                priority: task.priority,
            };
            match groups.last_mut() {
                Some(group) if group.name == task.group => group.tasks.push(entry),
                _ => groups.push(GroupListing {
                    name: task.group.clone(),
                    tasks: vec![entry],
                }),
            }
        }
        groups
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupListing {
    pub name: String,
    pub tasks: Vec<TaskListing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskListing {
    pub title: String,
    pub action: String,
    pub priority: i32,
}

/// Lowercases `text` and collapses every run of other characters into a
/// single `_`, trimming it from both ends.
pub fn slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c);
        } else {
            pending_separator = true;
        }
    }
    slug
}

/// The routing key for a task: `slug(group)_slug(title)`.
pub fn action_key(group: &str, title: &str) -> String {
    format!("{}_{}", slug(group), slug(title))
}
