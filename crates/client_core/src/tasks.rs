//! Workspaces and the kanban board of the selected workspace.

use std::sync::Arc;

use shared::{
    domain::{Task, TaskId, TaskStatus, User, UserId, Workspace, WorkspaceId},
    protocol::{NewWorkspace, TaskDraft, TaskUpdate},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    api::ChatBackend,
    error::{ClientError, ClientResult},
    session::Session,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

#[derive(Default)]
struct BoardState {
    workspaces: Vec<Workspace>,
    selected: Option<WorkspaceId>,
    generation: u64,
    tasks: Vec<Task>,
}

impl BoardState {
    fn columns(&self) -> Vec<Column> {
        TaskStatus::ALL
            .into_iter()
            .map(|status| Column {
                status,
                tasks: self
                    .tasks
                    .iter()
                    .filter(|task| task.status == status)
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    fn task_mut(&mut self, task_id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| &task.id == task_id)
    }
}

pub struct TaskBoard {
    backend: Arc<dyn ChatBackend>,
    session: Session,
    inner: Mutex<BoardState>,
}

impl TaskBoard {
    pub fn new(backend: Arc<dyn ChatBackend>, session: Session) -> Self {
        Self {
            backend,
            session,
            inner: Mutex::new(BoardState::default()),
        }
    }

    pub async fn load_workspaces(&self) -> ClientResult<Vec<Workspace>> {
        let workspaces = self.backend.fetch_workspaces(&self.session.token).await?;
        debug!(count = workspaces.len(), "tasks: workspaces loaded");
        self.inner.lock().await.workspaces = workspaces.clone();
        Ok(workspaces)
    }

    pub async fn workspaces(&self) -> Vec<Workspace> {
        self.inner.lock().await.workspaces.clone()
    }

    /// The owner is filled in by the backend from the bearer token.
    pub async fn create_workspace(
        &self,
        name: &str,
        description: &str,
        members: Vec<UserId>,
    ) -> ClientResult<Workspace> {
        if name.trim().is_empty() {
            return Err(ClientError::validation("Workspace name is required."));
        }
        let request = NewWorkspace {
            name: name.trim().to_string(),
            description: description.to_string(),
            owner: String::new(),
            members,
        };
        let created = self
            .backend
            .create_workspace(&self.session.token, &request)
            .await?;
        info!(workspace_id = %created.id, "tasks: workspace created");
        self.inner.lock().await.workspaces.push(created.clone());
        Ok(created)
    }

    /// Makes `workspace_id` the open board and loads its tasks. A response
    /// for a workspace that was deselected in the meantime is dropped.
    pub async fn select_workspace(&self, workspace_id: &WorkspaceId) -> ClientResult<Vec<Column>> {
        let generation = {
            let mut guard = self.inner.lock().await;
            guard.generation += 1;
            guard.selected = Some(workspace_id.clone());
            guard.tasks.clear();
            guard.generation
        };

        let tasks = self
            .backend
            .fetch_tasks(&self.session.token, workspace_id)
            .await?;

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            debug!(%workspace_id, "tasks: discarding stale board load");
            return Ok(guard.columns());
        }
        guard.tasks = tasks;
        Ok(guard.columns())
    }

    pub async fn selected_workspace(&self) -> Option<WorkspaceId> {
        self.inner.lock().await.selected.clone()
    }

    pub async fn columns(&self) -> Vec<Column> {
        self.inner.lock().await.columns()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.lock().await.tasks.clone()
    }

    pub async fn create_task(&self, draft: TaskDraft) -> ClientResult<Task> {
        if draft.title.trim().is_empty() {
            return Err(ClientError::validation("Title is required."));
        }
        let created = self.backend.create_task(&self.session.token, &draft).await?;
        info!(task_id = %created.id, status = created.status.as_str(), "tasks: task created");

        let mut guard = self.inner.lock().await;
        if guard.selected.as_ref() == Some(&created.workspace_id) {
            guard.tasks.push(created.clone());
        }
        Ok(created)
    }

    pub async fn update_task(&self, task_id: &TaskId, update: TaskUpdate) -> ClientResult<Task> {
        if update.title.trim().is_empty() {
            return Err(ClientError::validation("Title is required."));
        }
        let updated = self
            .backend
            .update_task(&self.session.token, task_id, &update)
            .await?;

        if let Some(task) = self.inner.lock().await.task_mut(task_id) {
            *task = updated.clone();
        }
        Ok(updated)
    }

    /// Drag-and-drop: the task changes column immediately and is put back if
    /// the backend refuses the change.
    pub async fn move_task(&self, task_id: &TaskId, status: TaskStatus) -> ClientResult<Task> {
        let (previous, update) = {
            let mut guard = self.inner.lock().await;
            let task = guard
                .task_mut(task_id)
                .ok_or_else(|| ClientError::validation(format!("Unknown task '{task_id}'.")))?;
            if task.status == status {
                return Ok(task.clone());
            }
            let previous = task.status;
            task.status = status;
            (previous, TaskUpdate::from_task(task))
        };

        match self
            .backend
            .update_task(&self.session.token, task_id, &update)
            .await
        {
            Ok(updated) => {
                if let Some(task) = self.inner.lock().await.task_mut(task_id) {
                    *task = updated.clone();
                }
                debug!(%task_id, status = status.as_str(), "tasks: task moved");
                Ok(updated)
            }
            Err(err) => {
                warn!(%task_id, "tasks: move rejected, restoring column: {err}");
                if let Some(task) = self.inner.lock().await.task_mut(task_id) {
                    if task.status == status {
                        task.status = previous;
                    }
                }
                Err(err)
            }
        }
    }

    /// Candidates for workspace membership and task assignment.
    pub async fn list_users(&self) -> ClientResult<Vec<User>> {
        self.backend.list_users(&self.session.token).await
    }
}

#[cfg(test)]
#[path = "tests/tasks_tests.rs"]
mod tests;
