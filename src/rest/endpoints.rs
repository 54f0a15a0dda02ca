//! Typed operations for each REST resource

use uuid::Uuid;

use crate::error::ApiError;

use super::client::{attachment_form, ApiClient};
use super::models::{
    Activity, Attachment, ChatMessage, ChatMessageRequest, ChatSession, Comment, DownloadUrl,
    Project, Task, TaskRequest, User,
};

impl ApiClient {
    // Projects

    pub async fn get_projects(&self) -> Result<Vec<Project>, ApiError> {
        self.get("/projects").await
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Project, ApiError> {
        self.get(&format!("/projects/{}", id)).await
    }

    pub async fn create_project(&self, project: &Project) -> Result<Project, ApiError> {
        self.post("/projects", project).await
    }

    pub async fn update_project(&self, id: Uuid, project: &Project) -> Result<Project, ApiError> {
        self.put(&format!("/projects/{}", id), project).await
    }

    pub async fn delete_project(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/projects/{}", id)).await
    }

    // Tasks

    pub async fn get_tasks(&self) -> Result<Vec<Task>, ApiError> {
        self.get("/tasks").await
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task, ApiError> {
        self.get(&format!("/tasks/id/{}", id)).await
    }

    pub async fn get_tasks_by_status(&self, status: &str) -> Result<Vec<Task>, ApiError> {
        self.get(&format!("/tasks/status/{}", status)).await
    }

    pub async fn get_tasks_by_project(&self, project_id: Uuid) -> Result<Vec<Task>, ApiError> {
        self.get(&format!("/tasks/projects/{}", project_id)).await
    }

    pub async fn create_task(&self, task: &TaskRequest) -> Result<Task, ApiError> {
        self.post("/tasks", task).await
    }

    pub async fn update_task(&self, id: Uuid, task: &TaskRequest) -> Result<Task, ApiError> {
        self.put(&format!("/tasks/{}", id), task).await
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/tasks/{}", id)).await
    }

    // Users

    pub async fn get_users(&self) -> Result<Vec<User>, ApiError> {
        self.get("/users").await
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, ApiError> {
        self.get(&format!("/users/{}", id)).await
    }

    /// The signed-in user
    pub async fn get_profile(&self) -> Result<User, ApiError> {
        self.get("/users/profile").await
    }

    /// Notification history of the signed-in user
    pub async fn get_notifications(&self) -> Result<Vec<Activity>, ApiError> {
        self.get("/users/notifications").await
    }

    pub async fn create_user(&self, user: &User) -> Result<User, ApiError> {
        self.post("/users", user).await
    }

    pub async fn update_user(&self, id: Uuid, user: &User) -> Result<User, ApiError> {
        self.put(&format!("/users/{}", id), user).await
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/users/{}", id)).await
    }

    // Comments

    pub async fn get_comments(&self) -> Result<Vec<Comment>, ApiError> {
        self.get("/comments").await
    }

    pub async fn get_comment(&self, id: Uuid) -> Result<Comment, ApiError> {
        self.get(&format!("/comments/{}", id)).await
    }

    pub async fn get_comments_by_task(&self, task_id: Uuid) -> Result<Vec<Comment>, ApiError> {
        self.get(&format!("/comments/tasks/{}", task_id)).await
    }

    pub async fn create_comment(&self, comment: &Comment) -> Result<Comment, ApiError> {
        self.post("/comments", comment).await
    }

    pub async fn update_comment(&self, id: Uuid, comment: &Comment) -> Result<Comment, ApiError> {
        self.put(&format!("/comments/{}", id), comment).await
    }

    pub async fn delete_comment(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/comments/{}", id)).await
    }

    // Attachments

    pub async fn get_attachments_by_comment(
        &self,
        comment_id: Uuid,
    ) -> Result<Vec<Attachment>, ApiError> {
        self.get(&format!("/attachments/comments/{}", comment_id)).await
    }

    pub async fn get_attachments_by_task(&self, task_id: Uuid) -> Result<Vec<Attachment>, ApiError> {
        self.get(&format!("/attachments/tasks/{}", task_id)).await
    }

    /// Upload a file as multipart form data, linked to a task and/or comment
    pub async fn upload_attachment(
        &self,
        file_name: &str,
        content: Vec<u8>,
        task_id: Option<Uuid>,
        comment_id: Option<Uuid>,
    ) -> Result<Attachment, ApiError> {
        let form = attachment_form(
            file_name,
            content,
            task_id.map(|id| id.to_string()),
            comment_id.map(|id| id.to_string()),
        );
        self.post_multipart("/attachments", form).await?.decode()
    }

    pub async fn get_attachment_download_url(&self, id: Uuid) -> Result<String, ApiError> {
        let response: DownloadUrl = self.get(&format!("/attachments/{}/download-url", id)).await?;
        Ok(response.download_url)
    }

    pub async fn delete_attachment(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/attachments/{}", id)).await
    }

    // Chat

    pub async fn get_chat_sessions(&self) -> Result<Vec<ChatSession>, ApiError> {
        self.get("/chat/sessions").await
    }

    pub async fn create_chat_session(&self, session_name: &str) -> Result<ChatSession, ApiError> {
        let request = ChatSession {
            session_name: Some(session_name.to_string()),
            ..Default::default()
        };
        self.post("/chat/sessions", &request).await
    }

    pub async fn get_chat_session(&self, id: Uuid) -> Result<ChatSession, ApiError> {
        self.get(&format!("/chat/sessions/{}", id)).await
    }

    pub async fn delete_chat_session(&self, id: Uuid) -> Result<(), ApiError> {
        self.delete(&format!("/chat/sessions/{}", id)).await
    }

    /// Send a chat message and wait for the assistant's reply
    pub async fn send_chat_message(
        &self,
        request: &ChatMessageRequest,
    ) -> Result<ChatMessage, ApiError> {
        self.post("/chat/messages", request).await
    }
}
