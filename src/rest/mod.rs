//! REST client for the project-manager API

mod client;
mod endpoints;
pub mod models;

pub use client::{attachment_form, ApiClient, ApiResponse};
pub use models::{
    Activity, Attachment, ChatMessage, ChatMessageRequest, ChatSession, Comment, MessageRole,
    Project, Task, TaskRequest, User,
};
