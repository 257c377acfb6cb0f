use serde_json::json;

use super::{extract_item, extract_list, segment};
use crate::api::{ApiClient, ApiError};
use crate::models::{Conversation, Message};

#[derive(Clone)]
pub struct MessageService {
    client: ApiClient,
}

impl MessageService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, id: &str) -> Result<Message, ApiError> {
        let body = self.client.get_value(&format!("/message/{}", segment(id))).await?;
        extract_item(body, &["message", "data"])
    }

    pub async fn send(&self, receiver_id: &str, content: &str) -> Result<Message, ApiError> {
        let body = self
            .client
            .post_value(
                "/messages",
                &json!({ "receiverId": receiver_id, "content": content }),
            )
            .await?;
        extract_item(body, &["message", "data"])
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let body = self.client.get_value("/messages/conversations").await?;
        extract_list(body, &["conversations", "data"])
    }

    /// Messages exchanged with `participant_id`, oldest first
    pub async fn thread(&self, participant_id: &str) -> Result<Vec<Message>, ApiError> {
        let body = self
            .client
            .get_value(&format!("/messages/{}", segment(participant_id)))
            .await?;
        extract_list(body, &["messages", "data"])
    }
}
