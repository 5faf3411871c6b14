mod handler;
mod model;

pub use handler::{create_message, get_messages};
pub use model::{CreateMessageRequest, GetMessagesRequest, MessageRecord};
