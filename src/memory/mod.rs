//! 记忆层：单个会话内的对话轮次（不跨会话持久化）

pub mod conversation;

pub use conversation::{ConversationState, Message, Role, Turn};
