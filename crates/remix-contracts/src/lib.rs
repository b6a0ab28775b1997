pub mod access;
pub mod channel;
pub mod chat;
pub mod events;
pub mod quota;
pub mod slug;
pub mod workflow;
