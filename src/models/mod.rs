pub mod audit;
pub mod dead_letter;
pub mod health;
pub mod message;
pub mod request;
pub mod retry;
pub mod status;
pub mod template;
