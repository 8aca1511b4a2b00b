pub mod codec;
pub mod command;
pub mod message;
pub mod replies;
