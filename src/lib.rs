pub mod backend;
pub mod gateway;
pub mod irc;
pub mod names;
pub mod text;
