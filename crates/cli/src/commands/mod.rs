pub mod analyze;
pub mod catalog;
pub mod chat;
pub mod init;
pub mod serve;
