pub mod add;
pub mod config;
pub mod init;
pub mod lifecycle;
pub mod list;
pub mod status;
