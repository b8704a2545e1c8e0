//! wabot core library: command router, file downloader, WhatsApp bridge channel
//! and the bot runtime used by the CLI.

pub mod bot;
pub mod channels;
pub mod commands;
pub mod config;
pub mod download;
pub mod init;
