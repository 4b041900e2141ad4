pub mod channels;
pub mod config;
pub mod tickets;
pub mod web_server;
