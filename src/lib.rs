pub mod config;
pub mod controls;
pub mod items;
pub mod mqtt;
pub mod platform;
pub mod scripts;
