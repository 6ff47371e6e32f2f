pub mod config;
pub mod formatter;
pub mod history;
pub mod models;
pub mod probe;
pub mod providers;
pub mod quota;
pub mod recommend;
pub mod scheduler;
pub mod watchdog;
