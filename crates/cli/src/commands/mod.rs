pub mod config_cmd;
pub mod resume;
pub mod run;
pub mod setup;
pub mod workflow;
