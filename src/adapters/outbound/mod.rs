mod json_archive;
mod nginx_config_sync;
mod shell_process_runner;
mod sqlite_record_store;

pub use json_archive::JsonFileArchive;
pub use nginx_config_sync::NginxConfigSync;
pub use shell_process_runner::ShellProcessRunner;
pub use sqlite_record_store::SqliteRecordStore;
