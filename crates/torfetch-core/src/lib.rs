pub mod circuit;
pub mod config;
pub mod driver;
pub mod evidence;
pub mod fetch;
pub mod logging;
pub mod storage;
pub mod work_db;
