pub mod init_log;

pub use init_log::init_log;
