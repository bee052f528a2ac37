pub mod archive;
pub mod cron;
pub mod encryption;
pub mod locker;
