pub mod logger;
pub mod output;
pub mod signals;
pub mod time;
