pub mod lockfree;
pub mod logging;
pub mod merge;
pub mod message;
pub mod net;
pub mod reactor;
pub mod runner;
pub mod sessions;
pub mod utils;
