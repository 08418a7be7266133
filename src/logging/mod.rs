pub mod file_logger;
pub mod latency_event;

pub use file_logger::FileLogger;
pub use latency_event::{LatencyConsumer, LatencyEvent, LatencyProducer, LATENCY_RING_CAPACITY};
