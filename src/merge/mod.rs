pub mod stream_merger;

pub use stream_merger::StreamMerger;
