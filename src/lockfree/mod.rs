pub mod ring;

pub use ring::{RingConsumer, RingProducer, SlotRing};
