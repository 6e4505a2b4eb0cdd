//! Device readers. Each reader owns the bus transaction sequence for one
//! physical device and records its readings into a measurement channel.

pub mod senseair;
