mod device_id;
mod time;

pub use device_id::device_id;
pub use time::{Clock, SystemClock};
