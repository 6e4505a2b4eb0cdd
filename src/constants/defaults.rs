use std::time::Duration;

pub const CONFIG_PATH: &str = "/etc/airnode/config.json";

pub const LOG_LEVEL: &str = "info";

/// Upper bound on a single InfluxDB write request, including connect time.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(12);

/// Time the sensor needs to service a command before the result registers
/// can be read back.
pub const SENSOR_COMMAND_DELAY: Duration = Duration::from_millis(25);
