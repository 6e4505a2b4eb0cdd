pub const CONFIG_PATH: &str = "AIRNODE_CONFIG";

pub const LOG_LEVEL: &str = "LOGGING_LEVEL";
