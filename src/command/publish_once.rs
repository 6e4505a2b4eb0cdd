use std::path::Path;

use anyhow::{Context, Result};
use linux_embedded_hal::I2cdev;

use crate::config;
use crate::data_mgmt::models::ChannelRegistry;
use crate::helpers::{Clock, SystemClock};
use crate::readers::senseair::SenseairK30;

use super::run::make_publisher;

/// Commissioning aid: take one reading and ship one batch immediately,
/// regardless of the configured update interval.
pub fn publish_once(config_path: &Path) -> Result<()> {
    let config = config::load(config_path)?;

    let bus = I2cdev::new(&config.sensor.bus)
        .with_context(|| format!("opening I2C bus {}", config.sensor.bus))?;

    let mut registry = ChannelRegistry::new();
    let channel = registry.register(&config.sensor.channel);
    let mut sensor = SenseairK30::new(bus, &config.sensor, channel);

    let now = SystemClock.now();
    sensor.init(now);
    sensor.poll(now).context("taking a reading")?;

    let publisher = make_publisher(&config.publisher, &registry)?;
    let lines = publisher.publish_cycle().context("publishing batch")?;
    log::info!("published {lines} line(s)");

    Ok(())
}
