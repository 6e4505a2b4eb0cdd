use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;

use crate::config::{self, Config, PublishSchedule, PublisherConfig};
use crate::data_mgmt::models::ChannelRegistry;
use crate::data_mgmt::publish::{InfluxPublisher, PublisherBuilder};
use crate::helpers::{self, Clock, SystemClock};
use crate::readers::senseair::SenseairK30;
use crate::scheduler::Scheduler;

/// Start the node: one polling task for the sensor and, unless disabled,
/// one publishing task.
pub fn run(config_path: &Path) -> Result<()> {
    let config = config::load(config_path)?;
    config.log_summary();

    let bus = I2cdev::new(&config.sensor.bus)
        .with_context(|| format!("opening I2C bus {}", config.sensor.bus))?;

    let mut scheduler = assemble_tasks(config, bus)?;
    log::info!("starting scheduler with {} task(s)", scheduler.task_count());
    scheduler.run_forever();
    Ok(())
}

/// Wire registry, driver and publisher into scheduler tasks. Registration
/// completes before the scheduler starts; nothing mutates the task set or
/// the channel set afterwards.
fn assemble_tasks<B>(config: Config, bus: B) -> Result<Scheduler>
where
    B: I2c + 'static,
{
    let mut registry = ChannelRegistry::new();
    let channel = registry.register(&config.sensor.channel);

    let mut sensor = SenseairK30::new(bus, &config.sensor, channel);
    sensor.init(SystemClock.now());

    let mut scheduler = Scheduler::new();
    let poll_interval = Duration::from_secs(config.sensor.poll_interval);
    scheduler.add_task("sensor-poll", poll_interval, move || {
        let now = SystemClock.now();
        if let Err(err) = sensor.apply_calibration_if_due(now) {
            log::error!("ABC calibration failed: {err}");
        }
        if let Err(err) = sensor.poll(now) {
            log::error!("poll cycle failed: {err}");
        }
    });

    match config.publisher.update_interval {
        PublishSchedule::Periodic(interval) => {
            let publisher = make_publisher(&config.publisher, &registry)?;
            scheduler.add_task("influx-publish", interval, move || {
                match publisher.publish_cycle() {
                    Ok(0) => {}
                    Ok(lines) => log::info!("published {lines} line(s)"),
                    Err(err) => log::error!("publish cycle failed: {err}"),
                }
            });
        }
        PublishSchedule::Never => {
            log::info!("update_interval is \"never\"; publisher will not run");
        }
    }

    Ok(scheduler)
}

pub(super) fn make_publisher(
    config: &PublisherConfig,
    registry: &ChannelRegistry,
) -> Result<InfluxPublisher> {
    let mut builder = PublisherBuilder::from_config(config);
    if config.send_device_id {
        builder.set_device_id(helpers::device_id());
    }
    builder
        .build(registry, Box::new(SystemClock))
        .context("setting up InfluxDB publisher")
}
