//! Version command - print the bridge version and the runtime it would use.

use anyhow::Result;
use std::fmt::Write;
use tensorwasm_runtime::RuntimeConfig;
use tensorwasm_runtime::prelude::{DataType, DeviceType};
use tensorwasm_runtime::timer::TIME_EXECUTION;

const DEVICES: [DeviceType; 6] = [
    DeviceType::Cpu,
    DeviceType::Gpu,
    DeviceType::OpenCl,
    DeviceType::Vulkan,
    DeviceType::Metal,
    DeviceType::WebGpu,
];

const HOST_DTYPES: [DataType; 5] = [
    DataType::INT8,
    DataType::UINT8,
    DataType::INT32,
    DataType::FLOAT32,
    DataType::FLOAT64,
];

/// Run the version command.
pub fn run() -> Result<()> {
    print!("{}", report(&RuntimeConfig::from_env())?);
    Ok(())
}

fn report(config: &RuntimeConfig) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "tensorwasm {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out)?;

    writeln!(out, "runtime (from TENSORWASM_* environment):")?;
    writeln!(
        out,
        "  memory limit  {} pages ({} MiB)",
        config.max_memory_pages,
        config.max_memory_pages * 64 / 1024
    )?;
    let fuel = config
        .fuel_enabled
        .then(|| config.fuel_amount.to_string())
        .unwrap_or_else(|| "off".into());
    writeln!(out, "  fuel          {fuel}")?;
    let epochs = config
        .epoch_interruption
        .then(|| format!("{} ticks", config.epoch_deadline))
        .unwrap_or_else(|| "off".into());
    writeln!(out, "  epoch limit   {epochs}")?;
    writeln!(out, "  module cache  {}", if config.cache_modules { "on" } else { "off" })?;
    writeln!(out, "  call stack    {} bytes initial", config.call_stack_size)?;
    writeln!(out)?;

    let devices: Vec<String> = DEVICES
        .iter()
        .map(|d| {
            if d.is_async() {
                format!("{}={} (needs sync hook)", d.name(), d.raw())
            } else {
                format!("{}={}", d.name(), d.raw())
            }
        })
        .collect();
    writeln!(out, "devices:     {}", devices.join(", "))?;
    let dtypes: Vec<String> = HOST_DTYPES.iter().map(DataType::to_string).collect();
    writeln!(out, "host dtypes: {}", dtypes.join(", "))?;
    writeln!(out, "timer:       __async.{TIME_EXECUTION}")?;
    Ok(out)
}
