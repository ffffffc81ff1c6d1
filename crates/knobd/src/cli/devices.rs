use anyhow::Result;
use knobd_core::config::Config;

use super::truncate;
use crate::device;

pub fn run() -> Result<()> {
    let config = match Config::default_path() {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let (vendor, product) = (config.device.vendor_id, config.device.product_id);

    let mut devices = device::list_devices();
    if devices.is_empty() {
        println!("No readable input devices. Is your user in the 'input' group?");
        return Ok(());
    }
    devices.sort_by(|a, b| a.path.cmp(&b.path));

    println!("  {:<22} {:<11} {:<40}", "PATH", "ID", "NAME");
    for dev in &devices {
        let marker = if dev.vendor == vendor && dev.product == product {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {:<22} {:04x}:{:04x}   {:<40}",
            dev.path.display(),
            dev.vendor,
            dev.product,
            truncate(&dev.name, 39),
        );
    }
    if !devices
        .iter()
        .any(|d| d.vendor == vendor && d.product == product)
    {
        println!("\nConfigured knob {vendor:04x}:{product:04x} not found.");
    }
    Ok(())
}
