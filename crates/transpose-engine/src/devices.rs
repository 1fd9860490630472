use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    /// Channels and rate of the device's default output config, if it has one.
    pub default_config: Option<(u16, u32)>,
}

/// Output-capable devices of the default host, in the order `--output-index` uses.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut out = Vec::new();
    for (index, dev) in host.output_devices()?.enumerate() {
        let name = dev.name().unwrap_or_else(|_| "<unknown>".to_string());
        let is_default = default_out.as_deref() == Some(name.as_str());
        let default_config = dev.default_output_config().ok().map(|c| (c.channels(), c.sample_rate().0));
        out.push(DeviceInfo { index, name, is_default, default_config });
    }
    Ok(out)
}

/// Pretty-print for CLI
pub fn print_devices() -> Result<()> {
    let list = list_devices()?;
    if list.is_empty() {
        println!("(no output devices found)");
        return Ok(());
    }
    for d in &list {
        let mark = if d.is_default { "*" } else { " " };
        match d.default_config {
            Some((ch, sr)) => println!("{mark}{:>2}  {}  ({ch} ch, {sr} Hz)", d.index, d.name),
            None => println!("{mark}{:>2}  {}", d.index, d.name),
        }
    }
    Ok(())
}

/// Pick an output device: explicit index first, then a case-insensitive
/// name substring, then the host default.
pub fn pick_output_device(host: &cpal::Host, name_substr: Option<&str>, index: Option<usize>) -> Result<Option<cpal::Device>> {
    if let Some(idx) = index {
        if let Some(dev) = host.output_devices()?.nth(idx) {
            return Ok(Some(dev));
        }
        log::warn!("no output device at index {idx}");
    }

    if let Some(q) = name_substr {
        let q = q.to_lowercase();
        for dev in host.output_devices()? {
            if dev.name().unwrap_or_default().to_lowercase().contains(&q) {
                return Ok(Some(dev));
            }
        }
        log::warn!("no output device matching {q:?}");
    }

    Ok(host.default_output_device())
}
