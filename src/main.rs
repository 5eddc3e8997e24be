use anyhow::{Context, Result};
use clap::Parser;
use dmc_tool::device_ids::{DOCK_VID, UsbId, identify_device};
use dmc_tool::protocol::{get_component_fwver, get_component_list};
use dmc_tool::{fwct, report};
use hidapi::{DeviceInfo, HidApi, HidDevice};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "dmc-tool", version, about)]
enum Opt {
    /// List all connected dock HID devices (vendor ID 0x2bef)
    List,

    /// Show USB descriptor strings for a specific dock
    Info {
        #[command(flatten)]
        spec: DeviceSpec,
    },

    /// Enumerate dock components and report their firmware versions
    Components {
        #[command(flatten)]
        spec: DeviceSpec,
    },

    /// Parse an FWCT firmware container and print its tables
    Show { file: std::path::PathBuf },
}

#[derive(Error, Debug)]
enum MatchError {
    #[error("no devices match specification")]
    NoDevices,

    #[error("multiple devices match specification")]
    MultipleDevices,
}

#[derive(clap::Args, Debug)]
struct DeviceSpec {
    /// Serial number
    #[arg(short)]
    serial: Option<String>,

    /// Product ID (vendor ID is always matched against the dock's, 0x2bef)
    #[arg(short)]
    pid: Option<u16>,
}

impl DeviceSpec {
    fn matches(&self, device: &DeviceInfo) -> bool {
        if device.vendor_id() != DOCK_VID {
            return false;
        }

        if let Some(ref x) = self.serial {
            if device.serial_number() != Some(x) {
                return false;
            }
        }

        if let Some(x) = self.pid {
            if device.product_id() != x {
                return false;
            }
        }

        true
    }

    fn get_device<'a>(&self, hidapi: &'a HidApi) -> Result<(HidDevice, &'a DeviceInfo)> {
        let mut candidates = hidapi.device_list().filter(|d| self.matches(d));

        match candidates.next() {
            None => Err(MatchError::NoDevices.into()),
            Some(dev) => {
                if candidates.next().is_some() {
                    Err(MatchError::MultipleDevices.into())
                } else {
                    dev.open_device(hidapi)
                        .map_err(Into::into)
                        .map(|open| (open, dev))
                }
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("DMC_TOOL_LOG", "info")
            .write_style("DMC_TOOL_LOG_STYLE"),
    )
    .init();

    match Opt::parse() {
        Opt::List => list(&HidApi::new()?),
        Opt::Info { spec } => {
            let api = HidApi::new()?;
            let (_dev, info) = &spec.get_device(&api)?;

            let id = UsbId {
                vid: info.vendor_id(),
                pid: info.product_id(),
            };
            println!("USB ID: {id} [{}]", identify_device(id));
            println!(
                "Manufacturer: {}",
                info.manufacturer_string().unwrap_or("INVALID")
            );
            println!("Product: {}", info.product_string().unwrap_or("INVALID"));
            println!("Serial: {}", info.serial_number().unwrap_or("INVALID"));
        }
        Opt::Components { spec } => {
            let api = HidApi::new()?;
            let (dev, _) = &spec.get_device(&api)?;

            let components = get_component_list(dev)?;
            println!("{} component(s) reported", components.len());
            for component in components {
                let versions = get_component_fwver(dev, component)?;
                println!("{}", report::describe(&versions));
            }
        }
        Opt::Show { file } => {
            let mut f = std::fs::File::open(&file)
                .with_context(|| format!("cannot open image file {}", file.display()))?;
            let image = fwct::parse(&mut f)
                .with_context(|| format!("cannot parse image file {}", file.display()))?;
            print_container(&image);
        }
    };

    Ok(())
}

fn list(hidapi: &HidApi) {
    let all_spec = DeviceSpec {
        serial: None,
        pid: None,
    };
    for dev in hidapi.device_list().filter(|d| all_spec.matches(d)) {
        let compat = identify_device(UsbId {
            vid: dev.vendor_id(),
            pid: dev.product_id(),
        });

        println!(
            "{} {} [{}]",
            dev.serial_number().unwrap_or("INVALID"),
            dev.product_string().unwrap_or("INVALID"),
            compat,
        );
    }
}

fn print_container(image: &fwct::CompositeImage) {
    let header = &image.header;
    println!(
        "FWCT version {} (CDTT version {}), tables {} bytes",
        header.fwct_version, header.cdtt_version, header.table_size
    );
    println!(
        "Target: vid {:04x} pid {:04x} device {:04x}",
        header.vendor_id, header.product_id, header.device_id
    );
    println!(
        "Composite firmware version: {:#010x}",
        header.composite_version
    );
    println!(
        "Signature: algorithm {}, {} bytes",
        header.sig_algorithm, image.signature_length
    );
    println!("{} image(s)", image.images.len());

    for (num, entry) in image.images.iter().enumerate() {
        let desc = &entry.descriptor;
        println!(
            "image {num}: component {} {} ({}), fw {:#010x}, app {:#010x}",
            desc.component_id, desc.device_type, desc.image_type, desc.fw_version, desc.app_version
        );
        println!(
            "  offset {:#x}, size {:#x}, row size {}, {} segment(s)",
            desc.image_offset, desc.image_size, desc.row_size, desc.num_segments
        );
        for segment in &entry.segments {
            println!(
                "  segment: start row {}, {} row(s), {} payload bytes",
                segment.descriptor.start_row,
                segment.descriptor.segment_size,
                segment.payload.len()
            );
        }
    }
}
