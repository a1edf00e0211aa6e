use crate::{api::CustodyAPI, print::devices_table};
use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;
use models::device::{DeviceFilter, DeviceStatus, NewDevice};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum StatusArg {
    In,
    Out,
}

impl From<StatusArg> for DeviceStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::In => DeviceStatus::InSchool,
            StatusArg::Out => DeviceStatus::OutSchool,
        }
    }
}

#[derive(Args, Debug)]
pub struct DevicesList {
    /// Only devices with this status
    #[arg(short, long, value_enum)]
    status: Option<StatusArg>,
    /// Only devices flagged with a serial number mismatch
    #[arg(long)]
    mismatch: bool,
    /// Registration number, or part of it
    #[arg(short, long)]
    registration: Option<String>,
    #[arg(short, long, default_value = "false")]
    json: bool,
}

impl DevicesList {
    fn filter(&self) -> DeviceFilter {
        DeviceFilter {
            status: self.status.map(Into::into),
            mismatch: self.mismatch.then_some(true),
            registration_number: self.registration.clone(),
            owner_id: None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum DevicesCommands {
    /// List registered devices
    Ls(DevicesList),
    /// List the devices you registered
    Mine {
        #[arg(short, long, default_value = "false")]
        json: bool,
    },
    /// Register a device you own
    Register {
        serial_number: String,
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Set a device's status directly
    Status {
        device_id: i32,
        #[arg(value_enum)]
        status: StatusArg,
    },
    /// Compare the serial number read off a device with its record
    Verify {
        device_id: i32,
        observed_serial: String,
    },
}

impl DevicesCommands {
    pub async fn handle(self, api: CustodyAPI) -> anyhow::Result<()> {
        match self {
            DevicesCommands::Ls(list) => {
                let devices = api.get_devices(&list.filter()).await?;
                if list.json {
                    println!("{}", serde_json::to_string_pretty(&devices)?);
                } else {
                    devices_table(&devices).print();
                }
            }
            DevicesCommands::Mine { json } => {
                let devices = api.my_devices().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&devices)?);
                } else if devices.is_empty() {
                    println!("No devices registered, use `gk devices register <SERIAL>`");
                } else {
                    devices_table(&devices).print();
                }
            }
            DevicesCommands::Register {
                serial_number,
                model,
            } => {
                let device = api
                    .register_device(&NewDevice {
                        serial_number,
                        model,
                    })
                    .await?;
                println!(
                    "Registered {} with id {}",
                    device.serial_number.bold(),
                    device.id
                );
            }
            DevicesCommands::Status { device_id, status } => {
                let device = api.set_status(device_id, status.into()).await?;
                println!(
                    "{} is now {}",
                    device.serial_number.bold(),
                    crate::print::colored_status(device.status)
                );
            }
            DevicesCommands::Verify {
                device_id,
                observed_serial,
            } => {
                let outcome = api.verify(device_id, observed_serial).await?;
                if outcome.is_match {
                    println!("{}", "Serial number matches".bright_green());
                } else {
                    println!(
                        "{} record says {}",
                        "Serial number mismatch,".red().bold(),
                        outcome.device.serial_number
                    );
                }
            }
        }
        Ok(())
    }
}
