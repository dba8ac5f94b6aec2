//! The `ic` subcommands.

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use insteon_lib::address::Address;
use insteon_lib::command::{CMD_LIGHT_OFF, CMD_LIGHT_ON, CMD_LIGHT_STATUS_REQUEST, Command as InsteonCommand};
use insteon_lib::device::{Device, LinkableDevice};
use insteon_lib::{Group, LinkRecord, Network};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the modem itself
    Plm {
        #[command(subcommand)]
        action: PlmAction,
    },
    /// Talk to the device at ADDRESS (xx.xx.xx)
    Device {
        address: Address,
        #[command(subcommand)]
        action: DeviceAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlmAction {
    /// Print the modem address, category and firmware
    Info,
    /// Print the modem link database
    Links {
        /// One raw record per line instead of the table
        #[arg(long)]
        dump: bool,
    },
    /// Remove duplicate records from the modem link database
    Cleanup,
    /// Put the modem in linking mode for GROUP
    Link { group: Group },
    /// Put the modem in unlinking mode for GROUP
    Unlink { group: Group },
    /// Leave linking or unlinking mode
    Cancel,
    /// Add a record, e.g. "UC 1 01.02.03 0x00 0x00 0x00"
    AddLink { record: LinkRecord },
    /// Remove a record, same format as add-link
    RemoveLink { record: LinkRecord },
}

#[derive(Subcommand, Debug)]
pub enum DeviceAction {
    /// Print what discovery learned about the device
    Info,
    Ping,
    On,
    Off,
    /// Print the light level
    Status,
    /// Print the device link database
    Links {
        #[arg(long)]
        dump: bool,
    },
    Link { group: Group },
    Unlink { group: Group },
    ExitLink,
    AddLink { record: LinkRecord },
    RemoveLink { record: LinkRecord },
    /// Send a raw command: cmd1 and cmd2 as hex, optional extended payload as hex
    Send {
        command: String,
        payload: Option<String>,
    },
}

pub async fn run(network: &Network, command: Command) -> Result<()> {
    match command {
        Command::Plm { action } => run_plm(network, action).await,
        Command::Device { address, action } => {
            let (device, info) = network
                .connect(address)
                .await
                .with_context(|| format!("Failed to connect to {address}"))?;
            let result = run_device(device.as_ref(), action, || serde_json::to_string_pretty(&info)).await;
            device.close().await;
            result
        }
    }
}

async fn run_plm(network: &Network, action: PlmAction) -> Result<()> {
    let plm = network.plm();
    match action {
        PlmAction::Info => println!("{}", plm.info().await?),
        PlmAction::Links { dump } => print_links(plm, dump).await?,
        PlmAction::Cleanup => plm.cleanup().await?,
        PlmAction::Link { group } => plm.enter_linking_mode(group).await?,
        PlmAction::Unlink { group } => plm.enter_unlinking_mode(group).await?,
        PlmAction::Cancel => plm.exit_linking_mode().await?,
        PlmAction::AddLink { record } => plm.add_link(record).await?,
        PlmAction::RemoveLink { record } => plm.remove_links(&[record]).await?,
    }
    Ok(())
}

async fn run_device<F>(device: &dyn Device, action: DeviceAction, info: F) -> Result<()>
where
    F: FnOnce() -> serde_json::Result<String>,
{
    match action {
        DeviceAction::Info => println!("{}", info()?),
        DeviceAction::Ping => {
            let pingable = device.as_pingable().ok_or_else(|| anyhow!("{device} cannot be pinged"))?;
            pingable.ping().await?;
            println!("{device} answered");
        }
        DeviceAction::On => {
            device.send_command(CMD_LIGHT_ON, &[]).await?;
        }
        DeviceAction::Off => {
            device.send_command(CMD_LIGHT_OFF, &[]).await?;
        }
        DeviceAction::Status => {
            let ack = device.send_command(CMD_LIGHT_STATUS_REQUEST, &[]).await?;
            match ack.command.cmd2() {
                0x00 => println!("off"),
                0xff => println!("on"),
                level => println!("on at level {level}"),
            }
        }
        DeviceAction::Links { dump } => print_links(linkable(device)?, dump).await?,
        DeviceAction::Link { group } => linkable(device)?.enter_linking_mode(group).await?,
        DeviceAction::Unlink { group } => linkable(device)?.enter_unlinking_mode(group).await?,
        DeviceAction::ExitLink => linkable(device)?.exit_linking_mode().await?,
        DeviceAction::AddLink { record } => linkable(device)?.add_link(record).await?,
        DeviceAction::RemoveLink { record } => linkable(device)?.remove_links(&[record]).await?,
        DeviceAction::Send { command, payload } => {
            let command = parse_command(&command, payload.is_some())?;
            let payload = match payload {
                Some(text) => hex::decode(&text).with_context(|| format!("Invalid payload {text:?}"))?,
                None => Vec::new(),
            };
            let ack = device.send_command(command, &payload).await?;
            println!("{ack}");
        }
    }
    Ok(())
}

fn linkable(device: &dyn Device) -> Result<&dyn LinkableDevice> {
    device
        .as_linkable()
        .ok_or_else(|| anyhow!("{device} has no link database"))
}

fn parse_command(text: &str, extended: bool) -> Result<InsteonCommand> {
    let bytes = hex::decode(text).with_context(|| format!("Invalid command {text:?}"))?;
    let [cmd1, cmd2] = bytes[..] else {
        bail!("Command must be two bytes, got {}", bytes.len());
    };
    Ok(if extended {
        InsteonCommand::extended(cmd1, cmd2)
    } else {
        InsteonCommand::standard(cmd1, cmd2)
    })
}

async fn print_links(linkable: &dyn LinkableDevice, dump: bool) -> Result<()> {
    let links = linkable.links().await?;
    info!("read {} link records", links.len());

    if dump {
        println!("links:");
        for link in &links {
            let bytes: Vec<String> = link.to_bytes().iter().map(|b| format!("0x{b:02x}")).collect();
            println!("- [ {} ]", bytes.join(", "));
        }
        return Ok(());
    }

    println!("Link Database:");
    if links.is_empty() {
        println!("    No links defined");
        return Ok(());
    }
    println!("    Flags    Group Address    Data");
    let mut by_address: BTreeMap<Address, Vec<&LinkRecord>> = BTreeMap::new();
    for link in &links {
        by_address.entry(link.address).or_default().push(link);
    }
    for link in by_address.values().flatten() {
        println!("    {}", link.to_text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_command_parsing() {
        let cmd = parse_command("0d00", false).unwrap();
        assert_eq!(cmd.bytes(), [0x00, 0x0d, 0x00]);

        let cmd = parse_command("2f00", true).unwrap();
        assert!(cmd.is_extended());

        assert!(parse_command("0d", false).is_err());
        assert!(parse_command("zz00", false).is_err());
    }
}
