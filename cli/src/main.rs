mod api;
mod auth;
mod cli;
mod commands;
mod config;
mod print;

use crate::cli::{AuthCommands, Cli, Commands};
use crate::print::{TablePrint, colored_status, devices_table, humanized};
use anyhow::Context;
use api::CustodyAPI;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use std::io;

async fn connect(config: &config::Config) -> anyhow::Result<CustodyAPI> {
    let secrets = auth::get_secrets(config)
        .await
        .with_context(|| "Error getting token")?
        .with_context(|| "No Token found, please Login")?;

    CustodyAPI::new(secrets, config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // completions work without a config file
    if let Some(Commands::Completion { shell }) = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut io::stdout());
        return Ok(());
    }

    let mut config = config::Config::load().await.with_context(|| {
        "Failed to load ~/.custody/config.toml, create it with at least one [profile.<name>]"
    })?;

    let Some(command) = cli.command else {
        println!("{config}");
        return Ok(());
    };

    match command {
        Commands::Profile { profile } => match profile {
            Some(profile) => {
                println!("Changing profile to {}", profile);
                config.change_profile(profile).await?;
                println!("new: {}", config);
            }
            None => {
                println!("current: {}", config);
                let mut others: Vec<&str> = config
                    .profiles()
                    .filter(|p| *p != config.current_profile)
                    .collect();
                others.sort_unstable();
                if !others.is_empty() {
                    println!("available: {}", others.join(", "));
                }
            }
        },
        Commands::Auth { command } => match command {
            AuthCommands::Login { no_open } => auth::login(&config, !no_open).await?,
            AuthCommands::Logout => auth::logout(&config)?,
            AuthCommands::Show => auth::show(&config).await?,
        },
        Commands::Onboard { role } => {
            let api = connect(&config).await?;
            let user = api.choose_role(role).await?;
            println!("{} is now {}", user.email.unwrap_or_default().bold(), role);
        }
        Commands::Devices { command } => {
            let api = connect(&config).await?;
            command.handle(api).await?;
        }
        Commands::Scan { payload } => {
            let api = connect(&config).await?;
            let resolution = api.resolve(payload).await?;

            println!(
                "serials: {}",
                resolution.candidates.serial_numbers.join(", ")
            );
            if let Some(registration) = &resolution.candidates.registration_number {
                println!("registration: {registration}");
            }
            if resolution.devices.is_empty() {
                println!("{}", "No device found".yellow());
            } else {
                devices_table(&resolution.devices).print();
            }
        }
        Commands::Toggle { payload } => {
            let api = connect(&config).await?;
            let outcome = api.toggle(payload).await?;
            println!(
                "{} {} -> {}",
                outcome.device.serial_number.bold(),
                colored_status(outcome.previous),
                colored_status(outcome.device.status)
            );
        }
        Commands::Qr => {
            let api = connect(&config).await?;
            let code = api.gate_code().await?;
            if code.device_count == 0 {
                println!("{}", "You have no registered devices".yellow());
            }
            println!("{}", code.payload);
        }
        Commands::Dashboard { json } => {
            let api = connect(&config).await?;
            let dashboard = api.dashboard().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                println!("total:            {}", dashboard.total_count);
                println!(
                    "in school:        {}",
                    dashboard.in_school_count.to_string().bright_green()
                );
                println!(
                    "out of school:    {}",
                    dashboard.out_school_count.to_string().bright_blue()
                );
                println!(
                    "mismatched:       {}",
                    dashboard.mismatch_count.to_string().red()
                );
                println!("active security:  {}", dashboard.active_security_count);
            }
        }
        Commands::Security => {
            let api = connect(&config).await?;
            let members = api.security_members().await?;

            let mut table =
                TablePrint::new_with_headers(vec!["ID", "EMAIL", "LOCATION", "LAST ACTIVE", ""]);
            for member in members {
                let active = if member.active {
                    "active".bright_green().to_string()
                } else {
                    "away".dimmed().to_string()
                };
                table.add_row(vec![
                    member.id.to_string(),
                    member.email.unwrap_or_default(),
                    member.location_id.unwrap_or_default(),
                    humanized(member.last_active),
                    active,
                ]);
            }
            table.print();
        }
        Commands::Completion { .. } => {}
    }

    Ok(())
}
