use clap::{Parser, Subcommand, value_parser};
use clap_complete::Shell;

use crate::commands::devices::DevicesCommands;
use models::user::Role;

#[derive(Parser)]
#[command(name = "gk", version, about = "Gatekeeper - campus device custody tool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// login to the custody API
    Login {
        /// does not open the browser by default
        #[arg(long, default_value = "false")]
        no_open: bool,
    },
    /// logs out the current profile
    Logout,
    /// Shows the current token being used
    Show,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Commands to handle current profile to use
    Profile { profile: Option<String> },

    /// Sets up the authentication to connect to the custody API
    Auth {
        #[clap(subcommand)]
        command: AuthCommands,
    },

    /// Pick your role after the first login: student, security or admin
    Onboard { role: Role },

    /// Registered devices
    Devices {
        #[clap(subcommand)]
        command: DevicesCommands,
    },

    /// Show which devices a scanned payload resolves to
    Scan {
        /// Bare serial number or JSON envelope
        payload: String,
    },

    /// Flip the status of the device a payload resolves to
    Toggle { payload: String },

    /// Print the payload to show at the gate for your devices
    Qr,

    /// Device totals and active security staff
    Dashboard {
        #[arg(short, long, default_value = "false")]
        json: bool,
    },

    /// List security staff and whether they are active
    Security,

    /// Generate shell completion scripts
    Completion {
        // Shell type to generate completion script for
        #[arg(value_parser = value_parser!(Shell))]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onboard_parses_role() {
        let cli = Cli::parse_from(["gk", "onboard", "security"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Onboard {
                role: Role::Security
            })
        ));
        assert!(Cli::try_parse_from(["gk", "onboard", "janitor"]).is_err());
    }
}
