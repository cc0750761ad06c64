use clap::{Args, Parser, Subcommand, ValueEnum};
use smb_handshake::{
    connection::{EncryptionMode, ProtocolFlags, TransportConfig},
    packets::smb2::Dialect,
    ConnectionConfig,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Negotiates a dialect and prints what the server agreed to.
    Negotiate(NegotiateCmd),
    /// Negotiates, logs on with NTLM and optionally connects to a share.
    Connect(ConnectCmd),
    /// Runs a server accepting anonymous logons.
    Serve(ServeCmd),
}

/// Client connection options shared by the client subcommands.
#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server host name or address.
    pub server: String,
    #[arg(long)]
    pub port: Option<u16>,
    /// Timeout in seconds. Zero waits forever.
    #[arg(short, long)]
    pub timeout: Option<u16>,

    /// Use the NetBIOS session service (port 139) instead of direct TCP.
    #[arg(long)]
    pub netbios: bool,
    /// Skip the SMB1 multi-protocol negotiate and offer SMB2/3 dialects only.
    #[arg(long)]
    pub smb2_only: bool,
    #[arg(long, value_parser = parse_dialect)]
    pub min_dialect: Option<Dialect>,
    #[arg(long, value_parser = parse_dialect)]
    pub max_dialect: Option<Dialect>,

    #[arg(long, value_enum, default_value_t = Encryption::Allowed)]
    pub encryption: Encryption,
    #[arg(long)]
    pub require_signing: bool,
}

#[derive(Args, Debug)]
pub struct NegotiateCmd {
    #[command(flatten)]
    pub client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct ConnectCmd {
    #[command(flatten)]
    pub client: ClientArgs,

    #[arg(short, long)]
    pub username: String,
    #[arg(short, long)]
    pub password: String,
    #[arg(short, long)]
    pub domain: Option<String>,

    /// Share to connect to after logging on, e.g. `IPC$`.
    #[arg(long)]
    pub share: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServeCmd {
    #[arg(long, default_value = "0.0.0.0:445")]
    pub address: String,
    /// Shares to serve. `IPC$` is always served.
    #[arg(long)]
    pub share: Vec<String>,
    #[arg(long)]
    pub require_signing: bool,
    /// Encrypt every SMB3 session.
    #[arg(long)]
    pub encrypt: bool,
    /// Answer clients without a common dialect with STATUS_NOT_SUPPORTED.
    #[arg(long)]
    pub reject_unsupported: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    Allowed,
    Required,
    Disabled,
}

impl From<Encryption> for EncryptionMode {
    fn from(value: Encryption) -> Self {
        match value {
            Encryption::Allowed => EncryptionMode::Allowed,
            Encryption::Required => EncryptionMode::Required,
            Encryption::Disabled => EncryptionMode::Disabled,
        }
    }
}

/// Parses `2.0.2`, `2.1`, `3.0`, `3.0.2` or `3.1.1`, or the hex revision such as `0x0311`.
pub fn parse_dialect(value: &str) -> Result<Dialect, String> {
    let dialect = match value {
        "2.0.2" | "0x0202" => Dialect::Smb0202,
        "2.1" | "2.1.0" | "0x0210" => Dialect::Smb021,
        "3.0" | "3.0.0" | "0x0300" => Dialect::Smb030,
        "3.0.2" | "0x0302" => Dialect::Smb0302,
        "3.1.1" | "0x0311" => Dialect::Smb0311,
        _ => return Err(format!("Unknown dialect {}", value)),
    };
    Ok(dialect)
}

impl ClientArgs {
    pub fn make_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            port: self.port,
            timeout: self
                .timeout
                .map(|t| std::time::Duration::from_secs(t.into())),
            protocols: ProtocolFlags {
                smb1: !self.smb2_only,
                ..Default::default()
            },
            min_dialect: self.min_dialect,
            max_dialect: self.max_dialect,
            encryption_mode: self.encryption.into(),
            signing_required: self.require_signing,
            transport: if self.netbios {
                TransportConfig::NetBios
            } else {
                TransportConfig::Tcp
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dialect() {
        assert_eq!(parse_dialect("3.1.1"), Ok(Dialect::Smb0311));
        assert_eq!(parse_dialect("0x0210"), Ok(Dialect::Smb021));
        assert!(parse_dialect("1.0").is_err());
    }

    #[test]
    fn test_connection_config_from_args() {
        let cli = Cli::parse_from([
            "smb-handshake",
            "negotiate",
            "fileserver",
            "--smb2-only",
            "--netbios",
            "--max-dialect",
            "3.0.2",
            "--encryption",
            "required",
        ]);
        let Commands::Negotiate(cmd) = cli.command else {
            panic!("Expected the negotiate subcommand");
        };
        let config = cmd.client.make_connection_config();
        assert!(!config.protocols.smb1);
        assert_eq!(config.port(), 139);
        assert_eq!(config.max_dialect, Some(Dialect::Smb0302));
        assert!(config.encryption_mode.is_required());
        config.validate().unwrap();
    }
}
