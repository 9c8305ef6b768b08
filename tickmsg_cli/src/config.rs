use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// tickmsg echo tool.
///
/// Runs an echo server, or pings one and reports round-trip times.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to the settings file. The default is `$HOME/.tickmsg/config.yml`.
    #[arg(long = "config-file", short = 'c')]
    pub config_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the echo server.
    #[command(name = "serve", alias = "start")]
    Serve(ServeCommand),
    /// Send echo requests to a server.
    #[command(name = "ping")]
    Ping(PingCommand),
    /// Show or create the settings file.
    #[command(subcommand, name = "config")]
    Settings(SettingsCommand),
}

#[derive(Debug, Args)]
pub struct ServeCommand {
    /// The address to listen on.
    #[arg(long = "listen-address", short = 'a', default_value = "127.0.0.1:7740")]
    pub listen_address: SocketAddr,
}

#[derive(Debug, Args)]
pub struct PingCommand {
    /// The echo server to ping.
    #[arg(long = "server-address", short = 's', default_value = "127.0.0.1:7740")]
    pub server_address: SocketAddr,
    /// Number of echo requests to send.
    #[arg(long = "count", short = 'n', default_value_t = 4)]
    pub count: u32,
    /// Delay between requests, in milliseconds.
    #[arg(long = "interval-ms", short = 'i', default_value_t = 1000)]
    pub interval_ms: u64,
    /// Random bytes to add to each request.
    #[arg(long = "size", default_value_t = 16)]
    pub size: usize,
    /// Keep reconnecting until every request has been answered.
    #[arg(long = "reconnect", short = 'r', default_value_t = false)]
    pub reconnect: bool,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Print the settings in effect.
    #[command(name = "show")]
    Show,
    /// Write a settings file with default values.
    #[command(name = "init")]
    Init {
        /// Overwrite an existing file.
        #[arg(long = "force", short = 'f', default_value_t = false)]
        force: bool,
    },
}

pub struct GlobalOptions {
    pub config_file: Option<PathBuf>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions { config_file: self.config_file };
        (global, self.command)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ping_defaults() {
        let config = Config::try_parse_from(["tickmsg", "ping", "-n", "3", "--reconnect"]).unwrap();
        let (options, command) = config.to_parts();
        assert!(options.config_file.is_none());
        let CliCommand::Ping(ping) = command else { panic!("expected the ping command") };
        assert_eq!(ping.count, 3);
        assert_eq!(ping.interval_ms, 1000);
        assert_eq!(ping.server_address, "127.0.0.1:7740".parse().unwrap());
        assert!(ping.reconnect);
    }

    #[test]
    fn serve_with_settings_file() {
        let config = Config::try_parse_from(["tickmsg", "-c", "/tmp/x.yml", "start", "-a", "0.0.0.0:9000"]).unwrap();
        assert_eq!(config.config_file, Some(PathBuf::from("/tmp/x.yml")));
        let CliCommand::Serve(serve) = config.command else { panic!("expected the serve command") };
        assert_eq!(serve.listen_address.port(), 9000);
        assert!(Config::try_parse_from(["tickmsg", "serve", "-a", "not-an-address"]).is_err());
    }
}
