use anyhow::anyhow;
use clap::Parser;
use libtickmsg::scheduler::sleep;
use libtickmsg::{Client, ReconnectingClient, Scheduler, Server};
use log::*;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tickmsg_cli::config::{CliCommand, Config, GlobalOptions, PingCommand, ServeCommand, SettingsCommand};
use tickmsg_cli::echo::server_profile;
use tickmsg_cli::error::CliError;
use tickmsg_cli::ping::{ping_profile, PingReport, PingSession};
use tickmsg_cli::settings::{default_settings_path, load_or_default, CliSettings};

fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();

    let result = match command {
        CliCommand::Serve(serve_command) => start_server(serve_command, global_options),
        CliCommand::Ping(ping_command) => ping(ping_command, global_options),
        CliCommand::Settings(settings_command) => exec_settings_command(settings_command, global_options),
    };

    match result {
        Ok(()) => {
            println!("Bye :)")
        }
        Err(err) => {
            eprintln!("** Error ** \n {err}");
            std::process::exit(1);
        }
    }
}

fn settings_path(options: &GlobalOptions) -> PathBuf {
    options.config_file.as_ref().cloned().unwrap_or_else(default_settings_path)
}

fn load_settings(options: &GlobalOptions) -> Result<CliSettings, anyhow::Error> {
    let path = settings_path(options);
    info!("Loading settings from {}", path.to_str().unwrap_or("[invalid utf-8 path]"));
    Ok(load_or_default(&path)?)
}

fn exec_settings_command(cmd: SettingsCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = settings_path(&options);
    match cmd {
        SettingsCommand::Show => {
            let settings = load_or_default(&path)?;
            let text = serde_yml::to_string(&settings)?;
            println!("{text}");
        }
        SettingsCommand::Init { force } => {
            if path.exists() && !force {
                return Err(anyhow!("{} already exists. Use --force to overwrite it.", path.display()));
            }
            CliSettings::default().save(&path)?;
            println!("Default settings written to {}", path.to_str().unwrap_or("[invalid utf-8 path]"));
        }
    }
    Ok(())
}

fn start_server(cmd: ServeCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    info!("Starting server");
    let settings = load_settings(&options)?;
    let profile = server_profile(&settings.session)?;
    let mut server = Server::with_default_state(profile);
    server.set_listen_address(cmd.listen_address);
    let server = Rc::new(RefCell::new(server));
    let mut scheduler = Scheduler::new()?.with_idle(sleep(settings.endpoint.idle_sleep()));
    scheduler.start(&server)?;
    scheduler.run_forever()?;
    info!("Server has shut down.");
    Ok(())
}

fn ping(cmd: PingCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    let settings = load_settings(&options)?;
    let profile = ping_profile(&settings.session)?;
    let interval = Duration::from_millis(cmd.interval_ms);
    let report = Rc::new(RefCell::new(PingReport::new(cmd.count, interval, cmd.size)));
    let factory = {
        let report = Rc::clone(&report);
        move |_: &SocketAddr| PingSession::new(Rc::clone(&report))
    };
    let done = Rc::clone(&report);
    let idle = settings.endpoint.idle_sleep();
    let mut scheduler = Scheduler::new()?.with_auto_stop(false).with_idle(move || {
        std::thread::sleep(idle);
        !done.borrow().is_complete()
    });

    info!("Pinging {}", cmd.server_address);
    let failure = if cmd.reconnect {
        let mut client = ReconnectingClient::new(profile, factory);
        client.set_connect_address(cmd.server_address);
        client.set_connect_timeout(settings.endpoint.connect_timeout());
        client.set_retry_interval(settings.endpoint.retry_interval());
        let client = Rc::new(RefCell::new(client));
        scheduler.start(&client)?;
        scheduler.run_forever()?;
        None
    } else {
        let mut client = Client::new(profile, factory);
        client.set_connect_address(cmd.server_address);
        client.set_connect_timeout(settings.endpoint.connect_timeout());
        let client = Rc::new(RefCell::new(client));
        scheduler.start(&client)?;
        scheduler.run_forever()?;
        let error = *client.borrow().error();
        error.has_error().then_some(error)
    };
    scheduler.stop_all();

    println!("{}", report.borrow());
    match failure {
        Some(error) if !report.borrow().is_complete() => Err(CliError::ConnectionFailed(error.to_string()).into()),
        _ => Ok(()),
    }
}
