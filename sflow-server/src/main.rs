use clap::{App, Arg};
use sflow_core::{NetworkError, Server, ServerConfig};
use slog::{error, info, Logger};
use sloggers::{Config as SloggersConfig, LoggerConfig};
use std::fs;
use std::process;

fn init_logging() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("built-in logging config is valid TOML");

    config.build_logger().expect("terminal logger always builds")
}

fn load_config(path: Option<&str>) -> ServerConfig {
    match path {
        None => ServerConfig::default(),
        Some(path) => {
            let contents = fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("error reading config file {path}: {e}"));
            serdeconv::from_toml_str(&contents)
                .unwrap_or_else(|e| panic!("error parsing config file {path}: {e}"))
        }
    }
}

pub fn main() {
    let matches = App::new("sflow-server")
        .version("0.1.0")
        .about("Runs the sflow routing server.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .long("config")
                .takes_value(true)
                .help("Path to a TOML config file (defaults are used if omitted)"),
        )
        .arg(
            Arg::with_name("BIND")
                .long("bind")
                .takes_value(true)
                .help("Override the bind address, e.g. 0.0.0.0:9000"),
        )
        .get_matches();

    let logger = init_logging();

    let mut config = load_config(matches.value_of("CONFIG_FILE"));
    if let Some(bind) = matches.value_of("BIND") {
        config.bind = bind.to_string();
    }

    if let Err(e) = config.validate() {
        error!(logger, "invalid configuration"; "error" => e);
        process::exit(1);
    }

    info!(logger, "starting sflow-server"; "bind" => &config.bind);

    let mut server = match Server::new(config, Some(&logger)) {
        Ok(server) => server,
        Err(e) => {
            error!(logger, "failed to start server"; "error" => ?e);
            process::exit(1);
        }
    };

    match server.run() {
        Ok(()) => process::exit(0),
        Err(NetworkError::Fatal(err_type)) => {
            error!(logger, "server terminated on fatal error"; "error" => ?err_type);
            process::exit(1);
        }
        Err(NetworkError::Wait) => unreachable!("run() never returns Wait"),
    }
}
