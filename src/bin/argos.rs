use std::path::Path;
use std::process;

use getopts::Options;

use argos::sensor::config::{Config, DEFAULT_CONFIG_PATH};
use argos::sensor::supervisor::Supervisor;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

fn list_devices() -> i32 {
    match pcap::Device::list() {
        Ok(devices) => {
            for device in devices {
                match device.desc {
                    Some(desc) => println!("{}\t{}", device.name, desc),
                    None => println!("{}", device.name),
                }
            }
            0
        }
        Err(e) => {
            eprintln!("cannot list capture devices: {}", e);
            1
        }
    }
}

/// Main entry point for the Argos passive DNS monitor
#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("c", "config", "path to the configuration file", "FILE");
    opts.optopt("i", "interface", "capture interface (overrides config)", "DEVICE");
    opts.optopt("b", "bpf", "capture filter expression (overrides config)", "FILTER");
    opts.optopt("d", "database", "SQLite database path (overrides config)", "FILE");
    opts.optflag("l", "list-devices", "list capture devices and exit");
    opts.optflag("v", "verbose", "enable debug logging (includes STATS lines)");

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, &opts);
        return;
    }

    let level = if opt_matches.opt_present("v") {
        log::Level::Debug
    } else {
        log::Level::Info
    };
    simple_logger::init_with_level(level).expect("Failed to initialize logger");

    if opt_matches.opt_present("l") {
        process::exit(list_devices());
    }

    let mut config = match opt_matches.opt_str("c") {
        Some(path) => match Config::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("cannot load configuration {}: {}", path, e);
                process::exit(1);
            }
        },
        None => {
            if Path::new(DEFAULT_CONFIG_PATH).exists() {
                match Config::load(DEFAULT_CONFIG_PATH) {
                    Ok(config) => config,
                    Err(e) => {
                        log::error!("cannot load configuration {}: {}", DEFAULT_CONFIG_PATH, e);
                        process::exit(1);
                    }
                }
            } else {
                log::info!("no configuration file found, using defaults");
                Config::default()
            }
        }
    };

    if let Some(device) = opt_matches.opt_str("i") {
        config.device = device;
    }
    if let Some(filter) = opt_matches.opt_str("b") {
        config.filter = filter;
    }
    if let Some(database) = opt_matches.opt_str("d") {
        config.database = database;
    }

    config.log_summary();

    if let Err(e) = Supervisor::new(config).run().await {
        log::error!("argos failed: {}", e);
        process::exit(1);
    }
}
