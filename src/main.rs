// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use mdp_feedhandler::config::AppConfig;
use mdp_feedhandler::handler::FeedHandler;
use mdp_feedhandler::util::BarrierFlag;

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {program} [config.toml] [options]\n\
         \n\
         Options:\n\
         \x20 --interface <ip>            Network interface (default: 0.0.0.0)\n\
         \x20 --conflation-interval <ms>  Conflation interval in ms (default: 100)\n\
         \x20 --recovery-timeout <ms>     Recovery timeout in ms (default: 5000)\n\
         \x20 -h, --help                  Show this help"
    );
}

fn parse_args(cfg: &mut AppConfig) -> anyhow::Result<Option<PathBuf>> {
    let argv: Vec<String> = std::env::args().collect();
    let program = argv[0].clone();
    let mut config_path = None;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--interface" => {
                i += 1;
                let v = argv.get(i).ok_or_else(|| anyhow::anyhow!("--interface needs a value"))?;
                cfg.interface = v.parse()?;
            }
            "--conflation-interval" => {
                i += 1;
                let v = argv
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--conflation-interval needs a value"))?;
                cfg.conflation_interval_ms = v.parse()?;
            }
            "--recovery-timeout" => {
                i += 1;
                let v = argv
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--recovery-timeout needs a value"))?;
                cfg.recovery_timeout_ms = v.parse()?;
            }
            "-h" | "--help" => {
                print_usage(&program);
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') && config_path.is_none() && i == 1 => {
                config_path = Some(PathBuf::from(arg));
            }
            arg => {
                eprintln!("Unknown option: {arg}");
                print_usage(&program);
                std::process::exit(1);
            }
        }
        i += 1;
    }
    Ok(config_path)
}

fn init_logger(json_logs: bool) {
    if json_logs {
        let mut b =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        b.format(|buf, record| {
            use std::io::Write;
            let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            writeln!(
                buf,
                "{{\"ts\":\"{}\",\"level\":\"{}\",\"target\":\"{}\",\"msg\":\"{}\"}}",
                ts,
                record.level(),
                record.target(),
                record.args().to_string().replace('"', "'")
            )
        })
        .init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}

fn main() -> anyhow::Result<()> {
    // First pass with defaults just to find the config path, then load the
    // file and let the flags override it.
    let mut probe = AppConfig::default();
    let config_path = parse_args(&mut probe)?;

    let mut cfg = AppConfig::load(config_path.as_deref())?;
    parse_args(&mut cfg)?;
    cfg.validate()?;

    init_logger(cfg.json_logs);
    info!("starting feed handler: {cfg:?}");

    let stop = Arc::new(BarrierFlag::default());
    {
        let s = stop.clone();
        ctrlc::set_handler(move || {
            s.raise();
        })?;
    }

    let mut handler = FeedHandler::new(cfg, stop)?;
    handler.run()?;

    info!("clean shutdown");
    Ok(())
}
