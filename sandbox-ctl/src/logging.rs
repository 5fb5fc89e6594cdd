use console::style;
use env_logger::{Builder, Env};
use log::{Level, LevelFilter};
use std::io::Write;

/// Initialize logger; `RUST_LOG` overrides the level picked by `verbose`
pub fn init_logger(verbose: bool) {
    let env = Env::default().filter_or("RUST_LOG", if verbose { "debug" } else { "warn" });

    Builder::from_env(env)
        .format(move |buf, record| {
            let level = match record.level() {
                Level::Error => format!("{}", style("ERROR").red().bold()),
                Level::Warn => format!("{}", style("WARN ").yellow().bold()),
                Level::Info => format!("{}", style("INFO ").green()),
                Level::Debug => format!("{}", style("DEBUG").cyan()),
                Level::Trace => format!("{}", style("TRACE").dim()),
            };
            if verbose {
                writeln!(buf, "{} {} {}", level, style(record.target()).dim(), record.args())
            } else {
                writeln!(buf, "{} {}", level, record.args())
            }
        })
        // zbus stays at warn even under RUST_LOG=debug
        .filter_module("zbus", LevelFilter::Warn)
        .init();
}
