use clap::Parser;
use mithermometer_listener::app::{self, Options};
use mithermometer_listener::logging;
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;
/// 128 + SIGINT, as a shell reports a process killed by Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    if let Err(why) = logging::init(options.verbose) {
        eprintln!("error: invalid log filter: {}", why);
        std::process::exit(EXIT_ERROR);
    }

    let mut stdout = std::io::stdout();
    // scanning only stops on an error or an interrupt
    match app::run(options, &mut stdout).await {
        Ok(never) => match never {},
        Err(why) if why.is_interrupted() => std::process::exit(EXIT_INTERRUPTED),
        Err(why) => {
            tracing::error!("{}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
