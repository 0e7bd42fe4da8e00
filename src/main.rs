use std::{env, panic, process};

use tracing_subscriber::EnvFilter;

pub mod app;
pub mod config;
pub mod media;
pub mod task;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // a panic inside the job must not leave the thread running unsupervised
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    // gracefully close the app when receiving SIGINT, SIGTERM, or SIGHUP
    ctrlc::set_handler(move || {
        process::exit(130);
    })
    .expect("Error setting Ctrl-C handler");

    process::exit(app::run(env::args_os()));
}
