use std::sync::Arc;

use listener::address::Address;
use listener::sink::Stdout;
use listener::Listener;

fn main() -> anyhow::Result<()> {
    // diagnostics go to stderr; stdout is reserved for the banner and logged requests
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let listener = Listener::bind(Address::default(), Arc::new(Stdout))?;

    println!("{}", listener.banner());
    log::info!("logging every request to standard output");

    listener.run()
}
