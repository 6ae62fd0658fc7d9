mod app;
mod logging;
mod scene;

use std::env;

use logging::{init_logging, LoggingConfig};

#[show_image::main]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default());

    let args: Vec<String> = env::args().collect();
    let params = match app::Params::from_args(&args) {
        Ok(params) => params,
        Err(error) => {
            log::error!("{:#}", error);
            eprintln!("{}", app::USAGE);
            std::process::exit(2);
        }
    };

    app::run(params)?;

    return Ok(());
}
