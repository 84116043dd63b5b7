use clap::Parser;
use tonepicker_lib::cli::CliArgs;
use tonepicker_lib::settings::AppSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // A missing .env file is normal outside development.
    dotenv::dotenv().ok();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("Parsed arguments: {:?}", args);
    tonepicker_lib::run(args, AppSettings::from_env()).await
}
