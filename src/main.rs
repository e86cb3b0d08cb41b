use clap::Parser;
use dotenv::dotenv;
use mycobot::run_with_config_path;

/// Mycobot - a mushroom expert chat in the browser
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Адрес прослушивания host:port, перекрывает server.host/server.port
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from `.env` file into std::env (optional)
    dotenv().ok();

    let args = Args::parse();

    run_with_config_path(&args.config, args.bind).await
}
