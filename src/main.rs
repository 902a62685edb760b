use psgate::cli::{commands, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments; logging is initialized by the command handler
    // once the configuration (level, format) is known.
    let cli = Cli::parse_args();

    // Execute the command
    commands::execute_command(cli.command).await?;

    Ok(())
}
