use anyhow::Context;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

use ticketdesk::channels::discord::gateway::GatewayClient;
use ticketdesk::channels::discord::interactions::DiscordPresenter;
use ticketdesk::channels::discord::{ticket_commands, DiscordClient};
use ticketdesk::config::AppConfig;
use ticketdesk::tickets::store::InMemoryTicketStore;
use ticketdesk::tickets::{EventRouter, TicketService};
use ticketdesk::web_server::{run_server, InteractionState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let client = Arc::new(DiscordClient::new(&config.discord));

    let args: Vec<String> = std::env::args().collect();
    if let Some(command) = args.get(1) {
        match command.as_str() {
            "register-commands" => {
                let count = client
                    .register_guild_commands(&ticket_commands())
                    .await
                    .context("Failed to register slash commands")?;
                info!("{count} command(s) registered for guild {}", config.discord.guild_id);
                return Ok(());
            }
            other => anyhow::bail!("Unknown command: {other}. Supported: register-commands"),
        }
    }

    info!(
        "Starting ticketdesk {} (staff role {}, close delay {}s)",
        env!("CARGO_PKG_VERSION"),
        config.tickets.staff_role,
        config.tickets.close_delay.as_secs()
    );

    let presenter = Arc::new(DiscordPresenter::new(Arc::clone(&client)));
    let service = Arc::new(TicketService::new(
        &config.tickets,
        client,
        presenter.clone(),
        Arc::new(InMemoryTicketStore::new()),
    ));
    let router = Arc::new(EventRouter::new(service, presenter.clone()));
    let gateway = GatewayClient::new(&config.discord, &config.tickets.command_prefix, Arc::clone(&router));
    tokio::spawn(gateway.run());

    let state = Arc::new(InteractionState::new(
        router,
        presenter,
        config.discord.public_key.clone(),
    ));

    run_server(&config.server.bind_address(), state)
        .await
        .context("Interaction server stopped")?;
    Ok(())
}
