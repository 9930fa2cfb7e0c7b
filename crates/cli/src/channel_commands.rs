//! `waigaya channels …`: list, inspect and edit the watch list.

use {anyhow::Result, clap::Subcommand, waigaya_common::ActionResult};

use crate::{app::App, report};

#[derive(Subcommand)]
pub enum ChannelAction {
    /// List every channel the bot can see (archived ones excluded).
    List,
    /// Show the watched channels.
    Watched,
    /// Start watching a channel the bot is a member of.
    Add {
        /// Channel id, e.g. C0123456789.
        channel_id: String,
    },
    /// Stop watching a channel.
    Remove { channel_id: String },
}

pub async fn handle_channels(app: &App, action: ChannelAction, json: bool) -> Result<()> {
    match action {
        ChannelAction::List => list(app, json).await,
        ChannelAction::Watched => {
            let watched = app.directory.watched();
            if json {
                println!("{}", serde_json::to_string_pretty(&watched)?);
            } else if watched.is_empty() {
                println!("No channels watched.");
            } else {
                for channel in &watched {
                    println!("  {}  #{}", channel.id, channel.name);
                }
            }
            Ok(())
        },
        ChannelAction::Add { channel_id } => {
            let result = app.directory.add_watch(channel_id.trim()).await;
            report(&result, json)
        },
        ChannelAction::Remove { channel_id } => {
            let result = app.directory.remove_watch(channel_id.trim()).await;
            report(&result, json)
        },
    }
}

async fn list(app: &App, json: bool) -> Result<()> {
    let channels = match app.directory.list_channels().await {
        Ok(channels) => channels,
        Err(e) => return report(&ActionResult::from_error(&e), json),
    };
    app.persist_identity().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&channels)?);
        return Ok(());
    }
    for channel in &channels {
        let watched = if app.watchlist.contains(&channel.id) {
            "*"
        } else {
            " "
        };
        let member = match channel.is_member {
            Some(false) => " (not a member)",
            _ => "",
        };
        let lock = if channel.is_private {
            " [private]"
        } else {
            ""
        };
        let members = channel
            .member_count
            .map(|n| format!(" {n} members"))
            .unwrap_or_default();
        println!(
            "{watched} {}  #{}{lock}{members}{member}",
            channel.id, channel.name
        );
    }
    println!("{} channels, {} watched", channels.len(), app.watchlist.len());
    Ok(())
}
