//! `waigaya users …`: the identity cache, custom emoji included.

use {anyhow::Result, clap::Subcommand, waigaya_common::ActionResult};

use crate::{app::App, report};

#[derive(Subcommand)]
pub enum UserAction {
    /// Fetch every workspace member and replace the cache.
    Reload,
    /// Fetch the workspace's custom emoji and replace the cache.
    Emoji,
    /// Show how many users, channels and custom emoji are cached.
    Count,
}

pub async fn handle_users(app: &App, action: UserAction, json: bool) -> Result<()> {
    app.restore_identity().await;
    match action {
        UserAction::Reload => {
            let result = app.identity.bulk_refresh_users().await;
            if result.is_ok() {
                app.persist_identity().await;
            }
            report(
                &ActionResult::from_result(&result, |n| format!("loaded {n} users")),
                json,
            )
        },
        UserAction::Emoji => {
            let result = app.identity.refresh_emoji().await;
            if result.is_ok() {
                app.persist_identity().await;
            }
            report(
                &ActionResult::from_result(&result, |n| format!("loaded {n} custom emoji")),
                json,
            )
        },
        UserAction::Count => {
            let status = app.identity.cache_status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("users:    {}", status.users);
                println!("channels: {}", status.channels);
                println!("emojis:   {}", status.emojis);
            }
            Ok(())
        },
    }
}
