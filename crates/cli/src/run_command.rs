//! `waigaya run`: connect, relay watched channels to the terminal, and
//! reconnect only when the user asks for it.
//!
//! Lines typed on stdin steer the session: an empty line reconnects,
//! `/pause` and `/resume` hold the display, anything else is shown as-is.

use std::sync::Arc;

use {
    anyhow::Result,
    tokio::io::{AsyncBufReadExt, BufReader},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    waigaya_common::Coded,
    waigaya_display::DisplayQueue,
    waigaya_slack::{ConnectionManager, ConnectionState, ConnectionStatus, IngestionPipeline},
};

use crate::{app::App, terminal::TerminalSink};

pub async fn run(app: App) -> Result<()> {
    app.restore_identity().await;
    if app.watchlist.is_empty() {
        warn!("no channels are watched; add one with `waigaya channels add <channel-id>`");
    }

    let (manager, events) = ConnectionManager::new(app.api.clone(), app.connection_settings());
    let manager = Arc::new(manager);

    let sink = Arc::new(TerminalSink::new(app.watchlist.clone()));
    let queue = DisplayQueue::new(app.display_settings(), sink);
    let pipeline = Arc::new(IngestionPipeline::new(
        app.watchlist.clone(),
        app.identity.clone(),
        manager.subscribe(),
        Arc::new(queue.clone()),
    ));

    let cancel = CancellationToken::new();
    let pipeline_task = {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(events, cancel).await })
    };

    // Subscribed first so a failed initial connect is reported below.
    let mut status = manager.subscribe();
    connect(&app, &manager).await;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                report_status(&current);
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match Input::parse(&line) {
                    Input::Reconnect => {
                        if manager.state() == ConnectionState::Disconnected {
                            connect(&app, &manager).await;
                        }
                    },
                    Input::Pause => {
                        if queue.pause() {
                            eprintln!("Display paused. Type /resume to continue.");
                        }
                    },
                    Input::Resume => {
                        queue.resume();
                    },
                    Input::Text(text) => {
                        queue.enqueue_text(text);
                    },
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "stdin unreadable, reconnect on Enter disabled");
                    stdin_open = false;
                },
            },
        }
    }

    manager.disconnect().await;
    cancel.cancel();
    if let Err(e) = pipeline_task.await {
        warn!(error = %e, "pipeline task failed");
    }
    queue.clear();
    app.persist_identity().await;
    app.dump_metrics().await;
    Ok(())
}

async fn connect(app: &App, manager: &ConnectionManager) {
    match manager.connect(&app.credentials).await {
        Ok(ready) => {
            let team = ready.identity.team.as_deref().unwrap_or("workspace");
            eprintln!(
                "Connected to {team} as {} ({} channels watched). Ctrl-C to quit.",
                ready.identity.user,
                app.watchlist.len()
            );
            let cached = app.identity.cache_status();
            if cached.users == 0 {
                match app.identity.bulk_refresh_users().await {
                    Ok(count) => info!(count, "user directory loaded"),
                    Err(e) => warn!(error = %e, "user directory not loaded, resolving on demand"),
                }
            }
            if cached.emojis == 0
                && let Err(e) = app.identity.refresh_emoji().await
            {
                warn!(error = %e, "custom emoji not loaded");
            }
        },
        Err(e) => debug!(code = e.code().as_str(), "connect failed"),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Reconnect,
    Pause,
    Resume,
    Text(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => Self::Reconnect,
            "/pause" => Self::Pause,
            "/resume" => Self::Resume,
            text => Self::Text(text),
        }
    }
}

fn report_status(status: &ConnectionStatus) {
    info!(state = %status.state, "connection state");
    if status.state == ConnectionState::Disconnected
        && let Some(err) = &status.last_error
    {
        eprintln!("Disconnected: {err}. Press Enter to reconnect.");
    }
}
