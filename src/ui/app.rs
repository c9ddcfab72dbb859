use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::chat::{ChatController, ChatUpdate};
use crate::common::UserId;
use crate::error::SelectError;

use super::components::input_bar::{self, Command};
use super::components::{chat_area, sidebar, status_bar};

/// Line-oriented front-end: prints change notifications and turns stdin lines into
/// controller calls.
pub struct ConsoleApp {
    controller: Arc<ChatController>,
    updates: broadcast::Receiver<ChatUpdate>,
}

impl ConsoleApp {
    pub fn new(controller: Arc<ChatController>, updates: broadcast::Receiver<ChatUpdate>) -> Self {
        Self {
            controller,
            updates,
        }
    }

    pub async fn run(mut self) -> io::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{}", input_bar::HELP);
        self.print_peers();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if !self.handle_input(&line).await {
                            break;
                        }
                    }
                    None => break,
                },
                update = self.updates.recv() => match update {
                    Ok(update) => self.render_update(update),
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Console fell behind by {missed} updates; redrawing");
                        self.print_peers();
                        self.print_conversation();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }

    /// Returns `false` once the user asked to quit.
    async fn handle_input(&mut self, line: &str) -> bool {
        let Some(command) = input_bar::parse(line) else {
            return true;
        };

        match command {
            Command::Peers => self.print_peers(),
            Command::Open(raw) => match self.controller.select_peer_str(&raw).await {
                Ok(_) => self.print_conversation(),
                Err(SelectError::History(_)) => self.print_status(),
                Err(err) => println!("! {err}"),
            },
            Command::More => {
                if let Err(err) = self.controller.load_page(false).await {
                    log::debug!("Older messages unavailable: {err}");
                }
            }
            Command::Read => self.controller.mark_active_read(),
            Command::Hide => self.controller.set_widget_visible(false),
            Command::Show => {
                self.controller.set_widget_visible(true);
                self.print_conversation();
            }
            Command::Retry(raw) => {
                if let Err(err) = self.controller.retry_pending(&raw) {
                    println!("! {err}");
                }
            }
            Command::Quit => return false,
            Command::Send(content) => {
                if let Err(err) = self.controller.send_message(&content) {
                    println!("! not sent: {err}");
                }
            }
            Command::Unknown(name) => println!("unknown command {name}; {}", input_bar::HELP),
        }
        true
    }

    fn render_update(&self, update: ChatUpdate) {
        match update {
            ChatUpdate::PeersChanged => {}
            ChatUpdate::PresenceChanged { peer, status } => {
                println!("{}", sidebar::presence_line(&self.peer_name(peer), status));
            }
            ChatUpdate::ConversationChanged { .. } | ChatUpdate::PendingChanged { .. } => {
                if self.controller.view().visible {
                    self.print_conversation();
                }
            }
            ChatUpdate::UnreadChanged { peer, count, .. } if count > 0 => {
                println!("* {count} unread from {}", self.peer_name(peer));
            }
            ChatUpdate::UnreadChanged { .. } => {}
            ChatUpdate::LoadFailed { peer, failure } => {
                println!("{}", status_bar::describe_failure(&failure, Some(peer)));
            }
            ChatUpdate::Connection(_) => self.print_status(),
            ChatUpdate::ServerError(message) => println!("! server: {message}"),
            ChatUpdate::Activity(event) => println!("~ forum activity: {}", event.kind()),
        }
    }

    fn peer_name(&self, peer: UserId) -> String {
        self.controller
            .peer(peer)
            .map(|peer| peer.display_name)
            .unwrap_or_else(|| format!("#{peer}"))
    }

    fn print_status(&self) {
        println!(
            "{}",
            status_bar::render(
                self.controller.connection_state(),
                &self.controller.view(),
                self.controller.badge_count(),
            )
        );
    }

    fn print_peers(&self) {
        let active = self.controller.active_peer();
        for line in sidebar::render(&self.controller.peers(), active, |id| {
            self.controller.unread_count(id)
        }) {
            println!("{line}");
        }
    }

    fn print_conversation(&self) {
        let Some(peer) = self.controller.active_peer() else {
            return;
        };
        let name = self.peer_name(peer);

        self.print_status();
        let local = self.controller.local_user().id;
        for line in chat_area::render(
            &self.controller.messages(),
            &self.controller.pending(),
            local,
            &name,
        ) {
            println!("{line}");
        }
    }
}
