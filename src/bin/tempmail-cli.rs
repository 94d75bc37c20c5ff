#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for checking and emptying a temporary mailbox

use clap::{Parser, Subcommand};
use tempmail_client::{ClientConfig, Inbox, InboxEvent, MailClient, Message};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tempmail-cli")]
#[command(about = "Check and empty a temporary IMAP mailbox")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List messages, newest first
    Check {
        /// Maximum number of messages to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show a single message by UID
    Show {
        /// Message UID
        uid: u32,
    },

    /// Permanently delete a message by UID
    Delete {
        /// Message UID
        uid: u32,
    },

    /// Permanently delete every message
    DeleteAll,

    /// Log in once and report the message count
    Ping,

    /// Keep checking and print new arrivals until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env()?;
    let client = MailClient::new(config);

    match &args.command {
        Command::Check { limit } => cmd_check(&client, &args, *limit).await?,
        Command::Show { uid } => cmd_show(&client, &args, *uid).await?,
        Command::Delete { uid } => {
            client.delete_mail(*uid).await?;
            println!("Deleted message {uid}");
        }
        Command::DeleteAll => {
            client.delete_all_mails().await?;
            println!("Mailbox emptied");
        }
        Command::Ping => {
            let count = client.check_connection().await?;
            if args.json {
                println!("{}", serde_json::json!({ "ok": true, "messages": count }));
            } else {
                println!("OK, {count} message(s) in {}", client.config().credentials.address());
            }
        }
        Command::Watch => cmd_watch(client, &args).await?,
    }

    Ok(())
}

async fn cmd_check(client: &MailClient, args: &Args, limit: usize) -> anyhow::Result<()> {
    let messages = client.check_mail().await?;
    let display: Vec<&Message> = messages.iter().take(limit).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&display)?);
    } else {
        print_message_table(&display);
    }

    Ok(())
}

async fn cmd_show(client: &MailClient, args: &Args, uid: u32) -> anyhow::Result<()> {
    let messages = client.check_mail().await?;
    let message = messages
        .iter()
        .find(|m| m.uid == uid)
        .ok_or_else(|| anyhow::anyhow!("No message with UID {uid}"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(message)?);
    } else {
        print_message_detail(message);
    }

    Ok(())
}

async fn cmd_watch(client: MailClient, args: &Args) -> anyhow::Result<()> {
    let interval = client.config().check_interval;
    let inbox = Inbox::spawn(client);
    let mut events = inbox.subscribe();
    eprintln!("Checking every {}s, Ctrl-C to stop", interval.as_secs());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(InboxEvent::NewMessages { uids }) => {
                    let snapshot = inbox.snapshot().await?;
                    let arrived: Vec<&Message> = snapshot
                        .messages
                        .iter()
                        .filter(|m| uids.contains(&m.uid))
                        .collect();
                    if args.json {
                        for message in arrived {
                            println!("{}", serde_json::to_string(message)?);
                        }
                    } else {
                        print_message_table(&arrived);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("Missed {skipped} notification(s)");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    inbox.shutdown().await.ok();
    Ok(())
}

fn print_message_table(messages: &[&Message]) {
    if messages.is_empty() {
        println!("No messages found.");
        return;
    }

    println!("{:<8} {:<30} {}", "UID", "From", "Subject");
    println!("{}", "-".repeat(80));

    for message in messages {
        println!(
            "{:<8} {:<30} {}",
            message.uid,
            truncate(&message.from, 28),
            truncate(&message.subject, 40),
        );
    }

    println!("\n{} message(s)", messages.len());
}

fn print_message_detail(message: &Message) {
    println!("UID:     {}", message.uid);
    println!("From:    {}", message.from);
    println!("Subject: {}", message.subject);
    println!("\n--- Body ---\n");
    println!("{}", message.plain_content);

    if message.has_html() {
        println!("\n(HTML version available, {} bytes)", message.html_content.len());
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
