use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, ChatController, ChatEvent, ClientError, ClientRuntime, SubmitOutcome,
};
use shared::{
    domain::{Message, TaskId, TaskPriority, TaskStatus, User, UserId, WorkspaceId},
    protocol::{RegisterRequest, TaskDraft},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "zynko", about = "Zynko messaging and task client")]
struct Cli {
    /// Settings file; defaults to ./zynko.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    Register {
        firstname: String,
        lastname: String,
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    Contacts,
    Search {
        query: String,
    },
    History {
        #[arg(long)]
        peer: String,
    },
    Send {
        #[arg(long)]
        peer: String,
        #[arg(long)]
        text: String,
    },
    /// Stays connected and prints deliveries until interrupted.
    Listen {
        #[arg(long)]
        peer: Option<String>,
    },
    Workspaces,
    CreateWorkspace {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "member")]
        members: Vec<String>,
    },
    Tasks {
        #[arg(long)]
        workspace: String,
    },
    AddTask {
        #[arg(long)]
        workspace: String,
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "Backlog", value_parser = parse_status)]
        status: TaskStatus,
        #[arg(long, default_value = "low", value_parser = parse_priority)]
        priority: TaskPriority,
        #[arg(long)]
        assign: Option<String>,
    },
    MoveTask {
        #[arg(long)]
        workspace: String,
        task: String,
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },
}

fn parse_status(raw: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(raw).ok_or_else(|| {
        let known: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown status '{raw}', expected one of {}", known.join(", "))
    })
}

fn parse_priority(raw: &str) -> Result<TaskPriority, String> {
    TaskPriority::parse(raw)
        .ok_or_else(|| format!("unknown priority '{raw}', expected low, medium, high or urgent"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref())?;
    let runtime = ClientRuntime::from_settings(&settings).map_err(friendly)?;

    let result = run(&runtime, cli.command).await;
    runtime.shutdown().await;
    result
}

/// Replaces a client error with the text shown to users, keeping the detail
/// in the log.
fn friendly(err: ClientError) -> anyhow::Error {
    warn!("{err}");
    if err.requires_reauth() {
        anyhow!("{} Run `zynko login` first.", err.user_message())
    } else {
        anyhow!(err.user_message())
    }
}

async fn run(runtime: &ClientRuntime, command: Command) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            let session = runtime
                .auth()
                .login(&username, &password)
                .await
                .map_err(friendly)?;
            println!("signed in as {}", session.user_id);
        }
        Command::Register {
            firstname,
            lastname,
            username,
            password,
        } => {
            runtime
                .auth()
                .register(RegisterRequest {
                    lastname,
                    firstname,
                    username: username.clone(),
                    password,
                })
                .await
                .map_err(friendly)?;
            println!("registered {username}; sign in with `zynko login`");
        }
        Command::Logout => {
            let next = runtime.logout().await.map_err(friendly)?;
            println!("signed out; continue at {}", next.path());
        }
        Command::Whoami => {
            let chat = runtime.chat().await.map_err(friendly)?;
            let me = chat.current_user().await.map_err(friendly)?;
            println!("{} (@{}, {})", me.display_name(), me.username, me.id);
            chat.unmount().await;
        }
        Command::Contacts => {
            let chat = runtime.chat().await.map_err(friendly)?;
            let session = runtime.auth().require().await.map_err(friendly)?;
            let contacts = chat.contacts().await;
            if contacts.is_empty() {
                println!("no conversations yet");
            }
            for contact in contacts {
                let peer = contact.peer_of(&session.user_id);
                let prefix = if contact.last_sent_by(&session.user_id) {
                    "you: "
                } else {
                    ""
                };
                println!(
                    "{:<24} {:<12} {prefix}{}",
                    peer.display_name(),
                    peer.id,
                    contact.last_message
                );
            }
            chat.unmount().await;
        }
        Command::Search { query } => {
            let chat = runtime.chat().await.map_err(friendly)?;
            for user in chat.search_users(&query).await.map_err(friendly)? {
                println!("{:<12} @{:<16} {}", user.id, user.username, user.display_name());
            }
            chat.unmount().await;
        }
        Command::History { peer } => {
            let chat = runtime.chat().await.map_err(friendly)?;
            let peer = resolve_peer(runtime, &chat, &peer).await?;
            chat.start_conversation(peer.clone()).await.map_err(friendly)?;
            print_messages(&peer, &chat.messages().await);
            chat.unmount().await;
        }
        Command::Send { peer, text } => {
            let chat = runtime.chat().await.map_err(friendly)?;
            let peer = resolve_peer(runtime, &chat, &peer).await?;
            chat.start_conversation(peer.clone()).await.map_err(friendly)?;
            match chat.submit(&text).await.map_err(friendly)? {
                SubmitOutcome::Sent => {
                    if let Some(error) = chat.last_error().await {
                        eprintln!("warning: {error}");
                    }
                    print_messages(&peer, &chat.messages().await);
                }
                SubmitOutcome::Skipped(reason) => {
                    return Err(anyhow!("nothing sent ({reason:?})"));
                }
            }
            chat.unmount().await;
        }
        Command::Listen { peer } => {
            let chat = runtime.chat().await.map_err(friendly)?;
            if let Some(peer) = peer {
                let peer = resolve_peer(runtime, &chat, &peer).await?;
                chat.start_conversation(peer.clone()).await.map_err(friendly)?;
                print_messages(&peer, &chat.messages().await);
            }
            listen(&chat).await?;
            chat.unmount().await;
        }
        Command::Workspaces => {
            let board = runtime.tasks().await.map_err(friendly)?;
            for workspace in board.load_workspaces().await.map_err(friendly)? {
                println!(
                    "{:<12} {:<24} {} member(s)  {}",
                    workspace.id,
                    workspace.name,
                    workspace.members.len(),
                    workspace.description
                );
            }
        }
        Command::CreateWorkspace {
            name,
            description,
            members,
        } => {
            let board = runtime.tasks().await.map_err(friendly)?;
            let members = members.into_iter().map(UserId::new).collect();
            let created = board
                .create_workspace(&name, &description, members)
                .await
                .map_err(friendly)?;
            println!("created workspace {} ({})", created.name, created.id);
        }
        Command::Tasks { workspace } => {
            let board = runtime.tasks().await.map_err(friendly)?;
            let columns = board
                .select_workspace(&WorkspaceId::new(workspace))
                .await
                .map_err(friendly)?;
            for column in columns {
                println!("== {} ({})", column.status.as_str(), column.tasks.len());
                for task in column.tasks {
                    let due = task
                        .due_date
                        .map(|d| d.format(" due %Y-%m-%d").to_string())
                        .unwrap_or_default();
                    println!("   {:<10} [{:?}] {}{due}", task.id, task.priority, task.title);
                }
            }
        }
        Command::AddTask {
            workspace,
            title,
            description,
            status,
            priority,
            assign,
        } => {
            let board = runtime.tasks().await.map_err(friendly)?;
            let workspace_id = WorkspaceId::new(workspace);
            board
                .select_workspace(&workspace_id)
                .await
                .map_err(friendly)?;
            let task = board
                .create_task(TaskDraft {
                    title,
                    description,
                    status,
                    priority,
                    due_date: None,
                    workspace_id,
                    assigned_to: assign.map(UserId::new),
                })
                .await
                .map_err(friendly)?;
            println!("created task {} in {}", task.id, task.status.as_str());
        }
        Command::MoveTask {
            workspace,
            task,
            status,
        } => {
            let board = runtime.tasks().await.map_err(friendly)?;
            board
                .select_workspace(&WorkspaceId::new(workspace))
                .await
                .map_err(friendly)?;
            let moved = board
                .move_task(&TaskId::new(task), status)
                .await
                .map_err(friendly)?;
            println!("{} is now {}", moved.title, moved.status.as_str());
        }
    }
    Ok(())
}

/// Finds `peer_id` among the directory entries, falling back to a profile
/// lookup for users without a conversation yet.
async fn resolve_peer(
    runtime: &ClientRuntime,
    chat: &ChatController,
    peer_id: &str,
) -> Result<User> {
    let session = runtime.auth().require().await.map_err(friendly)?;
    let peer_id = UserId::new(peer_id);
    if let Some(contact) = chat.find_contact(&peer_id).await {
        return Ok(contact.peer_of(&session.user_id).clone());
    }
    runtime
        .backend()
        .fetch_user(&session.token, &peer_id)
        .await
        .map_err(friendly)
        .with_context(|| format!("unknown user '{peer_id}'"))
}

fn print_messages(peer: &User, messages: &[Message]) {
    println!("-- conversation with {} --", peer.display_name());
    for message in messages {
        let who = if message.is_from(&peer.id) {
            peer.username.as_str()
        } else {
            "you"
        };
        println!(
            "[{}] {who}: {}",
            message.created_at.format("%H:%M"),
            message.message
        );
    }
}

async fn listen(chat: &ChatController) -> Result<()> {
    let mut events = chat.subscribe_events();
    info!("listening for deliveries, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ChatEvent::ConversationUpdated { messages, .. }) => {
                    if let Some(last) = messages.last() {
                        println!(
                            "[{}] {}: {}",
                            last.created_at.format("%H:%M"),
                            last.sender.id,
                            last.message
                        );
                    }
                }
                Ok(ChatEvent::DirectoryUpdated(contacts)) => {
                    println!("({} conversation(s) updated)", contacts.len());
                }
                Ok(ChatEvent::Error(message)) => eprintln!("error: {message}"),
                Ok(ChatEvent::ReauthRequired) => {
                    return Err(anyhow!("session expired; run `zynko login` again"));
                }
                Ok(ChatEvent::ComposeCleared) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "listener fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
