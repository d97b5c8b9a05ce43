use crate::api::{BackendApi, HttpBackend, ProfileUpdate, Signup};
use crate::catalog::CatalogCache;
use crate::config::Config;
use crate::error::FridayError;
use crate::local_store::{Language, LocalStore};
use crate::models::{Attachment, MessageId};
use crate::realtime::WebSocketTransport;
use crate::session::{Session, SessionContext};
use crate::transcript::{self, Sender, TranscriptItem};
use crate::workspace::{SendOutcome, Workspace};
use chrono::{FixedOffset, Local};
use colored::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Terminal front end. `args[0]` is the binary name.
pub async fn run(config: Config, args: Vec<String>) -> anyhow::Result<()> {
    let bin = args
        .first()
        .map(|s| s.as_str())
        .unwrap_or("friday")
        .to_string();

    if args.len() < 2 {
        print_usage(&bin);
        return Ok(());
    }

    let store = LocalStore::new(&config.data_dir)?;
    let sessions = SessionContext::new(store.clone());
    let backend = Arc::new(HttpBackend::new(config.api_url.clone()));
    let command = args[1].as_str();

    match command {
        "login" => {
            if args.len() < 4 {
                eprintln!("{}", format!("Usage: {} login <email> <password>", bin).yellow());
                return Ok(());
            }
            let session = sessions.login(backend.as_ref(), &args[2], &args[3]).await?;
            println!(
                "{} Logged in as {} ({})",
                "✓".green().bold(),
                session.display_name().cyan(),
                session.email()
            );
        }
        "signup" => {
            let Some((fields, picture)) = split_picture(&args[2..]) else {
                eprintln!("{}", signup_usage(&bin).yellow());
                return Ok(());
            };
            let [email, password, first_name, last_name, phone_number] = fields.as_slice() else {
                eprintln!("{}", signup_usage(&bin).yellow());
                return Ok(());
            };
            let signup = Signup {
                email: email.clone(),
                password: password.clone(),
                first_name: first_name.clone(),
                last_name: last_name.clone(),
                phone_number: phone_number.clone(),
                profile_picture: load_picture(picture).await?,
            };
            let profile = sessions.signup(backend.as_ref(), &signup).await?;
            println!(
                "{} Account created for {}. Log in with `{} login {} <password>`",
                "✓".green().bold(),
                profile.email.cyan(),
                bin,
                profile.email
            );
        }
        "profile" => {
            let Some(parsed) = parse_profile_args(&args[2..]) else {
                eprintln!(
                    "{}",
                    format!(
                        "Usage: {} profile [--first <name>] [--last <name>] [--phone <number>] [--picture <path>]",
                        bin
                    )
                    .yellow()
                );
                return Ok(());
            };
            require_session(&sessions)?;
            let update = ProfileUpdate {
                first_name: parsed.first_name,
                last_name: parsed.last_name,
                phone_number: parsed.phone_number,
                profile_picture: load_picture(parsed.picture).await?,
            };
            let session = sessions.update_profile(backend.as_ref(), &update).await?;
            println!(
                "{} Profile updated: {} <{}>",
                "✓".green().bold(),
                session.display_name().cyan(),
                session.email()
            );
        }
        "logout" => {
            if sessions.logout()? {
                println!("{} Logged out", "✓".green().bold());
            } else {
                println!("{}", "Not logged in".yellow());
            }
        }
        "whoami" => match sessions.load()? {
            Some(session) => {
                println!(
                    "{} [{}] {} <{}>",
                    format!("#{}", session.user_id()).dimmed(),
                    session.initials().bright_cyan().bold(),
                    session.display_name(),
                    session.email()
                );
                println!("  Language: {}", store.language()?.to_string().cyan());
            }
            None => println!("{}", "Not logged in".yellow()),
        },
        "language" => match args.get(2) {
            Some(lang) => {
                let lang: Language = lang.parse()?;
                store.set_language(lang)?;
                println!("{} Language set to {}", "✓".green().bold(), lang.to_string().cyan());
            }
            None => println!("{}", store.language()?),
        },
        "agents" => {
            let session = require_session(&sessions)?;
            let catalog = CatalogCache::new(backend.clone());
            list_agents(&catalog, &session).await;
        }
        "plans" => {
            let session = sessions.load()?;
            let catalog = CatalogCache::new(backend.clone());
            let plans = catalog.list_active_plans().await;
            if plans.is_empty() {
                println!("{}", "No active plans".yellow());
            } else {
                println!("{}", format!("Plans ({})", plans.len()).bright_cyan().bold());
                println!("{}", "─".repeat(60).dimmed());
                for plan in plans {
                    let price = match plan.price {
                        Some(p) => format!("{:.2}", p),
                        None => "free".to_string(),
                    };
                    println!(
                        "  {} {} [{}] up to {} agents",
                        format!("#{}", plan.id).dimmed(),
                        plan.name.cyan(),
                        price.green(),
                        plan.max_agents
                    );
                }
            }
            if session.is_none() {
                println!("{}", "Log in to subscribe.".dimmed());
            }
        }
        "subscribe" => {
            if args.len() < 4 {
                eprintln!(
                    "{}",
                    format!("Usage: {} subscribe <plan_id> <agent_id>...", bin).yellow()
                );
                return Ok(());
            }
            let session = require_session(&sessions)?;
            let plan_id = parse_id(&args[2], "plan id")?;
            let agent_ids = args[3..]
                .iter()
                .map(|a| parse_id(a, "agent id"))
                .collect::<Result<Vec<_>, _>>()?;

            let catalog = CatalogCache::new(backend.clone());
            // Warm the plan entry so the agent limit is checked locally
            catalog.list_active_plans().await;
            let sub = catalog
                .create_subscription(&session, plan_id, agent_ids)
                .await?;
            println!(
                "{} Subscription {} created with {} agents",
                "✓".green().bold(),
                sub.id.to_string().cyan(),
                sub.agents.len()
            );
        }
        "conversations" => {
            let session = require_session(&sessions)?;
            let conversations = backend.list_conversations(&session).await?;
            if conversations.is_empty() {
                println!("{}", "No conversations yet".yellow());
            }
            let offset = local_offset();
            for preview in transcript::previews(&conversations) {
                let when = preview
                    .timestamp
                    .map(|t| t.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                let who = match preview.last_sender {
                    Some(Sender::System) => "agent: ",
                    Some(Sender::User) => "you: ",
                    None => "",
                };
                println!(
                    "  {} {} {}{}",
                    format!("#{}", preview.conversation_id).cyan(),
                    when.dimmed(),
                    who,
                    preview.last_content.unwrap_or_default()
                );
            }
        }
        "send" => {
            let Some(request) = parse_send_args(&args[2..]) else {
                eprintln!(
                    "{}",
                    format!(
                        "Usage: {} send <agent_id> [--conversation <id>] [--file <path>] <message...>",
                        bin
                    )
                    .yellow()
                );
                return Ok(());
            };
            let session = require_session(&sessions)?;
            let mut workspace =
                Workspace::enter(Some(session), backend.clone(), transport(&config), &config)
                    .await?;
            let result = send_once(&mut workspace, request).await;
            workspace.leave().await;
            result?;
        }
        "chat" => {
            let Some(agent_id) = args.get(2) else {
                eprintln!("{}", format!("Usage: {} chat <agent_id>", bin).yellow());
                return Ok(());
            };
            let agent_id = parse_id(agent_id, "agent id")?;
            let session = require_session(&sessions)?;
            let mut workspace =
                Workspace::enter(Some(session), backend.clone(), transport(&config), &config)
                    .await?;
            let result = chat_loop(&mut workspace, agent_id).await;
            workspace.leave().await;
            result?;
        }
        "password" => {
            if args.len() < 4 {
                eprintln!("{}", format!("Usage: {} password <old> <new>", bin).yellow());
                return Ok(());
            }
            let session = require_session(&sessions)?;
            let msg = backend.change_password(&session, &args[2], &args[3]).await?;
            println!("{} {}", "✓".green().bold(), msg);
        }
        _ => {
            eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
            print_usage(&bin);
        }
    }

    Ok(())
}

fn print_usage(bin: &str) {
    println!("{}", "Friday".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} [--api-url <url>] [--data-dir <path>] <command> [args]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!(
        "  {} <email> <password> <first> <last> <phone> [--picture <path>]",
        "signup".cyan()
    );
    println!("  {} <email> <password>          Log in and remember the session", "login".cyan());
    println!("  {}                              Forget the session", "logout".cyan());
    println!("  {}                              Show the logged-in user", "whoami".cyan());
    println!("  {} [en|fr]                    Show or set the language", "language".cyan());
    println!("  {}                              Agents of your subscription", "agents".cyan());
    println!("  {}                               Active plans", "plans".cyan());
    println!("  {} <plan_id> <agent_id>...  Subscribe to a plan", "subscribe".cyan());
    println!("  {}                       Your conversations", "conversations".cyan());
    println!(
        "  {} <agent_id> [--conversation <id>] [--file <path>] <message...>",
        "send".cyan()
    );
    println!("  {} <agent_id>                  Interactive chat", "chat".cyan());
    println!("  {} <old> <new>             Change your password", "password".cyan());
    println!(
        "  {} [--first <name>] [--last <name>] [--phone <number>] [--picture <path>]",
        "profile".cyan()
    );
}

fn signup_usage(bin: &str) -> String {
    format!(
        "Usage: {} signup <email> <password> <first_name> <last_name> <phone> [--picture <path>]",
        bin
    )
}

/// Pull `--picture <path>` out of `args`. `None` if the flag has no value.
fn split_picture(args: &[String]) -> Option<(Vec<String>, Option<PathBuf>)> {
    let mut rest = Vec::new();
    let mut picture = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--picture" {
            picture = Some(PathBuf::from(iter.next()?));
        } else {
            rest.push(arg.clone());
        }
    }
    Some((rest, picture))
}

#[derive(Debug, Default, PartialEq)]
struct ProfileArgs {
    first_name: Option<String>,
    last_name: Option<String>,
    phone_number: Option<String>,
    picture: Option<PathBuf>,
}

fn parse_profile_args(args: &[String]) -> Option<ProfileArgs> {
    let (rest, picture) = split_picture(args)?;
    let mut parsed = ProfileArgs {
        picture,
        ..ProfileArgs::default()
    };
    let mut iter = rest.into_iter();
    while let Some(flag) = iter.next() {
        let value = iter.next()?;
        match flag.as_str() {
            "--first" => parsed.first_name = Some(value),
            "--last" => parsed.last_name = Some(value),
            "--phone" => parsed.phone_number = Some(value),
            _ => return None,
        }
    }
    if parsed == ProfileArgs::default() {
        return None;
    }
    Some(parsed)
}

async fn load_picture(path: Option<PathBuf>) -> anyhow::Result<Option<Attachment>> {
    match path {
        Some(path) => Ok(Some(Attachment::from_path(&path).await?)),
        None => Ok(None),
    }
}

fn require_session(sessions: &SessionContext) -> anyhow::Result<Session> {
    match sessions.require() {
        Ok(session) => Ok(session),
        Err(FridayError::NotAuthenticated) => {
            anyhow::bail!("not logged in, run `friday login <email> <password>` first")
        }
        Err(e) => Err(e.into()),
    }
}

fn transport(config: &Config) -> Arc<WebSocketTransport> {
    Arc::new(WebSocketTransport::new(config.ws_base(), config.connect_timeout))
}

fn parse_id(raw: &str, what: &str) -> anyhow::Result<u64> {
    raw.parse::<u64>()
        .map_err(|_| anyhow::anyhow!("invalid {}: {}", what, raw))
}

fn local_offset() -> FixedOffset {
    *Local::now().offset()
}

async fn list_agents(catalog: &CatalogCache, session: &Session) {
    let subscribed: HashSet<u64> = catalog
        .list_active_agents_for_user(session)
        .await
        .iter()
        .map(|a| a.id)
        .collect();
    let catalog = catalog.list_agents().await;
    if catalog.is_empty() && subscribed.is_empty() {
        println!("{}", "No agents available".yellow());
        return;
    }
    println!("{}", format!("Agents ({})", catalog.len()).bright_cyan().bold());
    println!("{}", "─".repeat(60).dimmed());
    for agent in catalog.iter().filter(|a| a.active()) {
        let mark = if subscribed.contains(&agent.id) {
            "●".green()
        } else {
            "○".dimmed()
        };
        println!(
            "  {} {} {} {}",
            mark,
            format!("#{}", agent.id).dimmed(),
            agent.name.cyan(),
            agent.description.as_deref().unwrap_or("").dimmed()
        );
    }
    println!("{}", "● = in your subscription".dimmed());
}

#[derive(Debug)]
struct SendArgs {
    agent_id: u64,
    conversation: Option<u64>,
    file: Option<PathBuf>,
    message: String,
}

fn parse_send_args(args: &[String]) -> Option<SendArgs> {
    let agent_id = args.first()?.parse::<u64>().ok()?;
    let mut conversation = None;
    let mut file = None;
    let mut words = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--conversation" => {
                conversation = Some(args.get(i + 1)?.parse::<u64>().ok()?);
                i += 2;
            }
            "--file" => {
                file = Some(PathBuf::from(args.get(i + 1)?));
                i += 2;
            }
            word => {
                words.push(word.to_string());
                i += 1;
            }
        }
    }
    if words.is_empty() {
        return None;
    }
    Some(SendArgs {
        agent_id,
        conversation,
        file,
        message: words.join(" "),
    })
}

async fn send_once(workspace: &mut Workspace, request: SendArgs) -> anyhow::Result<()> {
    workspace.select_agent(request.agent_id).await?;
    if let Some(id) = request.conversation {
        if !workspace.select_conversation(Some(id)).await {
            anyhow::bail!("conversation {} not found", id);
        }
    }
    if let Some(path) = &request.file {
        workspace.attach(Attachment::from_path(path).await?);
    }
    workspace.set_compose_text(request.message);

    match workspace.send_message().await? {
        SendOutcome::Sent => {
            let id = workspace
                .selected_conversation()
                .map(|c| c.id.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("{} Sent to conversation {}", "✓".green().bold(), id.cyan());
        }
        SendOutcome::Failed { status, message } => {
            anyhow::bail!("send failed ({}): {}", status, message);
        }
        SendOutcome::Empty | SendOutcome::AlreadySending => {}
    }
    print_notices(workspace);
    Ok(())
}

async fn chat_loop(workspace: &mut Workspace, agent_id: u64) -> anyhow::Result<()> {
    workspace.select_agent(agent_id).await?;
    if let Some(agent) = workspace.active_agent() {
        println!(
            "{} Chatting with {}. /help for commands.",
            "⚡".bright_cyan(),
            agent.name.cyan().bold()
        );
    }

    let offset = local_offset();
    let mut printed: HashSet<MessageId> = HashSet::new();
    let mut shown_conversation = workspace.selected_conversation().map(|c| c.id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !chat_command(workspace, line.trim()).await? {
                    break;
                }
            }
            event = workspace.next_event() => {
                let Some(event) = event else { break };
                workspace.handle_event(event).await;
            }
        }

        let current = workspace.selected_conversation().map(|c| c.id);
        if current != shown_conversation {
            printed.clear();
            shown_conversation = current;
            if let Some(id) = current {
                println!("{}", format!("── conversation #{} ──", id).dimmed());
            }
        }
        print_transcript(&workspace.transcript(&offset), &mut printed);
        print_notices(workspace);
    }
    Ok(())
}

/// Returns `false` to leave the chat.
async fn chat_command(workspace: &mut Workspace, line: &str) -> anyhow::Result<bool> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    match cmd {
        "" => {}
        "/quit" | "/exit" => return Ok(false),
        "/help" => {
            println!("  /new              start a new conversation");
            println!("  /list             list conversations");
            println!("  /open <id>        open a conversation");
            println!("  /attach <path>    attach a file to the next message");
            println!("  /detach           drop the attachment");
            println!("  /voice            voice widget attributes");
            println!("  /quit             leave");
        }
        "/new" => {
            workspace.new_conversation().await;
            println!("{}", "New conversation".dimmed());
        }
        "/list" => {
            for preview in workspace.previews() {
                println!(
                    "  {} {}",
                    format!("#{}", preview.conversation_id).cyan(),
                    preview.last_content.unwrap_or_default()
                );
            }
        }
        "/open" => {
            let found = match rest.trim().parse::<u64>() {
                Ok(id) => workspace.select_conversation(Some(id)).await,
                Err(_) => false,
            };
            if !found {
                eprintln!("{} No such conversation: {}", "✗".red().bold(), rest);
            }
        }
        "/attach" => match Attachment::from_path(rest.trim().as_ref()).await {
            Ok(attachment) => {
                println!(
                    "{} Attached {} ({:?})",
                    "📎",
                    attachment.file_name.cyan(),
                    attachment.kind()
                );
                workspace.attach(attachment);
            }
            Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
        },
        "/detach" => workspace.clear_attachment(),
        "/voice" => match workspace.voice_widget() {
            Some(widget) => println!("{}", serde_json::to_string_pretty(&widget)?),
            None => println!("{}", "This agent has no voice".yellow()),
        },
        _ => {
            workspace.set_compose_text(line);
            if let SendOutcome::Failed { status, message } = workspace.send_message().await? {
                eprintln!("{} Error ({}): {}", "✗".red().bold(), status, message.red());
            }
        }
    }
    Ok(true)
}

fn print_transcript(items: &[TranscriptItem], printed: &mut HashSet<MessageId>) {
    let mut pending_day = None;
    for item in items {
        match item {
            TranscriptItem::DaySeparator(day) => pending_day = Some(*day),
            TranscriptItem::Message(entry) => {
                if !printed.insert(entry.message_id) {
                    continue;
                }
                if let Some(day) = pending_day.take() {
                    println!("{}", format!("── {} ──", day.format("%Y-%m-%d")).dimmed());
                }
                let who = match entry.sender {
                    Sender::User => "you".green().bold(),
                    Sender::System => "agent".bright_cyan().bold(),
                };
                let time = entry
                    .sent_at
                    .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
                    .unwrap_or_default();
                println!("{} {} {}", time.dimmed(), who, entry.content);
                if let Some(link) = &entry.attachment {
                    println!("      {} {:?} {}", "📎", link.kind, link.url.underline());
                }
            }
        }
    }
}

fn print_notices(workspace: &mut Workspace) {
    for notice in workspace.take_notices() {
        eprintln!("{} {}", "!".yellow().bold(), notice.to_string().yellow());
    }
}
