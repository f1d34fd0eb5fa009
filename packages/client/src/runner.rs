//! Interactive terminal session for one conversation.

use rustyline::{Editor, error::ReadlineError, history::DefaultHistory};
use tokio::sync::mpsc;

use crate::chat::{ChatSession, SendOutcome, SkipReason};
use crate::domain::UserId;
use crate::error::ClientError;
use crate::session::MessagingClient;
use crate::sync::read;
use crate::ui::{InputEvent, MessageFormatter, TimelineRenderer, TypingHinter, redisplay_prompt};

/// Slash commands understood by the input loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Online,
    Reconnect,
    Read,
    Debug,
    Help,
    Quit,
    /// Anything else is sent as a message
    Say(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "/status" => Command::Status,
            "/online" => Command::Online,
            "/reconnect" => Command::Reconnect,
            "/read" => Command::Read,
            "/debug" => Command::Debug,
            "/help" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Say(other.to_string()),
        }
    }
}

/// Connect, open the conversation with `peer` and run the input loop until
/// the user quits.
pub async fn run_client(client: MessagingClient, peer: UserId) -> Result<(), ClientError> {
    let local_user = client
        .local_user()
        .cloned()
        .ok_or_else(|| ClientError::InvalidArgument("local user is required".to_string()))?;
    let prompt_name = local_user.display_name();

    client.presence().start();
    let session = client.open_chat(peer);

    let renderer = spawn_renderer(
        &client,
        &session,
        TimelineRenderer::new(
            local_user.id.clone(),
            prompt_name.clone(),
            client.config().display_offset,
        ),
    );
    let status_printer = spawn_status_printer(&client, prompt_name.clone());
    let mut failures = session
        .take_failures()
        .ok_or_else(|| ClientError::Terminal("send failure channel already taken".to_string()))?;

    println!(
        "\nYou are '{}'. Type messages and press Enter to send. /help lists commands.\n",
        prompt_name
    );

    // Create channel for rustyline input
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<InputEvent>();
    let prompt = format!("{}> ", prompt_name);

    // Spawn a blocking thread for rustyline (synchronous readline)
    let readline = std::thread::spawn(move || -> Result<(), ClientError> {
        let mut rl = Editor::<TypingHinter, DefaultHistory>::new()
            .map_err(|e| ClientError::Terminal(e.to_string()))?;
        rl.set_helper(Some(TypingHinter::new(input_tx.clone())));
        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line).ok();
                    if input_tx.send(InputEvent::Line(line.to_string())).is_err()
                        || Command::parse(line) == Command::Quit
                    {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => return Err(ClientError::Terminal(err.to_string())),
            }
        }
        Ok(())
    });

    loop {
        tokio::select! {
            event = input_rx.recv() => match event {
                None => break,
                Some(InputEvent::Typing(has_content)) => session.on_typing(has_content),
                Some(InputEvent::Line(line)) => {
                    if !handle_command(&client, &session, Command::parse(&line)).await {
                        break;
                    }
                    redisplay_prompt(&prompt_name);
                }
            },
            Some(failure) = failures.recv() => {
                print!("{}", MessageFormatter::format_send_failure(&failure));
                redisplay_prompt(&prompt_name);
            }
        }
    }

    renderer.abort();
    status_printer.abort();
    session.close();
    client.shutdown().await;

    drop(input_rx);
    match readline.join() {
        Ok(result) => result,
        Err(_) => Err(ClientError::Terminal("input thread panicked".to_string())),
    }
}

/// Returns `false` when the loop should end.
async fn handle_command(client: &MessagingClient, session: &ChatSession, command: Command) -> bool {
    let presence = client.presence();
    match command {
        Command::Status => print!("{}", MessageFormatter::format_status(&presence.status_text())),
        Command::Online => print!(
            "{}",
            MessageFormatter::format_online_peers(&presence.online_peers(), session.peer_id())
        ),
        Command::Reconnect => presence.reconnect(),
        Command::Read => match session.mark_as_read() {
            Ok(count) => println!("marked {} message(s) as read", count),
            Err(e) => println!("could not mark as read: {}", e),
        },
        Command::Debug => println!("\n{}", presence.debug_info()),
        Command::Help => print!("{}", MessageFormatter::format_help()),
        Command::Quit => return false,
        Command::Say(content) => match session.send(&content).await {
            Ok(SendOutcome::Skipped(SkipReason::SendInProgress)) => {
                println!("still sending the previous message");
            }
            Ok(outcome) => tracing::debug!("Send outcome: {:?}", outcome),
            // reported through the failure channel
            Err(e) => tracing::debug!("Send failed: {}", e),
        },
    }
    true
}

fn spawn_renderer(
    client: &MessagingClient,
    session: &ChatSession,
    mut renderer: TimelineRenderer,
) -> tokio::task::JoinHandle<()> {
    let mut view = session.watch();
    let clock = std::sync::Arc::clone(client.clock());
    let presence = client.presence().presence_set();
    let prompt_name = client
        .local_user()
        .map(|user| user.display_name())
        .unwrap_or_default();
    let peer = session.peer_id().clone();

    tokio::spawn(async move {
        let mut header_shown = false;
        while view.changed().await.is_ok() {
            let snapshot = view.borrow_and_update().clone();
            if snapshot.loading {
                continue;
            }
            let mut output = String::new();
            if !header_shown {
                header_shown = true;
                let online = read(&presence).is_online(&peer);
                output.push_str(&MessageFormatter::format_conversation_header(
                    &snapshot.peer,
                    online,
                    snapshot.timeline.len(),
                ));
                tracing::debug!("Rendering conversation with {}", peer);
            }
            output.push_str(&renderer.render(&snapshot, clock.now()));
            if !output.is_empty() {
                print!("{}", output);
                redisplay_prompt(&prompt_name);
            }
        }
    })
}

fn spawn_status_printer(client: &MessagingClient, prompt_name: String) -> tokio::task::JoinHandle<()> {
    let mut status = client.presence().watch_status();
    let max_attempts = client.config().reconnect.max_attempts;
    tokio::spawn(async move {
        let mut last = String::new();
        while status.changed().await.is_ok() {
            let text = status.borrow_and_update().describe(max_attempts);
            if text != last {
                print!("{}", MessageFormatter::format_status(&text));
                redisplay_prompt(&prompt_name);
                last = text;
            }
        }
    })
}
