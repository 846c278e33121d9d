//! Interactive multi-turn validation.

use std::io::stdout;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use proveit::api::{FastCheckRequest, MESSAGE_MAX_CHARS};
use proveit::client::ProveItClient;
use proveit::session::{FileStorage, Session, SessionStore, TurnOptions, run_turn};

use super::render::{render_chunk, status};

/// Options for the `validate` command.
pub struct ValidateOptions<'a> {
    pub server: &'a str,
    pub data_dir: &'a Path,
    pub fresh: bool,
    pub history_limit: usize,
    pub search_timeout: Option<Duration>,
}

type InputLines = Lines<BufReader<Stdin>>;

pub async fn run(options: ValidateOptions<'_>) -> Result<()> {
    let client = ProveItClient::new(options.server);
    let store = SessionStore::new(Arc::new(FileStorage::new(options.data_dir)));
    let turn_options = TurnOptions {
        history_limit: options.history_limit,
        search_timeout: options.search_timeout,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Err(e) = client.health().await {
        bail!("Cannot reach the server at {}: {e}", client.base_url());
    }

    if options.fresh {
        store.clear().await;
    }

    let resumed = match store.load().await {
        Some(session) if !session.is_complete() => Some(session),
        Some(_) | None => None,
    };

    let mut session = match resumed {
        Some(session) => {
            println!(
                "Resuming \"{}\" ({}, {} messages). Type /status for details.\n",
                session.idea_summary,
                session.phase,
                session.messages.len()
            );
            session
        }
        None => {
            let Some(idea) = read_idea(&mut lines).await? else {
                return Ok(());
            };
            let mut session = Session::new(&idea);
            store.save(&session).await;
            take_turn(&client, &store, &mut session, &idea, turn_options).await;
            session
        }
    };

    println!("Type /status for progress, /exit to leave. Ctrl+C stops a reply.");
    loop {
        let Some(input) = prompt(&mut lines, "> ").await? else {
            println!();
            break;
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            "/exit" | "/quit" => break,
            "/status" => {
                println!("{}\n", status(&session));
                continue;
            }
            _ => {}
        }
        if input.chars().count() > MESSAGE_MAX_CHARS {
            println!("Please keep messages under {MESSAGE_MAX_CHARS} characters.\n");
            continue;
        }

        take_turn(&client, &store, &mut session, input, turn_options).await;
        if session.is_complete() {
            println!("Validation complete. Ask follow-up questions or /exit.\n");
        }
    }

    Ok(())
}

/// Ask for the opening idea until it is within bounds. `None` on EOF.
async fn read_idea(lines: &mut InputLines) -> Result<Option<String>> {
    println!("Describe the product idea you want to validate:");
    loop {
        let Some(input) = prompt(lines, "idea> ").await? else {
            return Ok(None);
        };
        let request = FastCheckRequest { idea: input };
        match request.validated_idea() {
            Ok(idea) => return Ok(Some(idea.to_string())),
            Err(e) => println!("{e}"),
        }
    }
}

async fn prompt(lines: &mut InputLines, label: &str) -> Result<Option<String>> {
    let mut out = tokio::io::stdout();
    out.write_all(label.as_bytes()).await?;
    out.flush().await?;
    Ok(lines.next_line().await?)
}

/// One turn with Ctrl+C wired to interruption, then persist.
async fn take_turn(
    client: &ProveItClient,
    store: &SessionStore,
    session: &mut Session,
    text: &str,
    options: TurnOptions,
) {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    println!();
    let mut out = stdout();
    let outcome = run_turn(client, session, text, options, &cancel, |chunk| {
        if let Err(e) = render_chunk(&mut out, chunk) {
            debug!(error = %e, "Failed to write to terminal");
        }
    })
    .await;
    watcher.abort();

    println!();
    if outcome.interrupted {
        println!("[stopped]");
    }
    if let Some(error) = &outcome.error {
        eprintln!("Error: {error}");
    }
    println!();

    store.save(session).await;
}
