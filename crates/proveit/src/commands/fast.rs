//! One-shot fast check printed to the terminal.

use std::io::stdout;

use anyhow::{Result, bail};
use futures::StreamExt;

use proveit::client::ProveItClient;
use proveit::protocol::{StreamChunk, StreamEvent};

use super::render::render_chunk;

pub async fn run(server: &str, idea: &str) -> Result<()> {
    let client = ProveItClient::new(server);
    let mut stream = match client.fast_check(idea).await {
        Ok(stream) => stream,
        Err(e) => bail!(e.user_message()),
    };

    let mut out = stdout();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => bail!(e.user_message()),
        };
        render_chunk(&mut out, &chunk)?;
        match chunk {
            StreamChunk::Event(StreamEvent::Error { message }) => bail!(message),
            StreamChunk::Event(StreamEvent::Done) => break,
            _ => {}
        }
    }
    println!();
    Ok(())
}
