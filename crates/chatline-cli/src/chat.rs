use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use chatline_core::controllers::{ConversationController, SubmitOutcome};
use chatline_core::models::{ConversationId, ConversationSummary, StreamEventKind, Tag};
use chatline_core::render::EntryKind;
use chatline_core::services::DiagnosticsLog;

use crate::commands::{ChatCommand, HELP, parse_line};

enum Flow {
    Continue,
    Quit,
}

pub fn print_summaries(summaries: &[ConversationSummary]) {
    if summaries.is_empty() {
        println!("No conversations.");
        return;
    }
    for summary in summaries {
        println!(
            "{:>5}  {}  {:>4} msgs  {}",
            summary.id,
            summary.created_at.format("%Y-%m-%d %H:%M"),
            summary.message_count,
            summary.title
        );
    }
}

fn print_tags(tags: &[Tag]) {
    if tags.is_empty() {
        println!("No tags.");
        return;
    }
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    println!("{}", names.join(", "));
}

async fn print_transcript(controller: &ConversationController) -> Result<()> {
    let Some(frame) = controller.visible_frame() else {
        return Ok(());
    };
    if frame.hidden_count > 0 {
        println!("... {} earlier message(s) not shown", frame.hidden_count);
    }
    for entry in &frame.entries {
        let label = match entry.kind {
            EntryKind::User => "you",
            EntryKind::Assistant | EntryKind::Streaming => "assistant",
            EntryKind::System => "system",
            EntryKind::Typing => continue,
        };
        println!("[{label}] {}", entry.content);
    }

    if let Some(state) = controller.conversation_state() {
        let tokens = controller.token_total(state.conversation_id()).await?;
        println!("-- {} message(s), ~{tokens} tokens", state.len());
    }
    Ok(())
}

fn print_diagnostics(diagnostics: &DiagnosticsLog) {
    let entries = diagnostics.entries();
    if entries.is_empty() {
        println!("No warnings or errors captured.");
        return;
    }
    for entry in &entries {
        println!("{entry}");
    }
    println!(
        "-- {} error(s), {} warning(s)",
        diagnostics.error_count(),
        diagnostics.warning_count()
    );
}

async fn run_command(
    controller: &mut ConversationController,
    diagnostics: &DiagnosticsLog,
    command: ChatCommand,
) -> Result<Flow> {
    match command {
        ChatCommand::Send(text) => {
            let outcome = controller.submit(&text).await?;
            debug!(outcome = ?outcome, "Submit handled");
        }
        ChatCommand::New => {
            controller.new_conversation().await?;
            println!("New conversation. Your next message starts it.");
        }
        ChatCommand::List => print_summaries(&controller.list_conversations().await?),
        ChatCommand::Open(id) => {
            let summary = controller.open_conversation(id).await?;
            println!("== {} ({})", summary.title, summary.id);
            print_transcript(controller).await?;
        }
        ChatCommand::Delete(id) => {
            controller.delete_conversation(id).await?;
            println!("Deleted conversation {id}.");
        }
        ChatCommand::Rename(id, title) => {
            controller.rename_conversation(id, &title).await?;
            println!("Renamed conversation {id}.");
        }
        ChatCommand::Search(query) => print_summaries(&controller.search(&query).await?),
        ChatCommand::Tag(id, name) => {
            let tag = controller.tag_conversation(id, &name).await?;
            println!("Tagged conversation {id} with '{}'.", tag.name);
        }
        ChatCommand::Untag(id, name) => {
            controller.untag_conversation(id, &name).await?;
            println!("Removed '{}' from conversation {id}.", name.trim());
        }
        ChatCommand::Tags(None) => print_tags(&controller.list_tags().await?),
        ChatCommand::Tags(Some(id)) => print_tags(&controller.conversation_tags(id).await?),
        ChatCommand::Tagged(name) => print_summaries(&controller.conversations_with_tag(&name).await?),
        ChatCommand::DeleteTag(name) => {
            controller.delete_tag(&name).await?;
            println!("Deleted tag '{}'.", name.trim());
        }
        ChatCommand::Ping => {
            controller.test_connection().await?;
            println!("Connection OK ({}).", controller.settings().model);
        }
        ChatCommand::Retry => match controller.retry().await? {
            SubmitOutcome::NothingToRetry => println!("Nothing to retry."),
            SubmitOutcome::Busy => println!("A response is already in progress."),
            _ => {}
        },
        ChatCommand::Cancel => {
            if !controller.cancel() {
                println!("Nothing to cancel.");
            }
        }
        ChatCommand::Export { format, path, ids } => {
            let selected = (!ids.is_empty()).then_some(ids.as_slice());
            let count = controller
                .export(&path, format, selected)
                .await
                .with_context(|| format!("Failed to export to {}", path.display()))?;
            println!("Exported {count} conversation(s) to {}", path.display());
        }
        ChatCommand::Diagnostics => print_diagnostics(diagnostics),
        ChatCommand::Help => println!("{HELP}"),
        ChatCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Interactive loop: stdin lines, stream events and Ctrl-C are served from one task.
pub async fn run(
    mut controller: ConversationController,
    diagnostics: DiagnosticsLog,
    open: Option<ConversationId>,
) -> Result<()> {
    if let Some(id) = open {
        run_command(&mut controller, &diagnostics, ChatCommand::Open(id)).await?;
    }
    println!(
        "chatline ({}). Type /help for commands.",
        controller.settings().model
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match parse_line(&line) {
                    Ok(command) => command,
                    Err(message) => {
                        eprintln!("{message}");
                        continue;
                    }
                };
                match run_command(&mut controller, &diagnostics, command).await {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => eprintln!("error: {e:#}"),
                }
            }
            Some(event) = controller.next_event() => {
                let cancelled = matches!(event.kind, StreamEventKind::Cancelled);
                if let Err(e) = controller.handle_event(event).await {
                    eprintln!("error: {e:#}");
                }
                if cancelled {
                    println!("(cancelled)");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if !controller.cancel() {
                    break;
                }
            }
        }
    }

    controller.close().await.context("Failed to close conversation")?;
    Ok(())
}
