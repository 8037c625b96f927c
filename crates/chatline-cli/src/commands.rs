use std::path::PathBuf;

use chatline_core::exporters::ExportFormat;
use chatline_core::models::ConversationId;

pub const HELP: &str = "\
Commands:
  /new                    start a new conversation
  /list                   list conversations
  /open <id>              open a conversation
  /delete <id>            delete a conversation
  /rename <id> <title>    rename a conversation
  /search <query>         search titles and messages
  /tag <id> <name>        tag a conversation (creates the tag)
  /untag <id> <name>      remove a tag from a conversation
  /tags [id]              list all tags, or one conversation's
  /tagged <name>          list conversations with a tag
  /deltag <name>          delete a tag everywhere
  /ping                   check the API connection
  /retry                  re-send the last unanswered message
  /cancel                 stop the current response
  /export <json|md> <path> [id...]
  /diagnostics            show captured warnings and errors
  /help                   show this help
  /quit                   exit
Anything else is sent as a message. Ctrl-C cancels a response.";

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Send(String),
    New,
    List,
    Open(ConversationId),
    Delete(ConversationId),
    Rename(ConversationId, String),
    Search(String),
    Tag(ConversationId, String),
    Untag(ConversationId, String),
    Tags(Option<ConversationId>),
    Tagged(String),
    DeleteTag(String),
    Ping,
    Retry,
    Cancel,
    Export {
        format: ExportFormat,
        path: PathBuf,
        ids: Vec<ConversationId>,
    },
    Diagnostics,
    Help,
    Quit,
}

fn parse_id(arg: Option<&str>) -> Result<ConversationId, String> {
    let arg = arg.ok_or("missing conversation id")?;
    arg.parse::<i64>()
        .map(ConversationId)
        .map_err(|_| format!("invalid conversation id: {arg}"))
}

/// Parse one input line. Lines not starting with `/` are messages.
pub fn parse_line(line: &str) -> Result<ChatCommand, String> {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Ok(ChatCommand::Send(trimmed.to_string()));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let mut words = args.split_whitespace();

    match name {
        "new" => Ok(ChatCommand::New),
        "list" | "ls" => Ok(ChatCommand::List),
        "open" => parse_id(words.next()).map(ChatCommand::Open),
        "delete" | "rm" => parse_id(words.next()).map(ChatCommand::Delete),
        "rename" => {
            let id = parse_id(words.next())?;
            let title = words.collect::<Vec<_>>().join(" ");
            if title.is_empty() {
                return Err("missing title".to_string());
            }
            Ok(ChatCommand::Rename(id, title))
        }
        "search" => Ok(ChatCommand::Search(args.to_string())),
        "tag" | "untag" => {
            let id = parse_id(words.next())?;
            let tag = words.collect::<Vec<_>>().join(" ");
            if tag.is_empty() {
                return Err("missing tag name".to_string());
            }
            Ok(if name == "tag" {
                ChatCommand::Tag(id, tag)
            } else {
                ChatCommand::Untag(id, tag)
            })
        }
        "tags" => match words.next() {
            Some(arg) => parse_id(Some(arg)).map(|id| ChatCommand::Tags(Some(id))),
            None => Ok(ChatCommand::Tags(None)),
        },
        "tagged" | "deltag" if args.is_empty() => Err("missing tag name".to_string()),
        "tagged" => Ok(ChatCommand::Tagged(args.to_string())),
        "deltag" => Ok(ChatCommand::DeleteTag(args.to_string())),
        "ping" => Ok(ChatCommand::Ping),
        "retry" => Ok(ChatCommand::Retry),
        "cancel" => Ok(ChatCommand::Cancel),
        "export" => {
            let format = words
                .next()
                .ok_or("missing export format")?
                .parse::<ExportFormat>()
                .map_err(|e| e.to_string())?;
            let path = PathBuf::from(words.next().ok_or("missing export path")?);
            let ids = words
                .map(|w| parse_id(Some(w)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ChatCommand::Export { format, path, ids })
        }
        "diagnostics" | "diag" => Ok(ChatCommand::Diagnostics),
        "help" | "?" => Ok(ChatCommand::Help),
        "quit" | "exit" | "q" => Ok(ChatCommand::Quit),
        other => Err(format!("unknown command: /{other} (try /help)")),
    }
}
