use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

use super::types::{
    EXPORT_FORMAT_VERSION, ExportDocument, ExportError, ExportFormat, ExportedConversation,
    ExportedMessage,
};
use crate::models::{ConversationId, Role};
use crate::repositories::{ConversationRepository, RepositoryError, RepositoryResult};

/// Load the given conversations (or all, most recent first) with their messages.
pub async fn collect_conversations(
    repository: &dyn ConversationRepository,
    ids: Option<&[ConversationId]>,
) -> RepositoryResult<Vec<ExportedConversation>> {
    let summaries = match ids {
        Some(ids) => {
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                let summary = repository
                    .get_conversation(*id)
                    .await?
                    .ok_or_else(|| RepositoryError::conversation_not_found(id.0))?;
                found.push(summary);
            }
            found
        }
        None => repository.list_conversations().await?,
    };

    let mut conversations = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let messages = repository.load_messages(summary.id).await?;
        conversations.push(ExportedConversation {
            id: summary.id,
            title: summary.title,
            created_at: summary.created_at,
            messages: messages.iter().map(ExportedMessage::from).collect(),
        });
    }
    Ok(conversations)
}

pub fn to_json(
    conversations: &[ExportedConversation],
    export_date: DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ExportDocument {
        export_date,
        version: EXPORT_FORMAT_VERSION,
        conversation_count: conversations.len(),
        conversations,
    })
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::System => "System",
        Role::TypingPlaceholder => "Typing",
    }
}

pub fn to_markdown(conversations: &[ExportedConversation], export_date: DateTime<Utc>) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "# Conversation Export\n");
    let _ = writeln!(out, "**Export date:** {}\n", export_date.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "**Conversations:** {}\n", conversations.len());
    let _ = writeln!(out, "---\n");

    for (index, conversation) in conversations.iter().enumerate() {
        let _ = writeln!(out, "## {}. {}\n", index + 1, conversation.title);
        let _ = writeln!(out, "**ID:** {}  ", conversation.id);
        let _ = writeln!(
            out,
            "**Created:** {}  ",
            conversation.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "**Messages:** {}\n", conversation.messages.len());

        for (msg_index, message) in conversation.messages.iter().enumerate() {
            let _ = writeln!(
                out,
                "### {} (Message {})\n",
                role_label(message.role),
                msg_index + 1
            );
            let _ = writeln!(out, "{}\n", message.content);
        }
        let _ = writeln!(out, "---\n");
    }
    out
}

/// Render and write `conversations` to `path`. Returns how many were written.
pub async fn write_export(
    path: &Path,
    format: ExportFormat,
    conversations: &[ExportedConversation],
) -> Result<usize, ExportError> {
    let now = Utc::now();
    let body = match format {
        ExportFormat::Json => to_json(conversations, now)?,
        ExportFormat::Markdown => to_markdown(conversations, now),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await?;

    info!(
        format = %format,
        count = conversations.len(),
        path = %path.display(),
        "Conversations exported"
    );
    Ok(conversations.len())
}
