//! Slash commands for interactive mode

use mammo_chat::ConversationState;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Start a fresh conversation
    Clear,
    /// List the memory scopes available to this key
    ListScopes,
    /// Restrict memory search to these scopes; empty means all
    SetScopes(Vec<String>),
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, conversation: &ConversationState) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "new" | "clear" | "c" => CommandResult::Clear,

        "scopes" => CommandResult::ListScopes,

        "scope" => scope_command(args, conversation),

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn scope_command(args: &str, conversation: &ConversationState) -> CommandResult {
    if args.is_empty() {
        let current = conversation.memory_scope_ids();
        return CommandResult::Message(if current.is_empty() {
            "Searching all scopes.".to_string()
        } else {
            format!("Searching scopes: {}", current.join(", "))
        });
    }
    if args.eq_ignore_ascii_case("all") {
        return CommandResult::SetScopes(vec![]);
    }
    CommandResult::SetScopes(
        args.split([',', ' '])
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /new, /clear, /c     Start a fresh conversation
  /scopes              List memory scopes
  /scope [ids|all]     Show or set the scopes memory search uses
  /quit, /exit, /q     Exit mammo

Examples:
  /scope work,notes    Only search the "work" and "notes" scopes
  /scope all           Search every scope again"#
        .to_string()
}
