use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Remove the last question and answer
    Erase,
    /// Cancel the reply being streamed
    Stop,
    /// Show the suggestion prompts again
    Options,
    /// Offer the guided session switch
    Session,
    /// Leave the guided session
    Chat,
    /// Show help
    Help,
    /// Exit the application
    Bye,
}

pub fn command_entries() -> Vec<CommandEntry> {
    SlashCommand::iter()
        .map(|command| CommandEntry {
            command,
            keyword: command.command(),
            description: command.description(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEntry {
    pub command: SlashCommand,
    pub keyword: &'static str,
    pub description: &'static str,
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Erase => "remove the last question and its answer",
            SlashCommand::Stop => "stop the reply being streamed",
            SlashCommand::Options => "show the suggested questions again",
            SlashCommand::Session => "offer the guided session switch",
            SlashCommand::Chat => "leave the guided session",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }

    /// Whether this command can be run while a reply is in flight.
    pub fn available_during_streaming(self) -> bool {
        match self {
            SlashCommand::Erase | SlashCommand::Stop | SlashCommand::Help | SlashCommand::Bye => {
                true
            }
            SlashCommand::Options | SlashCommand::Session | SlashCommand::Chat => false,
        }
    }
}

/// Return all built-in commands in a Vec paired with their command string.
pub fn built_in_slash_commands() -> Vec<(&'static str, SlashCommand)> {
    SlashCommand::iter().map(|c| (c.command(), c)).collect()
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let tail: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(head)
        .ok()
        .or_else(|| match head.to_lowercase().as_str() {
            "q" | "quit" | "exit" => Some(SlashCommand::Bye),
            "undo" | "e" => Some(SlashCommand::Erase),
            "cancel" | "s" => Some(SlashCommand::Stop),
            "h" | "?" => Some(SlashCommand::Help),
            _ => None,
        })?;

    let argument = if tail.is_empty() {
        None
    } else {
        Some(tail.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n");
    for (command_str, command) in built_in_slash_commands() {
        help.push_str(&format!("/{} - {}\n", command_str, command.description()));
    }

    help.push_str("\nAliases: /q for /bye, /undo for /erase, /cancel for /stop.");
    help.push_str("\nWith an empty input, Up/Down pick a suggestion and Enter sends it. Esc stops a reply.");

    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(
            parse_slash_command("/erase").map(|c| c.command),
            Some(SlashCommand::Erase)
        );
        assert_eq!(
            parse_slash_command("  /quit ").map(|c| c.command),
            Some(SlashCommand::Bye)
        );
        assert_eq!(
            parse_slash_command("/undo").map(|c| c.command),
            Some(SlashCommand::Erase)
        );
    }

    #[test]
    fn keeps_argument() {
        let parsed = parse_slash_command("/help erase now").unwrap();
        assert_eq!(parsed.argument.as_deref(), Some("erase now"));
    }

    #[test]
    fn plain_text_and_unknown_commands_are_not_commands() {
        assert!(parse_slash_command("hello /erase").is_none());
        assert!(parse_slash_command("/espresso").is_none());
        assert!(parse_slash_command("/").is_none());
    }

    #[test]
    fn help_lists_every_command() {
        let help = get_help_text();
        for (keyword, _) in built_in_slash_commands() {
            assert!(help.contains(&format!("/{keyword}")));
        }
    }
}
