use std::path::PathBuf;

use crate::ai_sdk::ReasoningEffort;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Reset,
    Stores,
    CreateStore(String),
    RenameStore { store_id: String, name: String },
    DeleteStore(String),
    Use(String),
    Files,
    Add(PathBuf),
    Remove(String),
    Model(String),
    /// `None` clears the effort so the model default applies.
    Effort(Option<ReasoningEffort>),
    Web(bool),
    Search(bool),
    Save(PathBuf),
    Help,
    Quit,
}

pub const HELP: &[(&str, &str)] = &[
    ("/reset", "start a new conversation and zero the cost counters"),
    ("/stores", "list vector stores"),
    ("/mkstore <name>", "create a vector store"),
    ("/rename <store_id> <name>", "rename a vector store"),
    ("/rmstore <store_id>", "delete a vector store"),
    ("/use <store_id>", "select a store and enable file search"),
    ("/files", "list files in the selected store"),
    ("/add <path>", "upload a file and index it into the selected store"),
    ("/rm <file_id>", "remove a file from the selected store"),
    ("/model <id>", "switch model"),
    ("/effort <level|default>", "set reasoning effort"),
    ("/web on|off", "toggle web search"),
    ("/search on|off", "toggle file search"),
    ("/save <path>", "write the transcript to a file"),
    ("/help", "show this help"),
    ("/quit", "exit"),
];

/// Parses a line starting with `/`. Returns `None` for ordinary prompts.
pub fn parse_command(input: &str) -> Option<Result<SlashCommand, String>> {
    let trimmed = input.trim();
    let rest = trimmed.strip_prefix('/')?;
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let required = |what: &str| {
        if arg.is_empty() {
            Err(format!("/{} needs {}", name, what))
        } else {
            Ok(arg.to_string())
        }
    };

    let command = match name {
        "reset" => Ok(SlashCommand::Reset),
        "stores" => Ok(SlashCommand::Stores),
        "mkstore" => required("a store name").map(SlashCommand::CreateStore),
        "rename" => match arg.split_once(char::is_whitespace) {
            Some((store_id, name)) if !name.trim().is_empty() => Ok(SlashCommand::RenameStore {
                store_id: store_id.to_string(),
                name: name.trim().to_string(),
            }),
            _ => Err("/rename needs a store id and a new name".to_string()),
        },
        "rmstore" => required("a store id").map(SlashCommand::DeleteStore),
        "use" => required("a store id").map(SlashCommand::Use),
        "files" => Ok(SlashCommand::Files),
        "add" => required("a file path").map(|p| SlashCommand::Add(PathBuf::from(p))),
        "rm" => required("a file id").map(SlashCommand::Remove),
        "model" => required("a model id").map(SlashCommand::Model),
        "effort" => match arg {
            "" => Err(format!("/effort needs one of: default, {}", effort_names())),
            "default" | "off" => Ok(SlashCommand::Effort(None)),
            level => ReasoningEffort::parse(level)
                .map(|effort| SlashCommand::Effort(Some(effort)))
                .ok_or_else(|| format!("unknown effort '{}'; use one of: default, {}", level, effort_names())),
        },
        "web" => parse_switch(name, arg).map(SlashCommand::Web),
        "search" => parse_switch(name, arg).map(SlashCommand::Search),
        "save" => required("a file path").map(|p| SlashCommand::Save(PathBuf::from(p))),
        "help" | "?" => Ok(SlashCommand::Help),
        "quit" | "exit" => Ok(SlashCommand::Quit),
        other => Err(format!("unknown command /{}; try /help", other)),
    };
    Some(command)
}

fn parse_switch(name: &str, arg: &str) -> Result<bool, String> {
    match arg {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(format!("/{} takes on or off", name)),
    }
}

fn effort_names() -> String {
    ReasoningEffort::ALL.map(ReasoningEffort::as_str).join(", ")
}
