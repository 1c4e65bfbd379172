//! Line-oriented terminal front-end.

use std::io::{self, BufRead, Write};

use chrono::Local;
use tracing::debug;

use crate::llm::{MODEL_CATALOG, display_name};
use crate::session::{ChatService, SessionContext, SessionError};
use crate::store::{ConversationId, MessageRole};

const HELP: &str = "\
Commands:
  /new             start a new conversation
  /list            list conversations by recency
  /open <id>       switch to a conversation
  /rename <title>  rename the current conversation
  /delete          delete the current conversation
  /model [id]      show or select the model
  /models          list known models
  /history         show the current conversation
  /help            show this help
  /quit            leave
Anything else is sent as a message.";

/// A parsed input line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// `/new`
    New,
    /// `/list`
    List,
    /// `/open <id>`
    Open(String),
    /// `/rename <title>`
    Rename(String),
    /// `/delete`
    Delete,
    /// `/model [id]`
    Model(Option<String>),
    /// `/models`
    Models,
    /// `/history`
    History,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// A chat message.
    Prompt(String),
    /// An unrecognised slash command.
    Unknown(String),
}

impl Command {
    /// Parse one input line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Prompt(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "new" => Self::New,
            "list" => Self::List,
            "open" => Self::Open(arg.to_string()),
            "rename" => Self::Rename(arg.to_string()),
            "delete" => Self::Delete,
            "model" if arg.is_empty() => Self::Model(None),
            "model" => Self::Model(Some(arg.to_string())),
            "models" => Self::Models,
            "history" => Self::History,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Terminal session over a [`ChatService`].
pub struct Repl<'a> {
    service: &'a ChatService,
    ctx: SessionContext,
}

impl<'a> Repl<'a> {
    /// Start a session with `model` selected.
    #[must_use]
    pub fn new(service: &'a ChatService, model: impl Into<String>) -> Self {
        Self {
            service,
            ctx: SessionContext::new(model),
        }
    }

    /// Session state.
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Read commands until `/quit` or end of input.
    ///
    /// Handler failures are printed and the loop continues. The current
    /// conversation is discarded on exit if it is empty.
    ///
    /// # Errors
    /// Returns an error only if reading input or writing output fails.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> io::Result<()> {
        writeln!(out, "parley {} (/help for commands)", env!("CARGO_PKG_VERSION"))?;
        self.prompt(out)?;

        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                self.prompt(out)?;
                continue;
            }

            let command = Command::parse(&line);
            if command == Command::Quit {
                break;
            }
            self.execute(command, out)?;
            self.prompt(out)?;
        }

        if let Err(err) = self.service.end_session(&mut self.ctx) {
            report(out, &err)?;
        }
        writeln!(out, "bye")
    }

    fn prompt<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "[{}] > ", display_name(&self.ctx.selected_model))?;
        out.flush()
    }

    /// Run one command, printing its result.
    ///
    /// # Errors
    /// Returns an error if writing output fails.
    pub fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> io::Result<()> {
        debug!(?command, "Executing command");
        match command {
            Command::New => match self.service.start_new_conversation(&mut self.ctx) {
                Ok(conversation) => {
                    writeln!(out, "Started #{} {}", conversation.id, conversation.title)
                }
                Err(err) => report(out, &err),
            },
            Command::List => self.list(out),
            Command::Open(raw) => {
                let Ok(id) = raw.parse::<ConversationId>() else {
                    return writeln!(out, "usage: /open <id>");
                };
                match self.service.open_conversation(&mut self.ctx, id) {
                    Ok(conversation) => {
                        writeln!(out, "Opened #{} {}", conversation.id, conversation.title)?;
                        self.history(out)
                    }
                    Err(err) => report(out, &err),
                }
            }
            Command::Rename(title) => {
                if title.is_empty() {
                    return writeln!(out, "usage: /rename <title>");
                }
                match self.service.rename_current(&self.ctx, &title) {
                    Ok(()) => writeln!(out, "Renamed to {title}"),
                    Err(err) => report(out, &err),
                }
            }
            Command::Delete => match self.service.delete_current(&mut self.ctx) {
                Ok(id) => writeln!(out, "Deleted #{id}"),
                Err(err) => report(out, &err),
            },
            Command::Model(None) => writeln!(
                out,
                "Model: {} ({})",
                display_name(&self.ctx.selected_model),
                self.ctx.selected_model
            ),
            Command::Model(Some(model)) => match self.service.select_model(&mut self.ctx, &model) {
                Ok(()) => writeln!(out, "Model: {}", display_name(&model)),
                Err(err) => report(out, &err),
            },
            Command::Models => {
                for info in MODEL_CATALOG {
                    let marker = if info.id == self.ctx.selected_model { '*' } else { ' ' };
                    writeln!(
                        out,
                        "{marker} {:<26} {:<16} {}",
                        info.id, info.display_name, info.provider
                    )?;
                }
                Ok(())
            }
            Command::History => self.history(out),
            Command::Help => writeln!(out, "{HELP}"),
            Command::Quit => Ok(()),
            Command::Prompt(text) => self.send(&text, out),
            Command::Unknown(name) => writeln!(out, "unknown command /{name} (try /help)"),
        }
    }

    fn list<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let groups = match self.service.conversation_groups(Local::now().date_naive()) {
            Ok(groups) => groups,
            Err(err) => return report(out, &err),
        };
        if groups.is_empty() {
            return writeln!(out, "No conversations yet.");
        }

        for group in groups {
            writeln!(out, "{}", group.label)?;
            for conversation in group.conversations {
                let marker = if self.ctx.current == Some(conversation.id) { '*' } else { ' ' };
                writeln!(
                    out,
                    "{marker} #{:<4} {} [{}]",
                    conversation.id,
                    conversation.title,
                    display_name(&conversation.model)
                )?;
            }
        }
        Ok(())
    }

    fn history<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let messages = match self.service.history(&self.ctx) {
            Ok(messages) => messages,
            Err(err) => return report(out, &err),
        };
        for message in messages {
            let who = match message.role {
                MessageRole::User => "you",
                MessageRole::Assistant => "assistant",
            };
            writeln!(out, "{who}: {}", message.content)?;
        }
        Ok(())
    }

    fn send<W: Write>(&mut self, text: &str, out: &mut W) -> io::Result<()> {
        let mut write_error: Option<io::Error> = None;
        let result = {
            let relay = |fragment: &str| {
                if write_error.is_some() {
                    return;
                }
                if let Err(err) = out.write_all(fragment.as_bytes()).and_then(|()| out.flush()) {
                    write_error = Some(err);
                }
            };
            self.service.send_message(&mut self.ctx, text, relay)
        };
        if let Some(err) = write_error {
            return Err(err);
        }

        match result {
            Ok(_) => writeln!(out),
            Err(err) => {
                writeln!(out)?;
                report(out, &err)
            }
        }
    }
}

fn report<W: Write>(out: &mut W, err: &SessionError) -> io::Result<()> {
    if err.is_transient() {
        writeln!(out, "error: {err} (temporary, try again)")
    } else {
        writeln!(out, "error: {err}")
    }
}
