// src/core/commands.rs

//! A small command service over the line protocol. It is what the binary
//! serves, and it exercises both ways a handler can react to termination:
//! awaiting the termination notice (`SLEEP`) or polling the flag (`WORK`).

use crate::connection::RequestContext;
use crate::core::KeepDrainError;
use crate::core::protocol::{LineFrame, LineFrameCodec, Reply};
use crate::core::service::Service;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Reply sent when a long-running command is cut short by termination.
pub const TERMINATED_REPLY: &str = "TERMINATED";

/// A parsed request of the command service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(String),
    Sleep(Duration),
    Work(Duration),
    Status,
}

impl TryFrom<&LineFrame> for Command {
    type Error = String;

    fn try_from(frame: &LineFrame) -> Result<Self, Self::Error> {
        let name = frame.name().unwrap_or_default().to_ascii_uppercase();
        let args = frame.args();
        match name.as_str() {
            "PING" => no_args(&name, args).map(|_| Command::Ping),
            "ECHO" => {
                if args.is_empty() {
                    return Err(wrong_args(&name));
                }
                Ok(Command::Echo(args.join(" ")))
            }
            "SLEEP" => parse_millis(&name, args).map(Command::Sleep),
            "WORK" => parse_millis(&name, args).map(Command::Work),
            "STATUS" => no_args(&name, args).map(|_| Command::Status),
            _ => Err(format!(
                "ERR unknown command '{}'",
                frame.name().unwrap_or_default()
            )),
        }
    }
}

fn wrong_args(name: &str) -> String {
    format!("ERR wrong number of arguments for '{}'", name.to_ascii_lowercase())
}

fn no_args(name: &str, args: &[String]) -> Result<(), String> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(wrong_args(name))
    }
}

fn parse_millis(name: &str, args: &[String]) -> Result<Duration, String> {
    let [millis] = args else {
        return Err(wrong_args(name));
    };
    millis
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| "ERR value is not an integer or out of range".to_string())
}

/// The service behind the `keepdrain` binary.
#[derive(Debug, Default, Clone)]
pub struct CommandService;

impl CommandService {
    async fn sleep(&self, duration: Duration, ctx: &RequestContext) -> Reply {
        // Subscribe before checking the flag so a termination landing in
        // between is not missed.
        let notice = ctx.termination_notice();
        if ctx.is_terminating() {
            return Reply::Simple(TERMINATED_REPLY.to_string());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Reply::ok(),
            _ = notice.notified() => {
                debug!("SLEEP on {} cut short by termination.", ctx.connection_id());
                Reply::Simple(TERMINATED_REPLY.to_string())
            }
        }
    }

    async fn work(&self, duration: Duration, ctx: &RequestContext) -> Reply {
        let mut ticker = tokio::time::interval(Duration::from_millis(1));
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            ticker.tick().await;
            if ctx.is_terminating() {
                debug!("WORK on {} cut short by termination.", ctx.connection_id());
                return Reply::Simple(TERMINATED_REPLY.to_string());
            }
            if tokio::time::Instant::now() >= deadline {
                return Reply::ok();
            }
        }
    }
}

#[async_trait]
impl Service for CommandService {
    type Request = LineFrame;
    type Response = Reply;
    type Codec = LineFrameCodec;

    async fn call(&self, request: LineFrame, ctx: &RequestContext) -> Reply {
        let command = match Command::try_from(&request) {
            Ok(command) => command,
            Err(message) => return Reply::Error(message),
        };
        debug!("{}: received command {:?}", ctx.connection_id(), command);

        match command {
            Command::Ping => Reply::Simple("PONG".to_string()),
            Command::Echo(text) => Reply::Simple(text),
            Command::Sleep(duration) => self.sleep(duration, ctx).await,
            Command::Work(duration) => self.work(duration, ctx).await,
            Command::Status => Reply::Simple(format!(
                "pending={} terminating={}",
                ctx.pending_requests(),
                ctx.is_terminating()
            )),
        }
    }

    fn reject(&self, error: &KeepDrainError) -> Option<Reply> {
        match error {
            KeepDrainError::FrameTooLong { .. } | KeepDrainError::InvalidFrame(_) => {
                Some(Reply::Error(format!("ERR {error}")))
            }
            _ => None,
        }
    }
}
