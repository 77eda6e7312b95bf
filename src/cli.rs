//! Command-line front end.

use std::io::Write;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::llm::aggregator::StreamSink;
use crate::llm::registry::ProviderId;
use crate::types::{ChatMessage, ChatRequest, ToolCall};

#[derive(Debug, Parser)]
#[command(name = "chatgate", version, about = "Streaming chat completions across OpenAI-compatible providers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one prompt and print the reply
    Chat(ChatArgs),
    /// List configured providers
    Providers,
    /// Write a default config file
    Init,
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    pub prompt: String,
    /// Provider to use instead of inferring one from the model name
    #[arg(long)]
    pub provider: Option<ProviderId>,
    #[arg(long)]
    pub model: Option<String>,
    /// System prompt
    #[arg(long)]
    pub system: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub max_tokens: Option<u32>,
    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,
}

impl ChatArgs {
    fn to_request(&self) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(&self.prompt));

        ChatRequest {
            messages,
            model: self.model.clone(),
            provider: self.provider,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: vec![],
        }
    }
}

/// Prints a streamed reply as it arrives.
#[derive(Default)]
struct TerminalSink {
    in_reasoning: bool,
    failed: bool,
}

#[async_trait]
impl StreamSink for TerminalSink {
    async fn on_text_chunk(&mut self, text: &str, _chunk: u64) {
        if self.in_reasoning {
            eprintln!();
            self.in_reasoning = false;
        }
        print!("{}", text);
        let _ = std::io::stdout().flush();
    }

    async fn on_reasoning_chunk(&mut self, text: &str, _chunk: u64) {
        if !self.in_reasoning {
            eprint!("[Reasoning] ");
            self.in_reasoning = true;
        }
        eprint!("{}", text);
    }

    async fn on_tool_call(&mut self, call: &ToolCall) {
        println!("\n  [Tool call: {} {}]", call.name, serde_json::Value::Object(call.arguments.clone()));
    }

    async fn on_complete(&mut self, message: &ChatMessage) {
        println!();
        print_usage(message);
    }

    async fn on_error(&mut self, error: &GatewayError) {
        self.failed = true;
        eprintln!("\n[Error: {}]", error);
    }
}

fn print_usage(message: &ChatMessage) {
    if let Some(usage) = message.usage() {
        eprintln!(
            "[Tokens: {} in / {} out]",
            usage.input_tokens, usage.output_tokens
        );
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init => {
            let path = AppConfig::save_default()?;
            println!("[Config] Wrote default config: {}", path.display());
            println!("[Config] Edit it to set your API keys.");
            Ok(())
        }
        Command::Providers => {
            let config = AppConfig::load()?;
            let registry = config.build_registry()?;
            let default = registry.default_provider();
            let available = registry.list_available();
            if available.is_empty() {
                println!("No providers configured.");
            }
            for id in available {
                let marker = if Some(id) == default { " (default)" } else { "" };
                println!("{}{}", id, marker);
            }
            Ok(())
        }
        Command::Chat(args) => {
            let config = AppConfig::load()?;
            let registry = config.build_registry()?;
            let gateway = Gateway::new(registry.into()).with_defaults(config.request_defaults());
            let request = args.to_request();

            if args.no_stream {
                let reply = gateway.chat(&request).await.context("Chat request failed")?;
                if let Some(reasoning) = &reply.reasoning_content {
                    eprintln!("[Reasoning] {}", reasoning);
                }
                println!("{}", reply.content);
                for call in &reply.tool_calls {
                    println!("  [Tool call: {} {}]", call.name, serde_json::Value::Object(call.arguments.clone()));
                }
                print_usage(&reply);
                return Ok(());
            }

            let mut sink = TerminalSink::default();
            gateway
                .stream_chat(&request, &mut sink)
                .await
                .context("Chat request failed")?;
            if sink.failed {
                anyhow::bail!("Stream ended with an error");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_args() {
        let cli = Cli::parse_from([
            "chatgate",
            "chat",
            "hello there",
            "--provider",
            "deepseek",
            "--system",
            "be brief",
            "--no-stream",
        ]);
        let Command::Chat(args) = cli.command else {
            panic!("expected chat command");
        };
        assert_eq!(args.provider, Some(ProviderId::DeepSeek));
        assert!(args.no_stream);

        let request = args.to_request();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].content, "hello there");
        assert_eq!(request.model, None);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(Cli::try_parse_from(["chatgate", "chat", "hi", "--provider", "nope"]).is_err());
    }
}
