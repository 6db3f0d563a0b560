use std::{collections::HashMap, time::Duration};

use {
    anyhow::{Context, Result},
    clap::Args,
    composer_mcp::{ProtocolTranslator, StdioToSseTranslator},
    tokio::io::BufReader,
    tracing::info,
};

#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Remote JSON-RPC endpoint to forward to.
    #[arg(long)]
    pub url: String,
    /// Extra request header as `Name: value` (repeatable).
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Let a STDIO-only MCP client talk to a remote server: each line read from
/// stdin is POSTed to `--url` and the answer written to stdout.
pub async fn handle_bridge(args: BridgeArgs) -> Result<()> {
    let headers: HashMap<String, String> = args.headers.into_iter().collect();
    let translator = StdioToSseTranslator::new(
        "bridge",
        args.url.as_str(),
        &headers,
        Duration::from_secs(args.timeout.max(1)),
    )
    .context("invalid bridge settings")?;
    translator.start().await?;
    info!(url = %args.url, "bridging stdin/stdout to remote endpoint");

    let result = translator
        .pump(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;
    translator.stop().await?;
    result?;
    Ok(())
}
