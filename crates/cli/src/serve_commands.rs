use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Result, bail},
    clap::Args,
    composer_config::McpComposerConfig,
    composer_mcp::{
        Composer, ComposerOptions, SseTransport, SseTransportConfig, Transport, serve_lines,
        serve_transport,
    },
    serde_json::json,
    tokio::io::BufReader,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

#[derive(Args, Debug, Default)]
pub struct ComposeArgs {
    /// Name advertised by the composed server (overrides config value).
    #[arg(long)]
    pub name: Option<String>,
    /// Compose only these servers (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub include: Option<Vec<String>>,
    /// Skip these servers (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,
    /// Also compose the MCP server packages this `pyproject.toml` depends on.
    #[arg(long)]
    pub pyproject: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub compose: ComposeArgs,
    /// Serve JSON-RPC on stdin/stdout instead of SSE.
    #[arg(long)]
    pub stdio: bool,
    /// Port for the SSE surface (overrides config value).
    #[arg(long)]
    pub port: Option<u16>,
}

fn options(config: &McpComposerConfig, args: ComposeArgs) -> ComposerOptions {
    let mut options = ComposerOptions::from_config(config);
    if let Some(name) = args.name {
        options.name = name;
    }
    options.include = args.include;
    options.exclude = args.exclude;
    options
}

async fn compose(config: &McpComposerConfig, mut args: ComposeArgs) -> Result<Arc<Composer>> {
    let pyproject = args.pyproject.take();
    let composer = Arc::new(Composer::new(options(config, args)));
    let mut summary = composer.compose_from_config(config).await?;
    if let Some(path) = pyproject {
        summary = composer.compose_from_pyproject(Some(&path)).await?;
    }
    for error in &summary.errors {
        warn!(%error, "server left out of the composition");
    }
    Ok(composer)
}

/// Cancelled on Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        trigger.cancel();
    });
    token
}

pub async fn handle_serve(config_path: Option<&Path>, args: ServeArgs) -> Result<()> {
    let config = crate::load(config_path)?;
    let use_stdio = args.stdio || !config.transport.sse_enabled;
    if use_stdio && !config.transport.stdio_enabled {
        bail!("both transports are disabled in the configuration");
    }

    let composer = compose(&config, args.compose).await?;
    let shutdown = shutdown_on_ctrl_c();

    let served = if use_stdio {
        info!(composer = %composer.name(), "serving over stdio");
        serve_lines(
            &composer,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown,
        )
        .await
    } else {
        let port = args.port.unwrap_or(config.composer.port);
        let transport: Arc<dyn Transport> = Arc::new(SseTransport::new(
            composer.name(),
            SseTransportConfig::from_settings(&config.transport, port),
        ));
        serve_transport(Arc::clone(&composer), transport, shutdown).await
    };

    composer.stop().await;
    served?;
    Ok(())
}

/// Compose once, print the result as JSON and shut everything down.
pub async fn handle_summary(config_path: Option<&Path>, args: ComposeArgs) -> Result<()> {
    let config = crate::load(config_path)?;
    let composer = compose(&config, args).await?;

    let report = json!({
        "composition": composer.get_composition_summary().await,
        "tool_manager": composer.tool_manager_summary().await,
        "tools": composer.list_tools().await,
        "prompts": composer.list_prompts().await,
        "resources": composer.list_resources().await,
        "proxied_servers": composer.get_proxied_servers_info().await,
        "translators": composer.translators().list_translators().await,
    });
    composer.stop().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, composer_config::ConflictResolution};

    #[test]
    fn compose_args_override_config() {
        let mut config = McpComposerConfig::default();
        config.composer.name = "from-config".into();
        config.composer.conflict_resolution = ConflictResolution::Suffix;

        let opts = options(&config, ComposeArgs {
            name: Some("from-cli".into()),
            include: Some(vec!["a".into()]),
            exclude: vec!["b".into()],
            pyproject: None,
        });
        assert_eq!(opts.name, "from-cli");
        assert_eq!(opts.conflict_resolution, ConflictResolution::Suffix);
        assert_eq!(opts.include, Some(vec!["a".to_string()]));
        assert_eq!(opts.exclude, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn unreadable_pyproject_is_an_error() {
        let args = ComposeArgs {
            pyproject: Some(PathBuf::from("/nonexistent/pyproject.toml")),
            ..Default::default()
        };
        let Err(err) = compose(&McpComposerConfig::default(), args).await else {
            panic!("composition should fail");
        };
        assert!(err.to_string().contains("cannot read manifest"));
    }

    #[tokio::test]
    async fn empty_config_composes_nothing() {
        let composer = compose(&McpComposerConfig::default(), ComposeArgs::default())
            .await
            .unwrap();
        assert!(composer.list_tools().await.is_empty());
        composer.stop().await;
    }
}
