//! Serve command - static directory dev server with live reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::cli::ServeArgs;
use crate::config::Settings;
use crate::log_event;
use crate::reloader::Reloader;

/// Effective serve options after CLI arguments are laid over settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    pub root: PathBuf,
    pub bind: String,
    pub watch: Vec<PathBuf>,
    pub endpoint: String,
    pub disable_caching: bool,
    pub debounce: Duration,
}

impl ServeOptions {
    /// CLI flags win over settings. With no watch directories anywhere, the
    /// served root is watched.
    pub fn resolve(args: ServeArgs, settings: &Settings) -> Self {
        let root = args.dir.unwrap_or_else(|| settings.server.root.clone());
        let watch = if !args.watch.is_empty() {
            args.watch
        } else if !settings.reload.directories.is_empty() {
            settings.reload.directories.clone()
        } else {
            vec![root.clone()]
        };

        Self {
            bind: args.bind.unwrap_or_else(|| settings.server.bind.clone()),
            endpoint: args
                .endpoint
                .unwrap_or_else(|| settings.reload.endpoint.clone()),
            disable_caching: settings.reload.disable_caching && !args.allow_caching,
            debounce: Duration::from_millis(
                args.debounce_ms.unwrap_or(settings.reload.debounce_ms),
            ),
            root,
            watch,
        }
    }

    pub fn reloader(&self) -> Reloader {
        Reloader::builder()
            .directories(self.watch.iter().cloned())
            .endpoint(self.endpoint.clone())
            .disable_caching(self.disable_caching)
            .debounce(self.debounce)
            .build()
    }
}

/// Static file router for `root` wrapped in the reload layer.
pub fn router(root: &Path, reloader: &Reloader) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(root))
        .layer(reloader.layer())
        .layer(TraceLayer::new_for_http())
}

/// Run the serve command.
pub async fn run(args: ServeArgs, settings: &Settings) -> anyhow::Result<()> {
    let options = ServeOptions::resolve(args, settings);
    if !options.root.is_dir() {
        anyhow::bail!("{} is not a directory", options.root.display());
    }

    let reloader = options.reloader();
    let app = router(&options.root, &reloader);

    let listener = TcpListener::bind(&options.bind)
        .await
        .with_context(|| format!("failed to bind {}", options.bind))?;
    let addr = listener.local_addr()?;
    log_event!(
        "serve",
        "listening",
        "http://{addr} serving {}",
        options.root.display()
    );

    let token = reloader.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await
        .context("server error")?;

    reloader.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[serve] failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    log_event!("serve", "shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults_watch_root() {
        let options = ServeOptions::resolve(
            ServeArgs {
                dir: Some(PathBuf::from("public")),
                ..ServeArgs::default()
            },
            &Settings::default(),
        );
        assert_eq!(options.root, PathBuf::from("public"));
        assert_eq!(options.watch, vec![PathBuf::from("public")]);
        assert_eq!(options.bind, "127.0.0.1:3001");
        assert_eq!(options.endpoint, "/reload_ws");
        assert!(options.disable_caching);
        assert_eq!(options.debounce, Duration::from_millis(100));
    }

    #[test]
    fn test_resolve_prefers_settings_directories() {
        let mut settings = Settings::default();
        settings.reload.directories = vec![PathBuf::from("templates")];
        let options = ServeOptions::resolve(ServeArgs::default(), &settings);
        assert_eq!(options.root, PathBuf::from("."));
        assert_eq!(options.watch, vec![PathBuf::from("templates")]);
    }

    #[test]
    fn test_resolve_cli_overrides() {
        let mut settings = Settings::default();
        settings.reload.directories = vec![PathBuf::from("templates")];
        let args = ServeArgs {
            bind: Some("0.0.0.0:8000".to_string()),
            watch: vec![PathBuf::from("src")],
            endpoint: Some("/__lr".to_string()),
            allow_caching: true,
            debounce_ms: Some(20),
            ..ServeArgs::default()
        };
        let options = ServeOptions::resolve(args, &settings);
        assert_eq!(options.bind, "0.0.0.0:8000");
        assert_eq!(options.watch, vec![PathBuf::from("src")]);
        assert_eq!(options.endpoint, "/__lr");
        assert!(!options.disable_caching);
        assert_eq!(options.debounce, Duration::from_millis(20));
    }
}
