use anyhow::{Context, Result};
use bugsight::{
    auth::{CallbackCoordinator, CallbackOutcome, ExchangeGuard, LoginStart, RequestContext},
    config::{Config, StorageBackend},
    progress::{ProgressCallbacks, ProgressStreamClient, StreamOptions},
    session::{FileSnapshotStore, KeyringSnapshotStore, SessionStore, SnapshotStore},
};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const KEYRING_SERVICE: &str = "bugsight";

fn snapshot_store(config: &Config) -> Box<dyn SnapshotStore> {
    match config.storage {
        StorageBackend::File => Box::new(FileSnapshotStore::new(&config.state_dir)),
        StorageBackend::Keyring => Box::new(KeyringSnapshotStore::new(KEYRING_SERVICE)),
    }
}

fn usage() {
    eprintln!("Usage: bugsight <login|status|logout|reset|analyze|watch>");
    eprintln!();
    eprintln!("  login              Authenticate with GitHub via the analysis service");
    eprintln!("  status             Show session and recovery state");
    eprintln!("  logout             Clear the current session");
    eprintln!("  reset [--all]      Clear a stuck exchange guard (--all also drops the snapshot)");
    eprintln!("  analyze <repo-url> Run an analysis and stream its progress");
    eprintln!("  watch <run-id>     Stream progress for an existing run");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let config = Config::load()?;

    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let store = Arc::new(SessionStore::new(snapshot_store(&config)));
    let guard = ExchangeGuard::new(&config.state_dir);

    match args[1].as_str() {
        "login" => login(&config, store, guard).await,
        "status" => status(&config, &store, &guard),
        "logout" => {
            store.hydrate();
            store.logout()?;
            println!("✅ Logged out");
            Ok(())
        }
        "reset" => {
            let all = args.iter().any(|a| a == "--all");
            guard.clear()?;
            println!("✅ Exchange guard cleared");
            if all {
                store.clear_snapshot()?;
                println!("✅ Session snapshot cleared");
            }
            Ok(())
        }
        "analyze" => {
            let repo_url = args.get(2).context("Usage: bugsight analyze <repo-url>")?;
            analyze(&config, &store, repo_url).await
        }
        "watch" => {
            let run_id = args.get(2).context("Usage: bugsight watch <run-id>")?;
            watch(&config, run_id).await
        }
        other => {
            eprintln!("Unknown command: {}", other);
            usage();
            std::process::exit(1);
        }
    }
}

async fn login(config: &Config, store: Arc<SessionStore>, guard: ExchangeGuard) -> Result<()> {
    store.hydrate();

    if store.is_authenticated() {
        let state = store.state();
        let username = state
            .user
            .map(|u| u.username)
            .unwrap_or_else(|| "unknown".to_string());
        println!("✅ Already logged in as {}", username);
        return Ok(());
    }

    let coordinator = CallbackCoordinator::new(&config.api_url, store.clone(), guard);

    println!("\n🔐 GitHub Login");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let auth_url = match coordinator.begin_login().await? {
        LoginStart::Redirect(url) => url,
        LoginStart::Degraded => {
            println!("⚠️  The service is running without authentication support.");
            println!("   Analysis is still available without a session.");
            return Ok(());
        }
    };

    println!("\n📱 Opening browser...\n");
    println!("   {}\n", auth_url);

    // Try to open browser
    let _ = opener::open(&auth_url);

    println!("Steps:");
    println!("  1. Authorize the application on GitHub");
    println!("  2. Copy the URL you are redirected to (it contains ?code=...)");
    println!("  3. Paste it below\n");

    print!("📋 Paste redirect URL: ");
    use std::io::Write;
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    let mut ctx = RequestContext::from_redirect_url(input.trim());

    match coordinator.process_callback(&mut ctx).await {
        CallbackOutcome::Succeeded => {
            let state = store.state();
            let username = state
                .user
                .map(|u| u.username)
                .unwrap_or_else(|| "unknown".to_string());
            println!("\n✅ Authenticated as {}", username);
            Ok(())
        }
        CallbackOutcome::Failed(e) => Err(e.into()),
        CallbackOutcome::InFlight => {
            anyhow::bail!(
                "Another exchange is already in flight. If a previous login crashed, run: bugsight reset"
            );
        }
        CallbackOutcome::Idle => {
            anyhow::bail!("No authorization code found in the pasted input");
        }
        CallbackOutcome::AlreadyAuthenticated => {
            println!("✅ Already logged in");
            Ok(())
        }
    }
}

fn status(config: &Config, store: &SessionStore, guard: &ExchangeGuard) -> Result<()> {
    store.hydrate();
    let state = store.state();

    println!("\n🔐 Session Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    println!("Service:  {}", config.api_url);
    println!("Storage:  {:?} ({})", config.storage, config.state_dir.display());

    if state.is_authenticated {
        let user = state.user.as_ref().unwrap();
        println!("\n✅ Logged in as {}", user.username);
        if let Some(name) = &user.name {
            println!("   Name:     {}", name);
        }
        if let Some(email) = &user.email {
            println!("   Email:    {}", email);
        }
        println!(
            "   Tokens:   api={} github={}",
            if state.token.is_some() { "yes" } else { "no" },
            if state.github_token.is_some() { "yes" } else { "no" },
        );
        println!("   Checked:  {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    } else {
        println!("\n❌ Not logged in");
    }

    if guard.is_set() {
        println!("\n⚠️  An authorization-code exchange appears to be in flight.");
        println!("   If no login is actually running, it was interrupted mid-exchange.");
        println!("   Recover with: bugsight reset");
    }

    println!();
    Ok(())
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    repo_url: &'a str,
    max_commits: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    session_id: &'a str,
}

async fn analyze(config: &Config, store: &SessionStore, repo_url: &str) -> Result<()> {
    store.hydrate();
    let state = store.state();

    let run_id = format!("run_{}", uuid::Uuid::new_v4().simple());
    println!("🚀 Starting analysis of {} (run {})", repo_url, run_id);

    // Open the progress channel before the request so no early event is
    // missed
    let client = open_watcher(config, &run_id).context("run id was empty")?;

    let body = serde_json::to_value(AnalyzeRequest {
        repo_url,
        max_commits: 100,
        access_token: state.github_token.as_deref(),
        session_id: &run_id,
    })?;

    let http = reqwest::Client::new();
    let url = format!("{}/analyze-github-url", config.api_url);
    let analysis = tokio::spawn(async move { http.post(url).json(&body).send().await });

    client.wait().await;

    match analysis.await? {
        Ok(res) if res.status().is_success() => {
            let result: serde_json::Value = res.json().await?;
            if let Some(record_id) = result.get("record_id") {
                println!("💾 Saved as record {}", record_id);
            }
            Ok(())
        }
        Ok(res) => {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("Analysis request failed ({}): {}", status, body);
        }
        Err(e) => Err(e.into()),
    }
}

async fn watch(config: &Config, run_id: &str) -> Result<()> {
    let client = open_watcher(config, run_id).context("run id must not be empty")?;
    client.wait().await;
    Ok(())
}

/// Open a progress stream that prints every update to the terminal
fn open_watcher(config: &Config, run_id: &str) -> Option<ProgressStreamClient> {
    let callbacks = ProgressCallbacks {
        on_complete: Box::new(|| println!("✅ Analysis complete")),
        on_error: Box::new(|message| println!("❌ {}", message)),
    };

    let client = ProgressStreamClient::open(
        &config.api_url,
        run_id,
        callbacks,
        StreamOptions::from(&config.progress),
    )?;

    let mut updates = client.updates();
    tokio::spawn(async move {
        use futures::StreamExt;
        while let Some(snapshot) = updates.next().await {
            println!(
                "[{:>3}%] {:<10} {}",
                snapshot.progress,
                snapshot.status.as_str(),
                snapshot.message
            );
            if let Some(detail) = snapshot.details.last() {
                println!("       • {}", detail.text);
            }
        }
    });

    Some(client)
}
