use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use offsync::config::Config;
use offsync::{
  logging, ApiResponse, ConnectivityMonitor, ConnectivityProbe, HttpTransport, LocalStore,
  LogNotifier, QueryParams, SyncCoordinator,
};

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline-first API client with a local cache and a durable write queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  /// Treat the service as unreachable regardless of probing
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read through the cache
  Get {
    endpoint: String,
    /// Query parameter as key=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// Queue a POST
  Post {
    endpoint: String,
    /// JSON body
    #[arg(short, long)]
    data: String,
  },
  /// Queue a PUT
  Put {
    endpoint: String,
    #[arg(short, long)]
    data: String,
  },
  /// Queue a DELETE
  Delete { endpoint: String },
  /// Queue a write with an arbitrary verb
  Queue {
    method: String,
    endpoint: String,
    #[arg(short, long)]
    data: Option<String>,
  },
  /// GET that requires a connection and bypasses the cache
  Fetch {
    endpoint: String,
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// POST that requires a connection
  Create {
    endpoint: String,
    #[arg(short, long)]
    data: String,
  },
  /// PUT that requires a connection
  Update {
    endpoint: String,
    #[arg(short, long)]
    data: String,
  },
  /// DELETE that requires a connection
  Remove { endpoint: String },
  /// Download a file into a directory
  Download {
    endpoint: String,
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
    /// Target directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
  },
  /// Deliver queued writes now
  Sync,
  /// List queued writes
  Pending,
  /// Discard all queued writes
  Clear,
  /// Show connectivity and queue depth
  Status,
  /// Keep probing and drain whenever the service comes back (Ctrl-C to stop)
  Watch,
}

impl Command {
  /// Commands that only inspect or edit the local queue. They never build a
  /// coordinator, so no drain can run underneath them.
  fn is_store_admin(&self) -> bool {
    matches!(self, Command::Pending | Command::Clear | Command::Status)
  }
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got `{s}`"))
}

fn parse_json(data: &str) -> Result<Value> {
  serde_json::from_str(data).map_err(|e| eyre!("Invalid JSON body: {}", e))
}

fn to_query(params: Vec<(String, String)>) -> QueryParams {
  params.into_iter().collect()
}

fn print_response(response: &ApiResponse) -> Result<()> {
  eprintln!("{} {}", response.status, response.message);
  println!("{}", serde_json::to_string_pretty(&response.data)?);
  Ok(())
}

async fn run_store_admin(
  command: Command,
  store: &LocalStore,
  monitor: &ConnectivityMonitor,
) -> Result<()> {
  match command {
    Command::Pending => {
      for request in store.get_pending_requests().await? {
        println!(
          "#{:<5} {} {:<6} {}{}",
          request.id,
          request.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          request.method,
          request.endpoint,
          request
            .payload
            .map(|p| format!(" {}", p))
            .unwrap_or_default()
        );
      }
    }
    Command::Clear => {
      let removed = store.clear_pending_requests().await?;
      println!("removed {}", removed);
    }
    Command::Status => {
      println!("online:    {}", monitor.get_status());
      println!("pending:   {}", store.get_pending_request_count().await?);
      println!("set aside: {}", store.get_set_aside_count().await?);
      if let Some(path) = store.path() {
        println!("store:     {}", path.display());
      }
    }
    other => return Err(eyre!("`{:?}` is not a store admin command", other)),
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let log_dir = logging::default_log_dir();
  let _log_guard = logging::init(log_dir.as_deref(), args.verbose);

  let store_path = match &config.store.path {
    Some(p) => p.clone(),
    None => LocalStore::default_path()?,
  };
  let store = LocalStore::new(store_path);

  let monitor = ConnectivityMonitor::from_config(&config.connectivity);
  let probe = config
    .connectivity
    .probe_url
    .clone()
    .map(|url| {
      ConnectivityProbe::new(
        monitor.clone(),
        url,
        config.connectivity.probe_interval(),
        config.api.timeout(),
      )
    })
    .transpose()?;

  let needs_probe = !matches!(args.command, Command::Pending | Command::Clear);
  if args.offline {
    monitor.set_online(false);
  } else if let Some(probe) = probe.as_ref().filter(|_| needs_probe) {
    probe.check_once().await;
  }

  if args.command.is_store_admin() {
    return run_store_admin(args.command, &store, &monitor).await;
  }

  let transport = HttpTransport::new(config.api.base_url.clone(), config.api.timeout())?;
  let coordinator = SyncCoordinator::init(
    store,
    monitor.clone(),
    Arc::new(transport),
    Arc::new(LogNotifier),
  );
  if let Some(token) = Config::get_api_token() {
    coordinator.set_auth_token(&token);
  }

  match args.command {
    Command::Get { endpoint, params } => {
      let response = coordinator.get(&endpoint, &to_query(params)).await?;
      print_response(&response)?;
    }
    Command::Post { endpoint, data } => {
      let response = coordinator.post(&endpoint, parse_json(&data)?).await?;
      print_response(&response)?;
    }
    Command::Put { endpoint, data } => {
      let response = coordinator.put(&endpoint, parse_json(&data)?).await?;
      print_response(&response)?;
    }
    Command::Delete { endpoint } => {
      let response = coordinator.delete(&endpoint).await?;
      print_response(&response)?;
    }
    Command::Queue {
      method,
      endpoint,
      data,
    } => {
      let payload = data.as_deref().map(parse_json).transpose()?;
      let response = coordinator.enqueue(&method, &endpoint, payload).await?;
      print_response(&response)?;
    }
    Command::Fetch { endpoint, params } => {
      let response = coordinator.fetch_online(&endpoint, &to_query(params)).await?;
      print_response(&response)?;
    }
    Command::Create { endpoint, data } => {
      let response = coordinator.create_online(&endpoint, parse_json(&data)?).await?;
      print_response(&response)?;
    }
    Command::Update { endpoint, data } => {
      let response = coordinator.update_online(&endpoint, parse_json(&data)?).await?;
      print_response(&response)?;
    }
    Command::Remove { endpoint } => {
      let response = coordinator.remove_online(&endpoint).await?;
      print_response(&response)?;
    }
    Command::Download {
      endpoint,
      params,
      output,
    } => {
      let file = coordinator.download_file(&endpoint, &to_query(params)).await?;
      let path = file.save_to(&output, "download")?;
      println!("{}", path.display());
    }
    Command::Sync => {
      // A startup drain may already hold the slot
      while coordinator.is_draining() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
      }
      let report = coordinator.drain_now().await;
      if !report.ran {
        return Err(eyre!("Not synced: offline or a sync is already running"));
      }
      println!(
        "delivered {}, set aside {}, remaining {}{}",
        report.delivered.len(),
        report.set_aside.len(),
        report.remaining,
        report
          .failed
          .map(|id| format!(", stopped at #{}", id))
          .unwrap_or_default()
      );
    }
    // Handled by run_store_admin
    Command::Pending | Command::Clear | Command::Status => {}
    Command::Watch => {
      let Some(probe) = probe else {
        return Err(eyre!("`watch` needs connectivity.probe_url in the config"));
      };
      let handle = probe.spawn();
      let mut status = coordinator.subscribe_status();
      let mut pending = coordinator.subscribe_pending_count();
      let depth = coordinator.store().get_pending_request_count().await?;
      println!("online: {}, pending: {}", coordinator.is_online(), depth);

      loop {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => break,
          changed = status.changed() => {
            if changed.is_err() {
              break;
            }
            let s = status.borrow_and_update().clone();
            println!(
              "online: {}, syncing: {}{}",
              s.online,
              s.syncing,
              s.last_error.map(|e| format!(", last error: {}", e)).unwrap_or_default()
            );
          }
          changed = pending.changed() => {
            if changed.is_err() {
              break;
            }
            println!("pending: {}", *pending.borrow_and_update());
          }
        }
      }
      handle.abort();
    }
  }

  // Let a drain started by a queued write finish before exiting
  while coordinator.is_draining() {
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn command(argv: &[&str]) -> Command {
    let mut full = vec!["offsync"];
    full.extend_from_slice(argv);
    Args::try_parse_from(full).unwrap().command
  }

  #[test]
  fn test_queue_admin_commands_skip_the_coordinator() {
    assert!(command(&["pending"]).is_store_admin());
    assert!(command(&["clear"]).is_store_admin());
    assert!(command(&["status"]).is_store_admin());
    assert!(!command(&["sync"]).is_store_admin());
    assert!(!command(&["post", "/a", "--data", "{}"]).is_store_admin());
  }

  #[tokio::test]
  async fn test_clear_discards_queue_without_sending() {
    let store = LocalStore::in_memory();
    store
      .store_pending_request("/a", offsync::Method::Post, None)
      .await
      .unwrap();
    let monitor = ConnectivityMonitor::new(true, Default::default());

    run_store_admin(Command::Clear, &store, &monitor).await.unwrap();
    assert_eq!(store.get_pending_request_count().await.unwrap(), 0);
  }

  #[test]
  fn test_param_parsing() {
    assert_eq!(parse_param("a=b=c").unwrap(), ("a".into(), "b=c".into()));
    assert!(parse_param("novalue").is_err());
  }
}
