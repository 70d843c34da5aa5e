mod cache;
mod config;
mod connectivity;
mod db;
mod http;
mod outbox;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cache::SqliteStorage;
use config::Config;
use connectivity::{Connectivity, ConnectivityObserver, ReachabilityProbe};
use db::Database;
use http::{Fetcher, HttpFetcher, Request};
use outbox::{
  Activity, BookingInquiry, ConfiguredTransport, ContactForm, DeliveryReceipt, QueueStore,
  SubmissionClient, SubmitError,
};
use worker::{CacheWorker, FetchDisposition, Registration, SyncTag, WorkerMessage, WorkerSettings};

type HostRegistration = Registration<SqliteStorage, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(name = "kalavrita-offline")]
#[command(about = "Offline cache worker and submission queue for the Kalavrita Guide")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kalavrita/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured worker version, seeding the static partition
  Install,
  /// Fetch a path through the controlling worker
  Fetch {
    path: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Post a JSON message to the worker, e.g. '{"type":"CACHE_FORM_DATA","formData":{...}}'
  ///
  /// A waiting worker only exists within the process that installed it, so
  /// SKIP_WAITING has nothing to activate here.
  Message { json: String },
  /// Send a contact form message
  Submit {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    subject: String,
    #[arg(long)]
    message: String,
    /// Act as if the network were unreachable
    #[arg(long)]
    offline: bool,
  },
  /// Send a booking inquiry for an activity
  Book {
    /// JSON file describing the activity
    #[arg(long)]
    activity: PathBuf,
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    group_size: Option<String>,
    #[arg(long)]
    requests: Option<String>,
    #[arg(long)]
    offline: bool,
  },
  /// Replay the queued submissions once
  Drain,
  /// Print connectivity and queue contents as JSON
  Status,
  /// Run a background sync on the controlling worker
  Sync {
    #[arg(default_value = "contact-form-sync")]
    tag: String,
  },
  /// Watch connectivity and drain the queue whenever the origin comes back
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let db = Arc::new(Database::open(config.database.as_deref())?);
  let fetcher = Arc::new(HttpFetcher::new(config.request_timeout())?);

  match args.command {
    Command::Install => {
      let mut registration = HostRegistration::new();
      registration.update(new_worker(&config, &db, &fetcher)?).await?;
      report_registration(&registration);
    }
    Command::Fetch { path, navigate } => {
      let registration = restore_registration(&config, &db, &fetcher).await?;
      let url = config
        .origin_url()?
        .join(&path)
        .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };

      let response = match registration.dispatch(&request).await? {
        FetchDisposition::Respond(response) => response,
        FetchDisposition::Passthrough => fetcher.fetch(&request).await?,
      };
      println!(
        "{} {} ({} bytes, {})",
        response.status,
        response.status_text,
        response.body.len(),
        response.header("content-type").unwrap_or("no content type")
      );
    }
    Command::Message { json } => {
      let message: WorkerMessage =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid worker message: {}", e))?;
      let mut registration = restore_registration(&config, &db, &fetcher).await?;
      if message == WorkerMessage::SkipWaiting && registration.waiting().is_none() {
        println!("no worker is waiting");
      }
      registration.post_message(message)?;
      report_registration(&registration);
    }
    Command::Submit {
      name,
      email,
      subject,
      message,
      offline,
    } => {
      let client = submission_client(&config, &db, offline).await?;
      let form = ContactForm {
        name,
        email,
        subject,
        message,
      };
      print_feedback(client.submit(&form).await);
    }
    Command::Book {
      activity,
      name,
      email,
      phone,
      date,
      group_size,
      requests,
      offline,
    } => {
      let activity = load_activity(&activity)?;
      let inquiry = BookingInquiry {
        name,
        email,
        phone,
        preferred_date: date,
        group_size,
        special_requests: requests,
      };
      let client = submission_client(&config, &db, offline).await?;
      print_feedback(client.submit_booking(&activity, &inquiry).await);
    }
    Command::Drain => {
      let client = submission_client(&config, &db, false).await?;
      let report = client.drain_queue().await?;
      println!(
        "attempted {}, delivered {}, requeued {}, dropped {}",
        report.attempted, report.delivered, report.requeued, report.dropped
      );
    }
    Command::Status => {
      let client = submission_client(&config, &db, false).await?;
      let status = client.queue_status()?;
      println!("{}", serde_json::to_string_pretty(&status)?);
    }
    Command::Sync { tag } => {
      let tag = SyncTag::parse(&tag).ok_or_else(|| eyre!("Unknown sync tag: {}", tag))?;
      let registration = restore_registration(&config, &db, &fetcher).await?;
      let done = registration.sync(tag).await;
      println!("{}: {}", tag.as_str(), if done { "synced" } else { "nothing sent" });
    }
    Command::Watch => watch(&config, &db).await?,
  }

  Ok(())
}

fn init_logging() -> Result<WorkerGuard> {
  let dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("kalavrita")
    .join("logs");
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "kalavrita-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("KALAVRITA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn new_worker(
  config: &Config,
  db: &Arc<Database>,
  fetcher: &Arc<HttpFetcher>,
) -> Result<CacheWorker<SqliteStorage, HttpFetcher>> {
  let settings = WorkerSettings::from_config(config)?;
  let storage = Arc::new(SqliteStorage::new(Arc::clone(db)));
  Ok(CacheWorker::new(settings, storage, Arc::clone(fetcher)))
}

async fn restore_registration(
  config: &Config,
  db: &Arc<Database>,
  fetcher: &Arc<HttpFetcher>,
) -> Result<HostRegistration> {
  let mut registration = HostRegistration::new();
  registration.restore(new_worker(config, db, fetcher)?).await?;
  Ok(registration)
}

fn report_registration(registration: &HostRegistration) {
  if let Some(worker) = registration.controller() {
    println!(
      "controller {} ({}): {} / {}",
      worker.version(),
      worker.state(),
      worker.partitions().static_name,
      worker.partitions().dynamic_name
    );
  }
  if let Some(worker) = registration.waiting() {
    println!("waiting {} ({})", worker.version(), worker.state());
  }
}

async fn submission_client(
  config: &Config,
  db: &Arc<Database>,
  force_offline: bool,
) -> Result<SubmissionClient<ConfiguredTransport>> {
  let online = !force_offline && probe(config)?.check().await;
  info!(online, "Initial connectivity");

  Ok(SubmissionClient::new(
    ConfiguredTransport::from_config(config)?,
    QueueStore::new(Arc::clone(db)),
    Connectivity::new(online),
    config.recipient.clone(),
  ))
}

fn probe(config: &Config) -> Result<ReachabilityProbe> {
  Ok(ReachabilityProbe::new(
    HttpFetcher::new(config.request_timeout())?,
    config.origin_url()?,
    Duration::from_millis(config.connectivity.poll_interval_ms),
  ))
}

fn load_activity(path: &Path) -> Result<Activity> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read activity file {}: {}", path.display(), e))?;
  serde_json::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse activity file {}: {}", path.display(), e))
}

fn print_feedback(result: std::result::Result<DeliveryReceipt, SubmitError>) {
  match result {
    Ok(receipt) => println!("Message sent successfully ({})", receipt.message_id),
    Err(SubmitError::QueuedOffline) => {
      println!("Message saved offline. It will be sent when you're back online.")
    }
    Err(e) => println!("Error sending message. Please try again. ({})", e),
  }
}

/// Run the connectivity observer until interrupted.
async fn watch(config: &Config, db: &Arc<Database>) -> Result<()> {
  let client = Arc::new(submission_client(config, db, false).await?);
  let online = client.connectivity().is_online();

  let (tx, rx) = connectivity::channel();
  let poller = probe(config)?.spawn(online, tx);

  let observer = ConnectivityObserver::new(
    Arc::clone(&client),
    Duration::from_millis(config.outbox.drain_delay_ms),
  );
  let observer = tokio::spawn(observer.run(rx));

  let mut changes = client.connectivity().subscribe();
  let reporter = tokio::spawn(async move {
    while changes.changed().await.is_ok() {
      let online = *changes.borrow_and_update();
      println!("{}", if online { "online" } else { "offline" });
    }
  });

  println!("Watching {} (ctrl-c to stop)", config.origin);
  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;

  // Closing the event channel lets the observer finish its in-flight drains
  poller.abort();
  if let Err(e) = observer.await {
    warn!(error = %e, "Connectivity observer failed");
  }
  reporter.abort();
  Ok(())
}
