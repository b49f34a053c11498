//! Query Matomo reports and send tracking calls from the command line.
//!
//! Reads `MATOMO_BASE_URL`, `MATOMO_TOKEN`, and optionally `DEFAULT_SITE_ID`
//! and `MATOMO_TIMEOUT_MS` from the environment. Log verbosity follows
//! `RUST_LOG` (default `warn`).
//!
//! # Examples
//!
//! ```sh
//! # Visit summary for the last seven days
//! matomo key-numbers --site 1 --period day --date last7
//!
//! # Second page of popular URLs, 20 per page
//! matomo popular-urls --site 1 --date yesterday --limit 20 --page 1
//!
//! # Video events filtered by category
//! matomo events --category Video --date today
//!
//! # Record a page view
//! matomo pageview --url https://shop.example.com/cart --title Cart
//! ```

use clap::{Args, Parser, Subcommand};
use matomo_rs::prelude::*;
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Query Matomo reports and send tracking calls.
#[derive(Parser)]
#[command(name = "matomo", version)]
struct Cli {
    /// Concurrent tracking deliveries
    #[arg(long, global = true, default_value_t = 1)]
    concurrency: usize,

    /// Retries per failed tracking call
    #[arg(long, global = true, default_value_t = 2)]
    max_retries: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Visit summary (VisitsSummary.get)
    KeyNumbers {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Most viewed page URLs (Actions.getPageUrls)
    PopularUrls {
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        page: PageArgs,
        /// Keep the hierarchical URL tree instead of flattening it
        #[arg(long)]
        no_flat: bool,
    },
    /// Top referrers across all channels (Referrers.getAll)
    Referrers {
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Event actions (Events.getAction)
    Events {
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        page: PageArgs,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Record a page view
    Pageview {
        #[command(flatten)]
        visit: VisitArgs,
        #[arg(long)]
        url: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Record a custom event
    Event {
        #[command(flatten)]
        visit: VisitArgs,
        #[arg(long)]
        category: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        value: Option<f64>,
    },
    /// Record a goal conversion
    Goal {
        #[command(flatten)]
        visit: VisitArgs,
        #[arg(long)]
        goal_id: u32,
        #[arg(long)]
        revenue: Option<f64>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Site id (falls back to DEFAULT_SITE_ID)
    #[arg(long)]
    site: Option<u32>,

    /// day, week, month, year, or range
    #[arg(long, default_value = "day")]
    period: Period,

    /// Matomo date expression (today, yesterday, 2024-01-31, last7, ...)
    #[arg(long, default_value = "today")]
    date: String,

    /// Segment expression, e.g. browserCode==FF
    #[arg(long)]
    segment: Option<String>,
}

impl QueryArgs {
    fn options(&self) -> QueryOptions {
        QueryOptions {
            site_id: self.site,
            period: self.period,
            date: self.date.clone(),
            segment: self.segment.clone(),
        }
    }
}

#[derive(Args)]
struct PageArgs {
    /// Rows per page (1-1000)
    #[arg(long, allow_negative_numbers = true)]
    limit: Option<f64>,

    /// Zero-based page number
    #[arg(long, allow_negative_numbers = true)]
    page: Option<f64>,
}

impl PageArgs {
    fn request(&self) -> PageRequest {
        PageRequest::new(self.limit, self.page)
    }
}

#[derive(Args)]
struct VisitArgs {
    /// Site id (falls back to DEFAULT_SITE_ID)
    #[arg(long)]
    site: Option<u32>,

    /// User id
    #[arg(long)]
    uid: Option<String>,

    /// Pageview id
    #[arg(long)]
    pv_id: Option<String>,
}

impl VisitArgs {
    fn context(&self) -> VisitContext {
        VisitContext {
            site_id: self.site,
            uid: self.uid.clone(),
            pv_id: self.pv_id.clone(),
            ts: Some(chrono::Utc::now()),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("failed to render output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn reporting(settings: &Settings, transport: Arc<dyn Transport>) -> Result<ReportingService, String> {
    let client = MatomoClient::new(&settings.client_config(), transport).map_err(|e| e.to_string())?;
    let service = ReportingService::new(Arc::new(client), ReportingCache::default());
    Ok(match settings.default_site_id {
        Some(site) => service.with_default_site_id(site),
        None => service,
    })
}

fn tracker(cli: &Cli, settings: &Settings, transport: Arc<dyn Transport>) -> Result<MatomoTracker, String> {
    let mut defaults = TrackingDefaults::new(&settings.token_auth);
    defaults.default_site_id = settings.default_site_id;
    let config = DispatchConfig::default()
        .with_concurrency(cli.concurrency)
        .with_retry(RetryPolicy::with_retries(cli.max_retries));
    MatomoTracker::new(&settings.base_url, defaults, &config, transport).map_err(|e| e.to_string())
}

async fn run(cli: Cli) -> Result<(), String> {
    let settings = Settings::from_env().map_err(|e| e.to_string())?;
    let transport: Arc<dyn Transport> = Arc::new(
        match settings.timeout {
            Some(t) => HttpTransport::with_timeout(t),
            None => HttpTransport::new(),
        }
        .map_err(|e| e.to_string())?,
    );

    let describe = |e: MatomoError| match e.details() {
        Some(details) => format!("{e} ({details})"),
        None => e.to_string(),
    };

    match &cli.command {
        Command::KeyNumbers { query } => {
            let result = reporting(&settings, transport)?
                .key_numbers(&query.options())
                .await
                .map_err(describe)?;
            print_json(&result)
        }
        Command::PopularUrls {
            query,
            page,
            no_flat,
        } => {
            let options = PopularUrlsOptions::new(query.options())
                .with_page(page.request())
                .with_flat(!no_flat);
            let result = reporting(&settings, transport)?
                .most_popular_urls(&options)
                .await
                .map_err(describe)?;
            print_json(&result)
        }
        Command::Referrers { query, page } => {
            let options = ReferrersOptions::new(query.options()).with_page(page.request());
            let result = reporting(&settings, transport)?
                .top_referrers(&options)
                .await
                .map_err(describe)?;
            print_json(&result)
        }
        Command::Events {
            query,
            page,
            category,
            action,
            name,
        } => {
            let options = EventsOptions {
                query: query.options(),
                page: page.request(),
                category: category.clone(),
                action: action.clone(),
                name: name.clone(),
            };
            let result = reporting(&settings, transport)?
                .events(&options)
                .await
                .map_err(describe)?;
            print_json(&result)
        }
        Command::Pageview { visit, url, title } => {
            let options = PageviewOptions {
                context: visit.context(),
                url: url.clone(),
                title: title.clone(),
            };
            let outcome = tracker(&cli, &settings, transport)?
                .track_pageview(options)
                .await
                .map_err(describe)?;
            print_json(&outcome)
        }
        Command::Event {
            visit,
            category,
            action,
            name,
            value,
        } => {
            let options = EventOptions {
                context: visit.context(),
                category: category.clone(),
                action: action.clone(),
                name: name.clone(),
                value: *value,
            };
            let outcome = tracker(&cli, &settings, transport)?
                .track_event(options)
                .await
                .map_err(describe)?;
            print_json(&outcome)
        }
        Command::Goal {
            visit,
            goal_id,
            revenue,
        } => {
            let options = GoalOptions {
                context: visit.context(),
                goal_id: *goal_id,
                revenue: *revenue,
            };
            let outcome = tracker(&cli, &settings, transport)?
                .track_goal(options)
                .await
                .map_err(describe)?;
            print_json(&outcome)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
