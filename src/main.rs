use clap::{Parser, Subcommand};
use iapkit::application::manager::StoreManager;
use iapkit::config::StoreConfig;
use iapkit::domain::observer::{ObserverHandlers, ObserverId};
use iapkit::domain::ports::{PlatformBox, PlatformEvent};
use iapkit::domain::product::ProductId;
use iapkit::domain::receipt;
use iapkit::domain::transaction::TransactionId;
use iapkit::infrastructure::in_memory::InMemoryPlatform;
use iapkit::interfaces::csv::event_reader::EventReader;
use iapkit::interfaces::csv::report_writer::{Callback, ReportRow, ReportWriter};
use iapkit::telemetry;
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a CSV script of platform events and report observer callbacks
    Replay {
        /// Event script CSV file
        script: PathBuf,

        /// JSON store configuration (optional)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Product ids to observe; defaults to the configured product ids
        #[arg(long, value_delimiter = ',')]
        observe: Vec<String>,

        /// Request a restore before replaying
        #[arg(long)]
        restore: bool,
    },
    /// Decode a DER receipt file and print it as JSON
    Receipt {
        /// Receipt blob
        blob: PathBuf,

        /// Fail if the receipt holds no in-app purchases
        #[arg(long)]
        expect_purchases: bool,
    },
}

type Report = Arc<Mutex<Vec<ReportRow>>>;

fn record(report: &Report, row: ReportRow) {
    report
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(row);
}

fn reporting_handlers(report: &Report) -> ObserverHandlers {
    let (success, failure, content) = (report.clone(), report.clone(), report.clone());
    ObserverHandlers::new(
        move |tx| {
            let state = format!("{:?}", tx.state).to_lowercase();
            record(
                &success,
                ReportRow::new(tx.id.as_str(), tx.product_id.as_str(), Callback::Success, state),
            );
        },
        move |tx, cancelled| {
            let detail = if cancelled { "cancelled" } else { "failed" };
            record(
                &failure,
                ReportRow::new(tx.id.as_str(), tx.product_id.as_str(), Callback::Failure, detail),
            );
        },
    )
    .with_content_ready(move |download, url, error| {
        let detail = match (url, error) {
            (_, Some(e)) => format!("{} {}", download.content_id, e),
            (Some(url), None) => format!("{} {}", download.content_id, url),
            (None, None) => download.content_id.clone(),
        };
        record(
            &content,
            ReportRow::new(download.transaction_id.as_str(), "", Callback::ContentReady, detail),
        );
    })
}

async fn replay(
    script: PathBuf,
    config: Option<PathBuf>,
    observe: Vec<String>,
    restore: bool,
) -> Result<()> {
    let config = match config {
        Some(path) => StoreConfig::from_path(path).into_diagnostic()?,
        None => StoreConfig::default(),
    };
    let observed: Vec<ProductId> = if observe.is_empty() {
        config.product_ids.clone()
    } else {
        observe.into_iter().map(ProductId::from).collect()
    };

    let platform = InMemoryPlatform::new();
    let boxed: PlatformBox = Box::new(platform.clone());
    let store = StoreManager::new(boxed, config);

    let report: Report = Arc::new(Mutex::new(Vec::new()));
    store.add_observer_for_products(ObserverId::next(), observed, reporting_handlers(&report));

    if restore {
        let sink = report.clone();
        store
            .restore_purchases(move |result| {
                let detail = match result {
                    Ok(()) => "ok".to_string(),
                    Err(e) => e.to_string(),
                };
                record(&sink, ReportRow::new("", "", Callback::Restore, detail));
            })
            .await;
    }

    let mut products: HashMap<TransactionId, ProductId> = HashMap::new();
    let mut reported_finalized = 0;

    // Process events
    let file = File::open(script).into_diagnostic()?;
    let reader = EventReader::new(file);
    for event_result in reader.events() {
        match event_result {
            Ok(event) => {
                if let PlatformEvent::TransactionUpdated(tx) = &event {
                    products.insert(tx.id.clone(), tx.product_id.clone());
                }
                if let Err(e) = store.handle_event(event).await {
                    eprintln!("Error processing event: {}", e);
                }

                let finalized = platform.finalized();
                for id in &finalized[reported_finalized..] {
                    let product = products.get(id).map_or("", ProductId::as_str);
                    record(
                        &report,
                        ReportRow::new(id.as_str(), product, Callback::Finalized, ""),
                    );
                }
                reported_finalized = finalized.len();
            }
            Err(e) => {
                eprintln!("Error reading event: {}", e);
            }
        }
    }

    // Content rows only know the transaction; fill in the product.
    let recorded = std::mem::take(&mut *report.lock().unwrap_or_else(PoisonError::into_inner));
    let rows: Vec<ReportRow> = recorded
        .into_iter()
        .map(|mut row| {
            if row.product.is_empty()
                && let Some(product) = products.get(&TransactionId::from(row.transaction.as_str()))
            {
                row.product = product.to_string();
            }
            row
        })
        .collect();

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_rows(rows).into_diagnostic()?;

    Ok(())
}

fn decode_receipt(blob: PathBuf, expect_purchases: bool) -> Result<()> {
    let bytes = std::fs::read(blob).into_diagnostic()?;
    let record = if expect_purchases {
        receipt::parse_expecting_purchases(&bytes)
    } else {
        receipt::parse(&bytes)
    }
    .into_diagnostic()?;

    println!("{}", serde_json::to_string_pretty(&record).into_diagnostic()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            script,
            config,
            observe,
            restore,
        } => replay(script, config, observe, restore).await,
        Command::Receipt {
            blob,
            expect_purchases,
        } => decode_receipt(blob, expect_purchases),
    }
}
