mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use crossbeam_channel::bounded;
use tracing::{error, info};

use journal_shipper::chunk::InputChunk;
use journal_shipper::config::Config;
use journal_shipper::cursor_tracker::CursorTracker;
use journal_shipper::formatters;
use journal_shipper::output_chunk::OutputChunk;
use journal_shipper::reader::journal::SystemdJournalSource;
use journal_shipper::reader::Reader;
use journal_shipper::transformer::Transformer;
use journal_shipper::writer::Writer;

use crate::cli::Cli;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = run(config) {
        error!(%err, "fatal error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Constructs the pipeline and blocks forever. Any stage encountering a
/// fatal condition logs and calls `std::process::exit` directly rather than
/// unwinding back here, since there is no meaningful partial shutdown for a
/// pipeline whose other stages are independent OS threads; this function
/// only returns early for startup failures.
fn run(config: Config) -> Result<(), anyhow::Error> {
    let cursor_tracker = Arc::new(if config.reader.cursor_file.is_empty() {
        CursorTracker::disabled()
    } else {
        CursorTracker::new(config.reader.cursor_file.clone())
    });

    let shipper = config.shipper.build()?;
    // Built once up front so a bad formatter config fails startup instead of
    // surfacing only once the first transformer thread spins up.
    formatters::build_chain(&config.formatters)?;

    let journal = SystemdJournalSource::open()?;
    let mut reader = Reader::start(journal, config.reader.into_options(), cursor_tracker.clone())?;

    let (input_tx, input_rx) = bounded::<InputChunk>(config.queue_capacity);
    let (output_tx, output_rx) = bounded::<Box<dyn OutputChunk>>(config.queue_capacity);

    let reader_handle = thread::Builder::new()
        .name("reader".to_owned())
        .spawn(move || reader.run(&input_tx))?;

    let transformer_options = config.transformer.into_options();
    let mut transformer_handles = Vec::with_capacity(config.num_transformers);
    for i in 0..config.num_transformers {
        let input_rx = input_rx.clone();
        let output_tx = output_tx.clone();
        // Each worker holds its own formatter instances: formatters carry no
        // shared mutable state and rebuilding from config is cheap, so this
        // avoids requiring `Formatter` impls to be `Clone`.
        let formatters = formatters::build_chain(&config.formatters)?;
        let shipper = shipper.clone();
        let cursor_tracker = cursor_tracker.clone();
        let transformer = Transformer::new(
            formatters,
            Box::new(move || shipper.new_output_chunk()),
            transformer_options,
            cursor_tracker,
        );
        transformer_handles.push(
            thread::Builder::new()
                .name(format!("transformer-{i}"))
                .spawn(move || transformer.run(&input_rx, &output_tx))?,
        );
    }
    drop(input_rx);
    drop(output_tx);

    let mut writer_handles = Vec::with_capacity(config.num_shippers);
    for i in 0..config.num_shippers {
        let output_rx = output_rx.clone();
        let writer = Writer::new(shipper.clone(), cursor_tracker.clone());
        writer_handles.push(
            thread::Builder::new()
                .name(format!("writer-{i}"))
                .spawn(move || writer.run(&output_rx))?,
        );
    }
    drop(output_rx);

    info!(
        num_transformers = config.num_transformers,
        num_shippers = config.num_shippers,
        "journal-shipper pipeline running"
    );

    // Every spawned thread loops forever and only exits the process directly
    // on a fatal condition (see module docs); joining just keeps `main`
    // alive and propagates a thread panic as a process-ending one.
    reader_handle.join().expect("reader thread panicked");
    for handle in transformer_handles {
        handle.join().expect("transformer thread panicked");
    }
    for handle in writer_handles {
        handle.join().expect("writer thread panicked");
    }

    Ok(())
}
