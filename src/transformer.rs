//! The transformer stage: applies the formatter chain to each entry, packs
//! results into sink-specific output chunks, and ships them on either a size
//! bound or a flush-deadline timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};
use tracing::{error, warn};

use crate::chunk::{ChunkId, InputChunk};
use crate::cursor_tracker::CursorTracker;
use crate::formatters::Formatter;
use crate::output_chunk::{AddResult, OutputChunk};

#[derive(Debug, Clone, Copy)]
pub struct TransformerOptions {
    pub max_log_delay: Duration,
}

impl Default for TransformerOptions {
    fn default() -> Self {
        Self {
            max_log_delay: Duration::from_secs(3),
        }
    }
}

pub struct Transformer {
    formatters: Vec<Box<dyn Formatter>>,
    new_output_chunk: Box<dyn Fn() -> Box<dyn OutputChunk> + Send + Sync>,
    options: TransformerOptions,
    cursor_tracker: Arc<CursorTracker>,
}

impl Transformer {
    pub fn new(
        formatters: Vec<Box<dyn Formatter>>,
        new_output_chunk: Box<dyn Fn() -> Box<dyn OutputChunk> + Send + Sync>,
        options: TransformerOptions,
        cursor_tracker: Arc<CursorTracker>,
    ) -> Self {
        Self {
            formatters,
            new_output_chunk,
            options,
            cursor_tracker,
        }
    }

    /// Runs one worker's loop forever. Multiple workers may call this
    /// concurrently; each owns its own in-progress output chunk and processes
    /// whole input chunks without handing entries to another worker, so
    /// splits always attribute to the right `order`.
    pub fn run(&self, input: &Receiver<InputChunk>, output: &Sender<Box<dyn OutputChunk>>) -> ! {
        let mut current = (self.new_output_chunk)();
        let mut last_ship_time = Instant::now();

        loop {
            let input_chunk = if current.is_empty() {
                match input.recv() {
                    Ok(chunk) => chunk,
                    Err(_) => {
                        error!("input-chunk queue closed; reader stage is gone");
                        std::process::exit(1);
                    }
                }
            } else {
                let remaining = self
                    .options
                    .max_log_delay
                    .saturating_sub(last_ship_time.elapsed());
                select! {
                    recv(input) -> msg => match msg {
                        Ok(chunk) => chunk,
                        Err(_) => {
                            error!("input-chunk queue closed; reader stage is gone");
                            std::process::exit(1);
                        }
                    },
                    recv(crossbeam_channel::after(remaining)) -> _ => {
                        self.ship(&mut current, output);
                        last_ship_time = Instant::now();
                        continue;
                    }
                }
            };

            self.process_input_chunk(input_chunk, &mut current, output, &mut last_ship_time);
        }
    }

    fn process_input_chunk(
        &self,
        input_chunk: InputChunk,
        current: &mut Box<dyn OutputChunk>,
        output: &Sender<Box<dyn OutputChunk>>,
        last_ship_time: &mut Instant,
    ) {
        let id = input_chunk.id;

        for mut entry in input_chunk.entries {
            for formatter in &self.formatters {
                if let Err(err) = formatter.apply(&mut entry) {
                    warn!(%err, "formatter failed; entry continues unformatted by this step");
                }
                if entry.is_dropped() {
                    break;
                }
            }
            if entry.is_dropped() {
                continue;
            }

            match current.add(&entry.fields) {
                AddResult::Accepted => {}
                AddResult::Error => {
                    warn!("failed to serialise entry; dropping");
                }
                AddResult::RejectedFull => {
                    if !current.is_empty() {
                        if id.is_identified() {
                            current.attach_input_id(id.order);
                            // Duplicate the in-flight reservation: both the
                            // chunk we're about to ship and the fresh one
                            // below will carry data from this input chunk,
                            // so both completions must be heard before the
                            // input chunk is retired.
                            self.cursor_tracker.report_in_flight(id.clone());
                        }
                        self.ship(current, output);
                        *last_ship_time = Instant::now();
                    }

                    match current.add(&entry.fields) {
                        AddResult::Accepted => {}
                        _ => warn!("entry too large for an empty output chunk; dropping"),
                    }
                }
            }
        }

        self.finish_input_chunk(&id, current);
    }

    fn finish_input_chunk(&self, id: &ChunkId, current: &mut Box<dyn OutputChunk>) {
        if !id.is_identified() {
            return;
        }
        if current.is_empty() {
            // Nothing from this input chunk made it into an output chunk;
            // retire the reader's reservation immediately so it doesn't
            // stall the cursor.
            if let Err(err) = self.cursor_tracker.report_completed_by_order(&[id.order]) {
                error!(%err, "internal invariant violation");
                std::process::exit(1);
            }
        } else {
            current.attach_input_id(id.order);
        }
    }

    fn ship(&self, current: &mut Box<dyn OutputChunk>, output: &Sender<Box<dyn OutputChunk>>) {
        let finished = std::mem::replace(current, (self.new_output_chunk)());
        if output.send(finished).is_err() {
            error!("output-chunk queue closed; writer stage is gone");
            std::process::exit(1);
        }
    }
}
