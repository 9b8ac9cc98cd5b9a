//! Core application runner (business logic) for `mithermometer-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit
//! codes so it can be tested deterministically with a stub HCI channel.

use crate::decoder::{DEFAULT_DEVICE_CAPACITY, SensorDecoder};
use crate::labels::{Label, LabelTable};
use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use crate::output::influxdb::InfluxDbFormatter;
use crate::output::text::TextFormatter;
use crate::output::{Format, OutputFormatter};
use crate::scanner::{HandlerError, HciChannel, ScanError, ScanSession, hci};
use clap::Parser;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::io::Write;
use std::num::NonZeroUsize;
use thiserror::Error;
use tracing::{debug, error, info};

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Index of the Bluetooth adapter (hciN) to scan with.
    #[arg(short, long, default_value_t = 0)]
    pub adapter: u16,

    /// Human-readable label for a thermometer.
    /// Format: --label A4:C1:38:00:00:01=Kitchen
    #[arg(long = "label", alias = "alias", value_parser = crate::labels::parse_label, value_name = "LABEL")]
    pub labels: Vec<Label>,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "mithermometer")]
    pub influxdb_measurement: String,

    /// Print text timestamps in UTC instead of local time
    #[arg(long)]
    pub utc: bool,

    /// Maximum number of devices to keep sequence state for
    #[arg(long, default_value_t = DEFAULT_DEVICE_CAPACITY)]
    pub max_devices: NonZeroUsize,

    /// Bring the adapter down when scanning stops
    #[arg(long)]
    pub down_on_exit: bool,

    /// Verbose logging, repeat for trace output of ignored advertisements
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RunError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunError::Scan(ScanError::Interrupted))
    }
}

/// Receiver of decoded measurements.
pub trait Dispatcher {
    fn dispatch(
        &mut self,
        address: MacAddress,
        measurement: &Measurement,
        signal_strength: i8,
    ) -> Result<(), HandlerError>;
}

/// Dispatcher writing one formatted line per measurement.
pub struct WriterDispatcher<W: Write> {
    formatter: Box<dyn OutputFormatter>,
    out: W,
}

impl<W: Write> WriterDispatcher<W> {
    pub fn new(formatter: Box<dyn OutputFormatter>, out: W) -> Self {
        Self { formatter, out }
    }
}

impl<W: Write> Dispatcher for WriterDispatcher<W> {
    fn dispatch(
        &mut self,
        _address: MacAddress,
        measurement: &Measurement,
        signal_strength: i8,
    ) -> Result<(), HandlerError> {
        let line = self.formatter.format(measurement, signal_strength);
        writeln!(self.out, "{line}")?;
        // line buffered consumers (Telegraf execd) expect each line promptly
        self.out.flush()?;
        Ok(())
    }
}

/// Build the formatter selected by `options`.
pub fn formatter(options: &Options, labels: &LabelTable) -> Box<dyn OutputFormatter> {
    match options.format {
        Format::Text => {
            let formatter = TextFormatter::new(labels.max_label_width());
            if options.utc {
                Box::new(formatter.utc())
            } else {
                Box::new(formatter)
            }
        }
        Format::Influxdb => Box::new(InfluxDbFormatter::new(options.influxdb_measurement.clone())),
    }
}

/// Scan on `channel` until `shutdown` completes, dispatching every new measurement.
///
/// Advertisements that are not from a thermometer, and re-broadcasts of a
/// measurement already seen, are dropped without reaching `dispatcher`.
/// Scanning only ends with an error, [`ScanError::Interrupted`] once
/// `shutdown` completes.
pub async fn run_with_dispatcher<C, S>(
    options: &Options,
    labels: LabelTable,
    channel: &C,
    shutdown: S,
    dispatcher: &mut dyn Dispatcher,
) -> Result<Infallible, RunError>
where
    C: HciChannel,
    S: Future<Output = ()>,
{
    debug!(labels = labels.len(), "configured device labels");
    let mut decoder = SensorDecoder::with_capacity(labels, options.max_devices);

    let mut session = ScanSession::new(channel);
    session.configure_passive_scan().await?;
    session.set_scanning(true).await?;

    let stopped = session
        .receive_loop(shutdown, |envelope| {
            match decoder.decode(envelope.address, envelope.payload) {
                Some(measurement) => {
                    dispatcher.dispatch(envelope.address, &measurement, envelope.signal_strength)
                }
                None => Ok(()),
            }
        })
        .await?;
    Ok(stopped)
}

/// Scan on `channel` until `shutdown` completes, writing formatted lines to `out`.
pub async fn run_with_io<C, S>(
    options: &Options,
    channel: &C,
    shutdown: S,
    out: &mut dyn Write,
) -> Result<Infallible, RunError>
where
    C: HciChannel,
    S: Future<Output = ()>,
{
    let labels = LabelTable::from(options.labels.as_slice());
    let mut dispatcher = WriterDispatcher::new(formatter(options, &labels), out);
    run_with_dispatcher(options, labels, channel, shutdown, &mut dispatcher).await
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
pub async fn interrupt_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received interrupt"),
        Err(error) => {
            error!(%error, "failed to listen for interrupt signal");
            std::future::pending::<()>().await;
        }
    }
}

/// Bring up the configured adapter and scan until interrupted.
pub async fn run(options: Options, out: &mut dyn Write) -> Result<Infallible, RunError> {
    hci::enable(options.adapter)?;
    let socket = hci::open(options.adapter)?;
    info!(adapter = options.adapter, "listening for thermometer advertisements");

    let result = run_with_io(&options, &socket, interrupt_signal(), out).await;

    if options.down_on_exit
        && let Err(error) = hci::disable(options.adapter)
    {
        error!(%error, "failed to bring adapter down");
    }

    result
}
