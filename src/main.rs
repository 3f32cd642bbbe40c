// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// Poll/response blob transfer over a short-range radio link
mod protocol;
mod frame;
mod chunk;
mod radio;
mod signal;
mod config;
mod sink;
mod responder;
mod initiator;
mod serial;
mod loopback;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serialport::{DataBits, Parity, StopBits};
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;
use chunk::max_blob_len;
use config::{InitiatorConfig, ResponderConfig};
use frame::DeviceId;
use initiator::{InitiatorError, InitiatorFsm};
use loopback::LoopbackRadio;
use protocol::{CHUNK_SIZE, RX_RESP_TIMEOUT_UUS, SEQUENCE_OFFSET};
use radio::{Radio, RadioError};
use responder::{ResponderError, ResponderFsm};
use serial::{RealSerialPort, SerialRadio};
use signal::RetryPolicy;
use sink::{ChunkSink, FileSink, LogSink};

#[derive(Parser)]
#[command(name = "blinkxfer")]
#[command(about = "Poll/response blob transfer over a short-range radio link", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer polls with chunks of a blob
    Respond {
        #[command(flatten)]
        serial: SerialArgs,

        /// File served as the blob
        #[arg(long)]
        blob: PathBuf,

        /// Bytes of blob carried by each response
        #[arg(long, default_value_t = CHUNK_SIZE)]
        chunk_size: usize,

        #[command(flatten)]
        layout: LayoutArgs,
    },
    /// Poll a responder and collect its chunks
    Poll {
        #[command(flatten)]
        serial: SerialArgs,

        /// Write data chunks to this file instead of logging them
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Blob length in bytes; stops the transfer once received
        #[arg(long, requires = "output")]
        length: Option<u64>,

        #[command(flatten)]
        layout: LayoutArgs,

        #[command(flatten)]
        poll: PollArgs,
    },
    /// Run a responder and an initiator over an in-memory link
    Simulate {
        /// File served as the blob
        #[arg(long)]
        blob: PathBuf,

        /// Where the initiator writes what it receives
        #[arg(short, long)]
        output: PathBuf,

        /// Lose every Nth frame sent in each direction
        #[arg(long, value_name = "N")]
        drop_every: Option<u32>,

        /// Bytes of blob carried by each response
        #[arg(long, default_value_t = CHUNK_SIZE)]
        chunk_size: usize,

        #[command(flatten)]
        layout: LayoutArgs,

        #[command(flatten)]
        poll: PollArgs,
    },
}

#[derive(Args)]
struct SerialArgs {
    /// Serial port of the radio modem (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits
    #[arg(long, default_value = "8", value_name = "BITS", value_parser = clap::value_parser!(u8).range(5..=8))]
    data_bits: u8,

    /// Parity
    #[arg(long, value_enum, default_value_t = ParityArg::None)]
    parity: ParityArg,

    /// Stop bits
    #[arg(long, default_value = "1", value_name = "BITS", value_parser = clap::value_parser!(u8).range(1..=2))]
    stop_bits: u8,
}

#[derive(Args)]
struct LayoutArgs {
    /// Sequence number answered with chunk 0; data starts one above it
    #[arg(long, default_value_t = SEQUENCE_OFFSET)]
    sequence_offset: u8,
}

#[derive(Args)]
struct PollArgs {
    /// Device id sent in each poll (up to 8 characters)
    #[arg(long, default_value = "DECAWAVE")]
    device_id: String,

    /// Sequence number of the first poll
    #[arg(long, default_value_t = SEQUENCE_OFFSET)]
    start_sequence: u8,

    /// Response timeout in UWB microseconds, 0 to wait forever
    #[arg(long, default_value_t = RX_RESP_TIMEOUT_UUS, value_name = "UUS")]
    timeout: u32,

    /// Pause before the next poll after a response
    #[arg(long, default_value = "0", value_name = "MS")]
    response_delay: u64,

    /// Pause before the next poll after a timeout
    #[arg(long, default_value = "0", value_name = "MS")]
    timeout_delay: u64,

    /// Pause before the next poll after a receive error
    #[arg(long, default_value = "0", value_name = "MS")]
    error_delay: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum ParityArg {
    None,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

impl SerialArgs {
    fn open(&self) -> anyhow::Result<SerialRadio> {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        let parity = Parity::from(self.parity);

        info!(port = %self.port, baud = self.baud, ?data_bits, ?parity, ?stop_bits, "opening serial port");
        let port = RealSerialPort::open(&self.port, self.baud, data_bits, parity, stop_bits)
            .with_context(|| format!("failed to open serial port {}", self.port))?;

        Ok(SerialRadio::new(Box::new(port)))
    }
}

impl LayoutArgs {
    fn responder(&self, chunk_size: usize) -> ResponderConfig {
        ResponderConfig {
            chunk_size,
            sequence_offset: self.sequence_offset,
        }
    }
}

impl PollArgs {
    fn config(&self) -> InitiatorConfig {
        InitiatorConfig {
            device_id: DeviceId::from_text(&self.device_id),
            start_sequence: self.start_sequence,
            response_timeout: protocol::uus_to_duration(self.timeout),
            retry: RetryPolicy {
                after_response: Duration::from_millis(self.response_delay),
                after_timeout: Duration::from_millis(self.timeout_delay),
                after_error: Duration::from_millis(self.error_delay),
            },
            ..InitiatorConfig::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Respond { serial, blob, chunk_size, layout } => {
            let blob = read_blob(&blob)?;
            let radio = serial.open()?;
            respond(Box::new(radio), blob, layout.responder(chunk_size)).context("responder stopped")?;
        }
        Commands::Poll { serial, output, length, layout, poll } => {
            if output.is_some() && poll.start_sequence > layout.sequence_offset.saturating_add(1) {
                bail!(
                    "--start-sequence {} skips data chunks; an output file needs it at or below {}",
                    poll.start_sequence,
                    layout.sequence_offset as u16 + 1
                );
            }
            let radio = serial.open()?;
            let sink: Box<dyn ChunkSink> = match &output {
                Some(path) => Box::new(
                    FileSink::create(path, layout.sequence_offset, length)
                        .with_context(|| format!("failed to create {}", path.display()))?,
                ),
                None => Box::new(LogSink),
            };
            run_initiator(Box::new(radio), sink, poll.config()).context("poll stopped")?;
        }
        Commands::Simulate { blob, output, drop_every, chunk_size, layout, poll } => {
            let blob = read_blob(&blob)?;
            let capacity = max_blob_len(layout.sequence_offset, chunk_size);
            if blob.len() as u64 > capacity {
                bail!(
                    "blob of {} bytes exceeds the {} bytes one pass of the sequence number covers",
                    blob.len(),
                    capacity
                );
            }
            simulate(blob, &output, drop_every, layout.responder(chunk_size), poll.config())?;
        }
    }

    Ok(())
}

fn read_blob(path: &Path) -> anyhow::Result<Vec<u8>> {
    let blob = std::fs::read(path).with_context(|| format!("failed to read blob {}", path.display()))?;
    info!(path = %path.display(), len = blob.len(), "blob loaded");
    Ok(blob)
}

fn respond(radio: Box<dyn Radio>, blob: Vec<u8>, config: ResponderConfig) -> Result<(), ResponderError> {
    let mut state = ResponderFsm::new(radio, Box::new(blob), config)?;

    loop {
        trace!(state = state.state(), sent = state.responses_sent(), "responder step");
        state = state.step()?;
    }
}

fn run_initiator(radio: Box<dyn Radio>, sink: Box<dyn ChunkSink>, config: InitiatorConfig) -> Result<(), InitiatorError> {
    let mut state = InitiatorFsm::new(radio, sink, config);

    loop {
        trace!(
            state = state.state(),
            sequence = state.sequence(),
            accepted = state.accepted(),
            polls = state.polls_sent(),
            "initiator step"
        );
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(InitiatorError::TransferComplete) => {
                info!("transfer complete");
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

fn simulate(
    blob: Vec<u8>,
    output: &Path,
    drop_every: Option<u32>,
    responder: ResponderConfig,
    initiator: InitiatorConfig,
) -> anyhow::Result<()> {
    let (responder_end, initiator_end) = LoopbackRadio::pair();
    let loss = drop_every.unwrap_or(0);

    let sink = FileSink::create(output, responder.sequence_offset, Some(blob.len() as u64))
        .with_context(|| format!("failed to create {}", output.display()))?;

    let served = blob.clone();
    let responder_thread = thread::spawn(move || respond(Box::new(responder_end.with_loss(loss)), served, responder));

    run_initiator(Box::new(initiator_end.with_loss(loss)), Box::new(sink), initiator).context("initiator stopped")?;

    // The initiator's end of the link is gone, which stops the responder
    match responder_thread.join() {
        Ok(Err(ResponderError::Radio { source: RadioError::Disconnected, .. })) => {}
        Ok(Err(e)) => return Err(e).context("responder stopped"),
        Ok(Ok(())) => warn!("responder returned without an error"),
        Err(_) => bail!("responder thread panicked"),
    }

    let received = std::fs::read(output).with_context(|| format!("failed to read back {}", output.display()))?;
    if received != blob {
        bail!("received {} bytes that differ from the {} byte blob", received.len(), blob.len());
    }
    info!(bytes = blob.len(), path = %output.display(), "simulated transfer verified");
    Ok(())
}
