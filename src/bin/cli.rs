//! Scomm command line interface.

use std::io;
use std::process;
use std::time::Duration;

use clap::Parser;
use console::style;
use log::{debug, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use scomm::{
    self as sc, CancelToken, LinePrompt, Multiplexer, PortLink, RawModeGuard, SettingsBuilder,
};

/// Interactive serial terminal with file upload for embedded targets.
///
/// Scomm behaves like a plain terminal: keystrokes go to the device and
/// device output is printed locally. Press `~` for a command prompt with
/// two commands: `p <file>` uploads a patch with the board's patch
/// protocol, `y <file>` sends a file with a YMODEM-derived transfer.
#[derive(Parser, Debug)]
#[command(name = "scomm", version, about, verbatim_doc_comment)]
struct Cli {
    /// The tty device to talk to.
    device: String,

    /// Serial port baud rate.
    #[arg(short, long, default_value_t = 57_600)]
    baud_rate: u32,

    /// Number of bits per character.
    #[arg(short, long, default_value = "8", value_parser = ["5", "6", "7", "8"])]
    data_bits: String,

    /// Number of stop bits per byte.
    #[arg(short, long, default_value = "1", value_parser = ["1", "2"])]
    stop_bits: String,

    /// Parity checking protocol.
    #[arg(short, long, default_value = "none", value_parser = ["none", "odd", "even"])]
    parity: String,

    /// Flow control mode.
    #[arg(short, long, default_value = "hard", value_parser = ["none", "soft", "hard"])]
    flow_control: String,

    /// Logging verbosity, repeat for more.
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    println!("[SC] scomm v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .expect("Failed to initialize the logger!");

    let data_bits = match cli.data_bits.as_str() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match cli.stop_bits.as_str() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match cli.parity.as_str() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match cli.flow_control.as_str() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    let settings = SettingsBuilder::default()
        .path(cli.device.as_str())
        .baud_rate(cli.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .finalize();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .expect("Failed to install the Ctrl-C handler!");

    let mut port = match sc::open_and_setup_port(&settings) {
        Ok(port) => port,
        Err(err) => {
            eprintln!(
                "{}: cannot open {}: {}",
                style("error").red(),
                style(&cli.device).cyan(),
                err
            );
            process::exit(1);
        }
    };
    // Short timeouts keep both sides of the link non-blocking; the main
    // loop retries refused bytes on the next iteration.
    if let Err(err) = port.set_timeout(Duration::from_millis(10)) {
        eprintln!(
            "{}: cannot configure {}: {}",
            style("error").red(),
            style(&cli.device).cyan(),
            err
        );
        process::exit(1);
    }

    let raw_mode = match RawModeGuard::new() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!(
                "{}: cannot enter raw terminal mode: {}",
                style("error").red(),
                err
            );
            process::exit(1);
        }
    };

    let mut mux = Multiplexer::new(PortLink::new(port), io::stdout(), LinePrompt::new());
    let result = mux.run(&cancel);
    drop(raw_mode);

    match result {
        Ok(()) => {
            debug!("clean shutdown");
        }
        Err(err) => {
            eprintln!("{}: {}", style("error").red(), err);
            process::exit(1);
        }
    }
}
