// Triggered logging against the simulated instrument
//
// Runs one of the three run modes until Ctrl-C, writing CSV logs into the
// output directory. The directory must already exist.

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use trigger_logger::{
    AcquisitionController, AnalogEdgeTrigger, CancelToken, DigitalEdgeTrigger, InstrumentStatus,
    RunConfig, ScriptEnd, SimulatedSource, SystemClock,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Analog,
    Digital,
    Scheduled,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Slope {
    Rising,
    Falling,
    Either,
}

#[derive(Debug, Parser)]
#[command(about = "Log channel means on every trigger from a simulated instrument")]
struct Args {
    #[arg(value_enum, default_value = "analog")]
    mode: Mode,

    /// Output directory for the CSV logs
    #[arg(short, long, default_value = "./data")]
    output: PathBuf,

    /// Analog trigger level in volts
    #[arg(short, long, default_value_t = 2.5)]
    level: f64,

    #[arg(short, long, value_enum, default_value = "rising")]
    slope: Slope,

    /// DIO pin used as trigger (0-7)
    #[arg(short, long, default_value_t = 0)]
    pin: u8,

    /// Voltage the simulated channels report
    #[arg(long, default_value_t = 2.61)]
    volts: f64,

    /// Pause between status polls in milliseconds
    #[arg(long, default_value_t = 1)]
    poll_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    #[cfg(feature = "cpu-profiling")]
    let _tracy = tracy_client::Client::start();

    let mut config = match args.mode {
        Mode::Analog => {
            let builder = AnalogEdgeTrigger::start_capturing_when(args.level);
            let builder = match args.slope {
                Slope::Rising => builder.rising_edge(),
                Slope::Falling => builder.falling_edge(),
                Slope::Either => builder.either_edge(),
            };
            RunConfig::analog_triggered(&args.output, builder.into_trigger()?)
        }
        Mode::Digital => {
            let builder = DigitalEdgeTrigger::start_capturing_when_pin(args.pin);
            let trigger = match args.slope {
                Slope::Rising => builder.goes_high(),
                Slope::Falling => builder.goes_low(),
                Slope::Either => Args::command()
                    .error(
                        ErrorKind::ArgumentConflict,
                        "DIO triggers fire on a rising or a falling edge, not both",
                    )
                    .exit(),
            };
            RunConfig::digital_triggered(&args.output, trigger)
        }
        Mode::Scheduled => RunConfig::scheduled(&args.output),
    };
    config.poll_interval = Duration::from_millis(args.poll_ms.max(1));

    // Toggle every DIO pin and report a finished capture every fifth poll.
    let source = SimulatedSource::new(2)
        .with_statuses([
            InstrumentStatus::Armed,
            InstrumentStatus::Wait,
            InstrumentStatus::Wait,
            InstrumentStatus::Triggered,
            InstrumentStatus::Done,
        ])
        .with_digital_inputs([0x00, 0x00, 0xff, 0xff])
        .with_script_end(ScriptEnd::Cycle)
        .with_samples(0, vec![args.volts; config.sample_count])
        .with_samples(1, vec![args.volts / 2.0; config.sample_count]);

    let cancel = CancelToken::new();
    let watcher = cancel.clone();
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Cannot watch for Ctrl-C: {}", e);
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            watcher.cancel();
        }
    });

    let mut controller =
        AcquisitionController::new(source, SystemClock::new(config.utc_offset), config, cancel)?;
    let summary = controller.run()?;

    println!(
        "Logged {} rows into {} file(s): {:?}",
        summary.rows_logged, summary.files_opened, summary.reason
    );
    Ok(())
}
