//! Runs a REW sweep measurement from a terminal dashboard, a console, or
//! for console clients over TCP.

use autosweep::{
    args::{FrontEnd, SweepArgs},
    automation::{DummyScreen, InputAutomation, Layout, XdoDriver},
    console::run_console,
    observer::WorkflowEvent,
    player::{SilentPlayer, SweepExecutor, VlcPlayer},
    rew::{http::REQUEST_TIMEOUT, DummyRew, MeasurementTool, RewClient},
    session::MeasurementSession,
    settings::load_settings,
    tui::run_tui,
    workflow::{SweepDriver, WorkflowController},
};
use clap::Parser;
use env_logger::{Env, Target};
use log::{info, warn};
use std::{
    error::Error,
    fs::File,
    io::{self, BufReader},
    net::{Shutdown, TcpListener},
    sync::mpsc::{self, Sender},
    time::Duration,
};

type Tool = Box<dyn MeasurementTool + Send>;
type Driver = Box<dyn SweepDriver + Send>;

/// How long a simulated stimulus "plays".
const SIMULATED_PLAYBACK: Duration = Duration::from_secs(1);

fn init_logging(args: &SweepArgs) -> io::Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(path) = args.log_file() {
        let file = File::create(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn backends(args: &SweepArgs) -> Result<(Tool, Driver), Box<dyn Error>> {
    if args.simulate {
        info!("Simulating REW, the screen and playback");
        let rew = DummyRew::builder()
            .seed(rand::random())
            .problem_rate(args.problem_rate)
            .peak_jitter(0.0002)
            .build();
        let executor = SweepExecutor::new(SilentPlayer::new(SIMULATED_PLAYBACK), &args.audio_dir);
        let layout = Layout {
            settle: Duration::from_millis(300),
            ..Layout::default()
        };
        let automation =
            InputAutomation::new(DummyScreen::new().with_rew(rew.clone()), executor, &args.assets_dir)
                .with_layout(layout);
        return Ok((Box::new(rew), Box::new(automation)));
    }

    let rew = RewClient::new(&args.rew_url, REQUEST_TIMEOUT)?;
    if !args.audio_dir.is_dir() {
        warn!("Audio directory {} does not exist", args.audio_dir.display());
    }
    let executor = SweepExecutor::new(VlcPlayer::default(), &args.audio_dir)
        .with_default_timeout(args.playback_timeout());
    let automation = InputAutomation::new(
        XdoDriver::new(&args.capture_command),
        executor,
        &args.assets_dir,
    );
    Ok((Box::new(rew), Box::new(automation)))
}

fn session<E>(
    args: &SweepArgs,
    events: Sender<E>,
) -> Result<MeasurementSession<Tool, Driver, E>, Box<dyn Error>>
where
    E: From<WorkflowEvent> + Send + 'static,
{
    let (tool, driver) = backends(args)?;
    let config = args.measurement_config(load_settings(&args.settings));
    info!(
        "Measuring {} at position '{}'",
        config.channels.ordered_channels().join(","),
        config.position
    );
    let controller = WorkflowController::new(tool, driver, args.controller_config());
    Ok(MeasurementSession::new(controller, config, events))
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = SweepArgs::parse();
    init_logging(&args)?;

    match args.front_end() {
        FrontEnd::Tui => {
            let (tx, rx) = mpsc::channel::<WorkflowEvent>();
            let mut session = session(&args, tx)?;
            run_tui(&mut session, &rx, &args.settings)?;
        }
        FrontEnd::Console => {
            let (tx, _rx) = mpsc::channel();
            let mut session = session(&args, tx)?;
            run_console(
                BufReader::new(io::stdin()),
                &mut io::stdout(),
                &mut session,
                &args.settings,
            )?;
        }
        FrontEnd::Serve(addr) => {
            let (tx, _rx) = mpsc::channel();
            let mut session = session(&args, tx)?;
            let listener = TcpListener::bind(&addr)?;
            info!("Listening for console clients on {addr}");

            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Failed to accept a console client: {e}");
                        continue;
                    }
                };
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".to_owned());
                info!("Console client {peer} connected");

                let reader = BufReader::new(stream.try_clone()?);
                if let Err(e) = run_console(reader, &mut stream, &mut session, &args.settings) {
                    warn!("Console client {peer}: {e}");
                }
                // Unblocks the reader thread still waiting on the socket.
                let _ = stream.shutdown(Shutdown::Both);
                info!("Console client {peer} disconnected");
            }
        }
    }
    Ok(())
}
