//! # Camera Executable
//!
//! Captures frames from the configured sensor, serves them as an MJPEG stream over HTTP and
//! listens for commands on the side channel.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use color_eyre::{eyre::WrapErr, Result};
use log::{error, info, warn};
use structopt::StructOpt;

use cam_lib::{
    cmd_handlers::build_command_table,
    cmd_server::CmdServer,
    connectivity::ConnectivitySignal,
    encoder::{EncoderConfig, JpegEncoder},
    params::{CamExecParams, CommandChannel, SensorKind, SensorParams},
    producer::Producer,
    sensor::{FrameSensor, TestPatternSensor},
    stream_server::{StreamServer, STREAM_PATH},
    PipelineContext, ShutdownToken,
};
use comms_if::eqpt::cam::Geometry;
use util::{
    logger::{logger_init, parse_level},
    session::Session,
};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Period between two statistics summaries in the log.
const STATS_PERIOD: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "cam_exec", about = "Camera capture and MJPEG streaming executable")]
struct Opts {
    /// Parameter file, relative to the params directory.
    #[structopt(long, default_value = "cam_exec.toml")]
    params: String,

    /// Minimum log level, one of info, debug or trace.
    #[structopt(long, default_value = "debug")]
    log_level: String,
}

// -----------------------------------------------------------------------------------------------
// MAIN
// -----------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;
    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("cam_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(parse_level(&opts.log_level), &session)
        .wrap_err("Failed to initialise logging")?;

    info!("Camera Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: CamExecParams =
        util::params::load(&opts.params).wrap_err("Failed to load the parameters")?;

    for warning in params.validate().wrap_err("Invalid parameters")? {
        warn!("{}", warning);
    }

    info!("Parameters loaded");

    // ---- SHUTDOWN HANDLER ----

    let shutdown = ShutdownToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        handler_token.trigger();
    })
    .wrap_err("Failed to install the shutdown handler")?;

    // ---- INIT PIPELINE ----

    let ctx = Arc::new(
        PipelineContext::new(&params, shutdown.clone())
            .wrap_err("Failed to initialise the pipeline")?,
    );

    info!(
        "Pipeline initialised: {} slots, queue capacity {}",
        params.pipeline.pool_size, params.pipeline.queue_capacity
    );

    let encoder = JpegEncoder::open(EncoderConfig::from(&params.encoder))
        .wrap_err("Failed to open the encoder")?;

    info!("Encoder initialised");

    // ---- INIT SERVERS ----

    let stream_server = StreamServer::bind(&params.stream, ctx.clone())
        .wrap_err("Failed to initialise the stream server")?;

    info!(
        "Stream available at http://{}{}",
        stream_server.local_addr()?,
        STREAM_PATH
    );

    let table = Arc::new(build_command_table(&ctx).wrap_err("Failed to build the command table")?);
    info!("Commands: {}", table.mnemonics().join(", "));
    let cmd_server = CmdServer::new(table, &ctx, params.command.line_capacity);

    // ---- WAIT FOR CONNECTIVITY ----

    // Nothing manages the network link on this platform, a bound listener is all that's needed
    let connectivity = ConnectivitySignal::new();
    connectivity.set_established();

    if !connectivity.wait_established(&shutdown) {
        info!("Shutdown before the network was established");
        session.exit();
        return Ok(());
    }

    // ---- START THREADS ----

    let producer_thread = spawn_producer(&params, &ctx, encoder)?;

    let stream_thread = thread::Builder::new()
        .name("stream_server".into())
        .spawn(move || stream_server.run())
        .wrap_err("Failed to start the stream server thread")?;

    let cmd_params = params.command.clone();
    let cmd_thread = thread::Builder::new()
        .name("cmd_server".into())
        .spawn(move || {
            if let Err(e) = cmd_server.run(&cmd_params) {
                error!("Command channel stopped: {}", e);
            }
        })
        .wrap_err("Failed to start the command thread")?;

    info!("Initialisation complete, streaming\n");

    // ---- MAIN LOOP ----

    while !shutdown.wait(STATS_PERIOD) {
        let report = ctx.stats.snapshot(&ctx.settings);
        info!(
            "Frames: {} captured, {} published, {} sent | dropped: {} queue full ({:.1}%), {} slot busy | \
             failures: {} capture, {} encode | clients: {}",
            report.frames_captured,
            report.frames_published,
            report.frames_sent,
            report.dropped_queue_full,
            report.drop_ratio() * 100.0,
            report.dropped_slot_busy,
            report.capture_failures,
            report.encode_failures,
            report.clients_active
        );
    }

    // ---- SHUTDOWN ----

    info!("Shutting down");

    if producer_thread.join().is_err() {
        error!("The producer thread panicked");
    }

    if stream_thread.join().is_err() {
        error!("The stream server thread panicked");
    }

    // Reads on stdin cannot be interrupted, leave that thread to exit with the process
    if params.command.channel != CommandChannel::Stdin && cmd_thread.join().is_err() {
        error!("The command thread panicked");
    }

    let report = ctx.stats.snapshot(&ctx.settings);
    info!("Final statistics: {:?}", report);
    session.save("stats.json", report);

    session.exit();

    Ok(())
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Start the producer thread. The sensor is opened on the thread itself since device handles are
/// not necessarily `Send`.
fn spawn_producer(
    params: &CamExecParams,
    ctx: &Arc<PipelineContext>,
    encoder: JpegEncoder,
) -> Result<JoinHandle<()>> {
    let ctx = ctx.clone();
    let sensor_params = params.sensor.clone();
    let geometry = params.encoder.geometry();

    thread::Builder::new()
        .name("producer".into())
        .spawn(move || match sensor_params.kind {
            SensorKind::TestPattern => {
                let sensor = TestPatternSensor::new(
                    geometry,
                    sensor_params.fb_count,
                    util::time::millis(sensor_params.frame_interval_ms),
                    sensor_params.rotate_180,
                );
                run_producer(&ctx, sensor, encoder);
            }
            SensorKind::V4l => run_v4l_producer(&ctx, &sensor_params, geometry, encoder),
        })
        .wrap_err("Failed to start the producer thread")
}

fn run_producer<S: FrameSensor>(ctx: &PipelineContext, sensor: S, encoder: JpegEncoder) {
    match Producer::new(ctx, sensor, encoder) {
        Ok(p) => p.run(),
        Err(e) => {
            error!("Could not start the producer: {}", e);
            ctx.shutdown.trigger();
        }
    }
}

#[cfg(feature = "v4l")]
fn run_v4l_producer(
    ctx: &PipelineContext,
    params: &SensorParams,
    geometry: Geometry,
    encoder: JpegEncoder,
) {
    use cam_lib::sensor::V4lSensor;

    match V4lSensor::open(
        &params.device,
        geometry,
        params.frame_interval_ms,
        params.fb_count,
        params.rotate_180,
    ) {
        Ok(sensor) => run_producer(ctx, sensor, encoder),
        Err(e) => {
            error!("Could not open camera {}: {}", params.device, e);
            ctx.shutdown.trigger();
        }
    }
}

#[cfg(not(feature = "v4l"))]
fn run_v4l_producer(
    ctx: &PipelineContext,
    params: &SensorParams,
    _geometry: Geometry,
    _encoder: JpegEncoder,
) {
    error!(
        "Sensor kind v4l ({}) requested but cam_exec was built without the v4l feature",
        params.device
    );
    ctx.shutdown.trigger();
}
