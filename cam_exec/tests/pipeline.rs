//! Pipeline tests running the producer, queue, consumers and servers together.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cam_lib::{
    cmd_handlers::build_command_table,
    cmd_server::CmdServer,
    encoder::{EncodeError, EncoderConfig, EncoderInitError, FrameEncoder, JpegEncoder},
    params::StreamParams,
    pool::{FrameHandle, FramePool},
    producer::{CycleOutcome, Producer},
    queue::HandoffQueue,
    sensor::{FrameSensor, OwnedFrame, SensorError, TestPatternSensor},
    stats::CameraSettings,
    stream_server::StreamServer,
    PipelineContext, ShutdownToken,
};
use comms_if::eqpt::cam::{FrameFormat, Geometry, PixelFormat, StatsReport};
use comms_if::net::BOUNDARY;

// ------------------------------------------------------------------------------------------------
// FAKES
// ------------------------------------------------------------------------------------------------

/// Sensor producing 4 byte grey frames whose bytes are the frame number.
struct CountingSensor {
    count: u8,
}

impl FrameSensor for CountingSensor {
    type Frame = OwnedFrame;

    fn capture_frame(&mut self) -> Result<OwnedFrame, SensorError> {
        self.count += 1;
        Ok(OwnedFrame {
            data: vec![self.count; 4],
            geometry: Geometry::new(4, 1),
            pixel_format: PixelFormat::Gray8,
        })
    }

    fn release_frame(&mut self, _frame: OwnedFrame) {}
}

/// Encoder copying the raw frame into the output.
struct CopyEncoder {
    config: EncoderConfig,
}

impl CopyEncoder {
    fn new() -> Self {
        Self {
            config: EncoderConfig {
                geometry: Geometry::new(4, 1),
                pixel_format: PixelFormat::Gray8,
                quality: 10,
            },
        }
    }
}

impl FrameEncoder for CopyEncoder {
    fn config(&self) -> &EncoderConfig {
        &self.config
    }

    fn format(&self) -> FrameFormat {
        FrameFormat::Jpeg
    }

    fn reconfigure(
        &mut self,
        geometry: Geometry,
        pixel_format: PixelFormat,
    ) -> Result<(), EncoderInitError> {
        self.config.geometry = geometry;
        self.config.pixel_format = pixel_format;
        Ok(())
    }

    fn set_quality(&mut self, quality: u8) -> Result<(), EncoderInitError> {
        self.config.quality = quality;
        Ok(())
    }

    fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, EncodeError> {
        output[..input.len()].copy_from_slice(input);
        Ok(input.len())
    }
}

// ------------------------------------------------------------------------------------------------
// HELPERS
// ------------------------------------------------------------------------------------------------

fn context(pool_size: usize, queue_capacity: usize) -> PipelineContext {
    PipelineContext::from_parts(
        FramePool::new(pool_size, 16, 16).unwrap(),
        HandoffQueue::new(queue_capacity).unwrap(),
        CameraSettings::new("Front Cam", 10),
        ShutdownToken::new(),
    )
}

fn report(ctx: &PipelineContext) -> StatsReport {
    ctx.stats.snapshot(&ctx.settings)
}

/// Send a raw request and read the whole response.
fn request(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(raw.as_bytes()).unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

fn start_server(
    ctx: &Arc<PipelineContext>,
    max_clients: usize,
) -> (SocketAddr, thread::JoinHandle<()>) {
    let params = StreamParams {
        bind: "127.0.0.1:0".into(),
        max_clients,
        socket_timeout_ms: 5000,
    };
    let server = StreamServer::bind(&params, ctx.clone()).unwrap();
    let addr = server.local_addr().unwrap();
    let handle = thread::spawn(move || server.run());

    (addr, handle)
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|w| *w == needle)
        .count()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[test]
fn test_consecutive_cycles_use_distinct_slots() {
    let ctx = context(4, 4);
    let mut producer = Producer::new(&ctx, CountingSensor { count: 0 }, CopyEncoder::new()).unwrap();

    for _ in 0..4 {
        assert_eq!(producer.run_cycle(), CycleOutcome::Published);
    }

    let slots: HashSet<usize> = (0..4)
        .map(|_| ctx.queue.try_dequeue().unwrap().index())
        .collect();
    assert_eq!(slots.len(), 4);
}

#[test]
fn test_full_queue_drops_newest_frames() {
    let ctx = context(6, 3);
    let mut producer = Producer::new(&ctx, CountingSensor { count: 0 }, CopyEncoder::new()).unwrap();

    let outcomes: Vec<CycleOutcome> = (0..5).map(|_| producer.run_cycle()).collect();
    assert_eq!(
        outcomes,
        vec![
            CycleOutcome::Published,
            CycleOutcome::Published,
            CycleOutcome::Published,
            CycleOutcome::DroppedQueueFull,
            CycleOutcome::DroppedQueueFull,
        ]
    );

    let delivered: Vec<u64> = (0..3)
        .map(|_| ctx.queue.try_dequeue().unwrap().sequence())
        .collect();
    assert_eq!(delivered, vec![1, 2, 3]);

    let r = report(&ctx);
    assert_eq!(r.dropped_queue_full, 2);
    assert_eq!(r.frames_encoded, 5);
    assert_eq!(r.frames_published, 3);
}

#[test]
fn test_leased_slots_are_never_overwritten() {
    // A consumer taking a frame every other cycle and holding it until the next one
    let ctx = context(3, 3);
    let mut producer = Producer::new(&ctx, CountingSensor { count: 0 }, CopyEncoder::new()).unwrap();

    let mut held: Option<FrameHandle> = None;
    let mut delivered = Vec::new();
    let mut outcomes = Vec::new();

    for cycle in 1..=5 {
        outcomes.push(producer.run_cycle());

        if let Some(h) = &held {
            // The frame being read still holds the bytes it was published with
            assert_eq!(h.data(), &[h.sequence() as u8; 4]);
        }

        if cycle % 2 == 0 {
            held = ctx.queue.try_dequeue();
            if let Some(h) = &held {
                delivered.push(h.sequence());
            }
        }
    }

    assert_eq!(
        outcomes,
        vec![
            CycleOutcome::Published,
            CycleOutcome::Published,
            CycleOutcome::Published,
            CycleOutcome::SlotBusy,
            CycleOutcome::SlotBusy,
        ]
    );
    assert_eq!(delivered, vec![1, 2]);
    assert_eq!(report(&ctx).dropped_slot_busy, 2);

    // The remaining frame comes out after the delivered ones
    drop(held);
    assert_eq!(ctx.queue.try_dequeue().unwrap().sequence(), 3);
}

#[test]
fn test_status_and_routing() {
    let ctx = Arc::new(context(2, 1));
    let (addr, server) = start_server(&ctx, 1);

    let status = request(addr, "GET /status HTTP/1.1\r\nHost: cam\r\n\r\n");
    assert!(status.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(status.contains("Content-Type: application/json\r\n"));
    let body = &status[status.find("\r\n\r\n").unwrap() + 4..];
    let r: StatsReport = serde_json::from_str(body).unwrap();
    assert_eq!(r.camera_name, "Front Cam");

    let missing = request(addr, "GET /nothing HTTP/1.1\r\n\r\n");
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));

    let post = request(addr, "POST /stream HTTP/1.1\r\n\r\n");
    assert!(post.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));

    let garbage = request(addr, "HELLO\r\n\r\n");
    assert!(garbage.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    ctx.shutdown.trigger();
    server.join().unwrap();
}

#[test]
fn test_stream_refused_when_full() {
    let ctx = Arc::new(context(2, 1));
    let (addr, server) = start_server(&ctx, 0);

    let refused = request(addr, "GET /stream HTTP/1.1\r\n\r\n");
    assert!(refused.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
    assert_eq!(report(&ctx).clients_served, 0);

    ctx.shutdown.trigger();
    server.join().unwrap();
}

#[test]
fn test_stream_end_to_end() {
    let geometry = Geometry::new(32, 16);
    let shutdown = ShutdownToken::new();
    let ctx = Arc::new(PipelineContext::from_parts(
        FramePool::new(4, PixelFormat::Yuyv.frame_len(geometry), 64 * 1024).unwrap(),
        HandoffQueue::new(3).unwrap(),
        CameraSettings::new("Front Cam", 50),
        shutdown.clone(),
    ));

    let producer_ctx = ctx.clone();
    let producer = thread::spawn(move || {
        let sensor = TestPatternSensor::new(geometry, 2, Duration::from_millis(10), false);
        let encoder = JpegEncoder::open(EncoderConfig {
            geometry,
            pixel_format: PixelFormat::Yuyv,
            quality: 50,
        })
        .unwrap();
        Producer::new(&producer_ctx, sensor, encoder).unwrap().run();
    });

    let (addr, server) = start_server(&ctx, 1);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
        .write_all(b"GET /stream HTTP/1.1\r\nHost: cam\r\n\r\n")
        .unwrap();

    // Read until a few frames have arrived
    let part_start = format!("--{}\r\n", BOUNDARY).into_bytes();
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + Duration::from_secs(10);
    while count_occurrences(&received, &part_start) < 3 && Instant::now() < deadline {
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "stream closed early");
        received.extend_from_slice(&buf[..n]);
    }

    shutdown.trigger();
    stream.read_to_end(&mut received).unwrap();

    producer.join().unwrap();
    server.join().unwrap();

    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains(&format!(
        "Content-Type: multipart/x-mixed-replace; boundary={}\r\n",
        BOUNDARY
    )));
    assert!(text.contains("Transfer-Encoding: chunked\r\n"));
    assert!(text.contains("Content-Type: image/jpeg\r\n"));
    assert!(count_occurrences(&received, &[0xff, 0xd8, 0xff]) >= 3);
    assert!(text.ends_with("0\r\n\r\n"));

    let r = report(&ctx);
    assert_eq!(r.clients_served, 1);
    assert_eq!(r.clients_active, 0);
    assert!(r.frames_sent >= 3);
    assert!(r.frames_published >= r.frames_sent);
}

#[test]
fn test_command_channel_over_tcp() {
    let ctx = context(1, 1);
    let table = Arc::new(build_command_table(&ctx).unwrap());
    let server = CmdServer::new(table, &ctx, 80);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (conn, _) = listener.accept().unwrap();
    let reader = conn.try_clone().unwrap();

    client
        .write_all(b"ping-camera\r\nbogus\r\nset-name \"Rear Cam\"\r\nget-name\r\n")
        .unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();

    server.serve(reader, conn).unwrap();

    let mut replies = String::new();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.read_to_string(&mut replies).unwrap();

    assert_eq!(replies, "pong-camera\r\nok\r\nRear Cam\r\n");
    assert_eq!(report(&ctx).commands_unknown, 1);
    assert_eq!(report(&ctx).commands_handled, 3);
}
