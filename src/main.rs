//! mirror-video: video socket client with shared frame output
//!
//! Usage:
//!   mirror-video stream --addr 127.0.0.1:27183 [OPTIONS]
//!       Handshake with the device video socket, decode it and share frames
//!   mirror-video watch <NAME> [OPTIONS]
//!       Follow a shared frame segment created by `stream`

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use mirror_video::codec::{CodecAdapter, H264Codec};
use mirror_video::{
    CameraConfig, FrameSubscriber, MirrorError, SessionConfig, VideoSession, VideoSource,
};

/// mirror-video: decode a device video socket into shared memory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the video socket and publish decoded frames
    Stream(StreamArgs),
    /// Follow frames published in a shared segment
    Watch(WatchArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Display,
    Camera,
}

#[derive(ClapArgs, Debug)]
struct StreamArgs {
    /// Video socket address
    #[arg(short, long, default_value = "127.0.0.1:27183")]
    addr: String,

    /// Longest side requested from the device
    #[arg(long)]
    max_size: Option<u32>,

    #[arg(long, default_value_t = 90)]
    max_fps: u32,

    /// Bytes per socket read
    #[arg(long, default_value_t = 131072)]
    buffer_size: usize,

    #[arg(long, value_enum, default_value_t = SourceKind::Display)]
    source: SourceKind,

    #[arg(long, default_value_t = 0)]
    camera_id: u32,

    /// Camera aspect ratio, e.g. 16:9
    #[arg(long)]
    camera_ar: Option<String>,

    /// Camera size, e.g. 1280x720 (takes priority over --camera-ar)
    #[arg(long)]
    camera_size: Option<String>,

    #[arg(long, default_value_t = 0)]
    camera_fps: u32,

    /// Directory for shared frame segments
    #[arg(long)]
    shm_dir: Option<PathBuf>,

    /// Fixed segment name instead of a generated one
    #[arg(long)]
    shm_name: Option<String>,
}

impl StreamArgs {
    fn to_config(&self) -> SessionConfig {
        let source = match self.source {
            SourceKind::Display => VideoSource::Display,
            SourceKind::Camera => VideoSource::Camera(CameraConfig {
                camera_id: self.camera_id,
                aspect_ratio: self.camera_ar.clone(),
                size: self.camera_size.clone(),
                fps: self.camera_fps,
            }),
        };

        SessionConfig {
            max_size: self.max_size,
            max_fps: self.max_fps,
            buffer_size: self.buffer_size,
            source,
            segment_dir: self.shm_dir.clone(),
            segment_name: self.shm_name.clone(),
            ..Default::default()
        }
    }
}

#[derive(ClapArgs, Debug)]
struct WatchArgs {
    /// Segment name printed by `stream`
    name: String,

    /// Directory holding the segment
    #[arg(long)]
    shm_dir: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 16)]
    interval_ms: u64,
}

type BoxResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn runtime() -> BoxResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn run_stream(args: StreamArgs) -> BoxResult<()> {
    let config = args.to_config();
    info!("📋 Server args: {}", config.to_args().join(" "));

    let codec = H264Codec::new()?;
    stream_until_interrupted(config, codec, &args.addr)
}

fn stream_until_interrupted<C>(config: SessionConfig, codec: C, addr: &str) -> BoxResult<()>
where
    C: CodecAdapter + Send + 'static,
{
    let mut session = VideoSession::connect(config, codec, addr)?;
    session.start()?;

    if let Some(name) = session.segment_name() {
        println!("{}", name);
        info!("💡 Follow it with: mirror-video watch {} --shm-dir {}", name, session.segment_dir().display());
    }

    runtime()?.block_on(async {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        let mut last = 0;

        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                _ = ticker.tick() => {
                    let sequence = session.sequence();
                    if let Some(coordinate) = session.coordinate() {
                        info!(
                            "🎞️ frame {} ({} new) {} errors: {}",
                            sequence,
                            sequence.wrapping_sub(last),
                            coordinate,
                            session.stats().errors()
                        );
                    }
                    last = sequence;
                }
            }
        }
    });

    info!("👋 Interrupted, closing...");
    session.close();
    Ok(())
}

fn run_watch(args: WatchArgs) -> BoxResult<()> {
    let subscriber = match &args.shm_dir {
        Some(dir) => FrameSubscriber::attach(dir, &args.name)?,
        None => FrameSubscriber::attach_default(&args.name)?,
    };
    info!("👀 Watching {}", subscriber.path().display());

    let interval = Duration::from_millis(args.interval_ms.max(1));
    runtime()?.block_on(watch_frames(subscriber, interval))
}

async fn watch_frames(mut subscriber: FrameSubscriber, interval: Duration) -> BoxResult<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(interval);
    let mut last = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            _ = ticker.tick() => {
                let frame = subscriber
                    .read()
                    .map(|(geometry, view)| (geometry, view.as_bytes().len()));

                match frame {
                    Ok((geometry, bytes)) => {
                        let sequence = subscriber.sequence();
                        if sequence != last {
                            info!(
                                "🎞️ frame {} {} {:?} ({} bytes)",
                                sequence,
                                geometry,
                                geometry.orientation(),
                                bytes
                            );
                            last = sequence;
                        }
                    }
                    Err(MirrorError::StreamClosed) => {
                        warn!("Video stream closed");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

fn main() -> BoxResult<()> {
    let args = Args::parse();

    // Initialize logging
    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match args.command {
        Command::Stream(stream) => run_stream(stream),
        Command::Watch(watch) => run_watch(watch),
    }
}
