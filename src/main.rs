use clap::{Parser, Subcommand};
use std::process::ExitCode;
use ytbg::api::ids::{parse_media_ref, MediaRef};
use ytbg::config::AppConfig;
use ytbg::error::{AppError, AppResult};
use ytbg::history::JsonHistory;
use ytbg::AppContext;

#[derive(Parser, Debug)]
#[command(name = "ytbg")]
#[command(about = "Background audio player for video-platform streams")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a media id or URL to a stream descriptor and print it as JSON
    Resolve { input: String },
    /// Play media ids, video URLs or playlist URLs in order
    Play {
        #[arg(required = true)]
        inputs: Vec<String>,
        #[arg(long)]
        shuffle: bool,
    },
    /// Show recently played tracks
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

fn media_id(input: &str) -> AppResult<String> {
    match parse_media_ref(input) {
        Some(MediaRef::Video(id)) => Ok(id),
        Some(MediaRef::Playlist {
            video_id: Some(id), ..
        }) => Ok(id),
        Some(MediaRef::Playlist { playlist_id, .. }) => Err(AppError::Validation(format!(
            "Playlist {} has no video to start from",
            playlist_id
        ))),
        None => Err(AppError::Validation(format!(
            "Not a media id or URL: {}",
            input
        ))),
    }
}

#[cfg(feature = "native-audio")]
/// Expand every input (ids, video URLs, playlist URLs) into tracks, in order.
async fn queue_tracks(
    context: &AppContext,
    inputs: &[String],
) -> AppResult<Vec<ytbg::api::models::Track>> {
    let mut tracks = Vec::new();
    for input in inputs {
        let media = parse_media_ref(input).ok_or_else(|| {
            AppError::Validation(format!("Not a media id or URL: {}", input))
        })?;
        tracks.extend(context.lookup_tracks(&media).await?);
    }
    log::info!("[cli] Queued {} tracks", tracks.len());
    Ok(tracks)
}

async fn resolve(input: &str) -> AppResult<()> {
    let context = AppContext::new(AppConfig::load_or_default())?;
    let descriptor = context.resolver.resolve(&media_id(input)?).await?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

async fn history(limit: usize) -> AppResult<()> {
    let entries = JsonHistory::at_default_location()?.entries().await?;
    for entry in entries.iter().take(limit) {
        println!(
            "{}  {}  {} - {}",
            entry.played_at.format("%Y-%m-%d %H:%M"),
            entry.track.id,
            entry.track.channel_name,
            entry.track.title
        );
    }
    Ok(())
}

#[cfg(feature = "native-audio")]
async fn play(inputs: &[String], shuffle: bool) -> AppResult<()> {
    use std::sync::Arc;
    use ytbg::audio::engine::engine_channel;
    use ytbg::audio::native::NativeEngine;
    use ytbg::bridge::LogNowPlaying;
    use ytbg::events::SessionState;

    let context = AppContext::new(AppConfig::load_or_default())?;
    let tracks = queue_tracks(&context, inputs).await?;
    let (events_tx, events_rx) = engine_channel();
    let engine = NativeEngine::new(Arc::clone(&context.relay), events_tx)?;
    let (session, task) = context.start_session(
        Box::new(engine),
        events_rx,
        Arc::new(JsonHistory::at_default_location()?),
        Arc::new(LogNowPlaying),
    );

    session.play_queue(tracks, 0)?;
    session.set_shuffle(shuffle)?;

    tokio::select! {
        finished = session.wait_for(|s| s.state == SessionState::Idle && s.load_generation > 0) => {
            finished?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("[cli] Interrupted");
        }
    }

    session.shutdown()?;
    let _ = task.await;
    Ok(())
}

#[cfg(not(feature = "native-audio"))]
async fn play(_inputs: &[String], _shuffle: bool) -> AppResult<()> {
    Err(AppError::Config(
        "Built without the native-audio feature; rebuild with --features native-audio".into(),
    ))
}

#[tokio::main]
async fn main() -> ExitCode {
    ytbg::init_logging();
    let args = Args::parse();

    let result = match args.command {
        Command::Resolve { input } => resolve(&input).await,
        Command::Play { inputs, shuffle } => play(&inputs, shuffle).await,
        Command::History { limit } => history(limit).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[cli] {}", e);
            eprintln!(
                "{}",
                serde_json::to_string(&e).unwrap_or_else(|_| e.to_string())
            );
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}
