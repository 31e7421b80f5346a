use std::path::Path;

use vproc_media::MediaConfig;
use vproc_worker::{PipelineOptions, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    let media = MediaConfig::from_env();

    println!(
        "worker-selfcheck: starting with upload_dir={}",
        config.upload_dir
    );
    PipelineOptions::from_env().validate()?;
    ensure_upload_dir(&config.upload_dir).await?;
    ensure_media_tools(&media)?;
    ensure_env_present(&["REDIS_URL", "DATABASE_URL"])?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_upload_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("upload dir {} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_media_tools(media: &MediaConfig) -> anyhow::Result<()> {
    let ffmpeg = vproc_media::check_ffmpeg(media)
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    let ffprobe = vproc_media::check_ffprobe(media)
        .map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    println!(
        "worker-selfcheck: ffmpeg={} ffprobe={}",
        ffmpeg.display(),
        ffprobe.display()
    );
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
