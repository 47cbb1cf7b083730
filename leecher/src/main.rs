use std::path::PathBuf;
use clap::Parser;
use leecher::{start_download, MetaInfo, UserCommand};

#[derive(Parser)]
struct Args {
    #[arg(help = "Path to torrent file")]
    torrent: PathBuf,

    #[arg(help = "File the content is written to")]
    output: PathBuf,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    let args = Args::parse();

    // Set up logging.
    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let format = tracing_subscriber::fmt::format();
    let sub = tracing_subscriber::fmt()
        .with_max_level(level)
        .event_format(format)
        .finish();
    tracing::subscriber::set_global_default(sub)?;

    let metainfo = MetaInfo::new(&args.torrent).map_err(|e| {
        eprintln!("failed to parse metainfo");
        e
    })?;
    println!("{} ({}), {}", metainfo.name(), metainfo.info_hash_hex(), metainfo.size_fmt());

    let (handle, mut rx) = start_download(metainfo, args.output, None);

    while let Some(cmd) = rx.recv().await {
        match cmd {
            UserCommand::Progress(progress) => println!("{}", progress),
            UserCommand::Finished => {
                println!("download complete");
                break;
            },
            UserCommand::Failed(e) => {
                eprintln!("download failed: {}", e);
                break;
            },
        }
    }

    handle.join().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = Args::try_parse_from(["leecher", "a.torrent", "out/a.bin"]).unwrap();
        assert_eq!(args.torrent, PathBuf::from("a.torrent"));
        assert_eq!(args.output, PathBuf::from("out/a.bin"));
        assert!(!args.verbose);

        assert!(Args::try_parse_from(["leecher", "-v", "a.torrent", "a.bin"]).unwrap().verbose);
        assert!(Args::try_parse_from(["leecher", "a.torrent"]).is_err());
    }
}
