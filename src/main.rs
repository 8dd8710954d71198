use clap::{Parser, Subcommand};
use needlecask::{NeedleCodec, StandardNeedleCodec, SuperBlockOptions, Volume};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "needlecask", version = "1.0.0", about = "Append-only super block container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a payload under a key
    Put {
        container: PathBuf,
        key: i64,
        #[arg(default_value = "0")]
        cookie: i64,
        /// Payload is the raw bytes of this file
        payload: PathBuf,
    },
    /// Fetch a payload by key
    Get {
        container: PathBuf,
        key: i64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Logically delete a key
    Del { container: PathBuf, key: i64 },
    /// Debug scan printing every frame's string form to stderr
    Dump { container: PathBuf },
    /// Rebuild the in-memory index and index file from a linear scan
    Recover { container: PathBuf },
    /// Offline copy of live needles into a fresh sibling container
    Compact {
        container: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show header and cursor state
    Stat { container: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    needlecask::init_tracing();

    match Cli::parse().command {
        Commands::Put {
            container,
            key,
            cookie,
            payload,
        } => {
            let data = std::fs::read(&payload)?;
            let mut vol = open_volume(&container)?;
            vol.put(key, cookie, &data)?;
            vol.flush()?;
            println!("put key={key} ({} B) -> {}", data.len(), container.display());
        }

        Commands::Get {
            container,
            key,
            output,
        } => {
            let mut vol = open_volume(&container)?;
            match vol.get(key)? {
                Some(frame) => {
                    let codec = StandardNeedleCodec::default();
                    let header = codec.parse_header(&frame[..codec.header_size()])?;
                    let payload = &frame[codec.header_size()..][..header.data_size.max(0) as usize];
                    match output {
                        Some(path) => std::fs::write(&path, payload)?,
                        None => println!("{}", String::from_utf8_lossy(payload)),
                    }
                }
                None => println!("key={key} not found or deleted"),
            }
        }

        Commands::Del { container, key } => {
            let mut vol = open_volume(&container)?;
            vol.delete(key)?;
            vol.flush()?;
            println!("deleted key={key}");
        }

        Commands::Dump { container } => {
            let codec = StandardNeedleCodec::default();
            let options = SuperBlockOptions::with_codec(&codec);
            let mut sb = needlecask::SuperBlock::open(&container, codec, options)?;
            sb.dump()?;
        }

        Commands::Recover { container } => {
            let vol = open_volume(&container)?;
            println!(
                "recovered {} live/dead entries from {}",
                vol.cache().len(),
                container.display()
            );
        }

        Commands::Compact { container, output } => {
            let vol = open_volume(&container)?;
            vol.compact_into(&output, StandardNeedleCodec::default())?;
            println!("compacted {} -> {}", container.display(), output.display());
        }

        Commands::Stat { container } => {
            let codec = StandardNeedleCodec::default();
            let options = SuperBlockOptions::with_codec(&codec);
            let sb = needlecask::SuperBlock::open(&container, codec, options)?;
            let size = std::fs::metadata(&container)?.len();
            println!("── container ────────────────────────────────");
            println!("  path           {}", container.display());
            println!("  file size      {size} B");
            println!("  format version {}", sb.version());
            println!("  current slot   {}", sb.current_slot_offset());
        }
    }

    Ok(())
}

fn open_volume(path: &PathBuf) -> Result<Volume<StandardNeedleCodec>, Box<dyn std::error::Error>> {
    let codec = StandardNeedleCodec::default();
    let options = SuperBlockOptions::with_codec(&codec);
    Ok(Volume::open(path, codec, options)?)
}
