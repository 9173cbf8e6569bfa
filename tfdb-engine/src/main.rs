use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tfdb_common::{Direction, ExpectedVersion, ProposedEvent, Revision, StreamId};
use tfdb_storage::{ChunkDb, ChunkDbOptions, EventStore, FileNamingStrategy};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file. CLI flags (like the positional `dir`
    /// argument) still override whatever it sets.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create (or open) a database directory.
    Init { dir: PathBuf },

    /// Append one event to a stream.
    Append {
        dir: PathBuf,
        stream: String,
        event_type: String,
        json_payload: String,

        #[arg(long)]
        expected: Option<String>,
    },

    /// Read a stream.
    Read {
        dir: PathBuf,
        stream: String,

        #[arg(long)]
        backward: bool,

        #[arg(long, default_value_t = 20)]
        count: usize,
    },

    /// Print checkpoint values and chunk roster summary.
    Stats { dir: PathBuf },
}

fn main() -> eyre::Result<()> {
    tfdb_engine::logging::init();
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { dir } => cmd_init(config_path, &dir),
        Commands::Append {
            dir,
            stream,
            event_type,
            json_payload,
            expected,
        } => cmd_append(config_path, &dir, &stream, &event_type, &json_payload, expected.as_deref()),
        Commands::Read {
            dir,
            stream,
            backward,
            count,
        } => cmd_read(config_path, &dir, &stream, backward, count),
        Commands::Stats { dir } => cmd_stats(config_path, &dir),
    }
}

fn open_store(config_path: Option<&std::path::Path>, dir: &std::path::Path) -> eyre::Result<EventStore> {
    let config = tfdb_engine::Config {
        db_dir: dir.to_path_buf(),
        ..tfdb_engine::Config::load(config_path)?
    };

    let options = ChunkDbOptions {
        chunk_size: config.chunk_size,
        verify_hash_on_open: config.verify_hash_on_open,
        ..ChunkDbOptions::default()
    };

    let db = ChunkDb::open(&config.db_dir, FileNamingStrategy::versioned(), options)?;
    Ok(EventStore::open(db)?)
}

fn cmd_init(config_path: Option<&std::path::Path>, dir: &std::path::Path) -> eyre::Result<()> {
    let store = open_store(config_path, dir)?;
    store.close()?;
    println!("initialized database at {}", dir.display());
    Ok(())
}

fn parse_expected(expected: Option<&str>) -> eyre::Result<ExpectedVersion> {
    Ok(match expected {
        None | Some("any") => ExpectedVersion::Any,
        Some("no-stream") => ExpectedVersion::NoStream,
        Some("stream-exists") => ExpectedVersion::StreamExists,
        Some(revision) => ExpectedVersion::Revision(revision.parse()?),
    })
}

fn cmd_append(
    config_path: Option<&std::path::Path>,
    dir: &std::path::Path,
    stream: &str,
    event_type: &str,
    json_payload: &str,
    expected: Option<&str>,
) -> eyre::Result<()> {
    let store = open_store(config_path, dir)?;
    let expected_version = parse_expected(expected)?;

    // Validate the payload is well-formed JSON before committing it.
    let _: serde_json::Value = serde_json::from_str(json_payload)?;

    let result = store.append(
        &StreamId::new(stream),
        expected_version,
        vec![ProposedEvent::new(event_type, Bytes::from(json_payload.to_string()))],
    )?;

    store.close()?;
    println!(
        "committed event {} at {}",
        result.next_expected_version, result.position
    );
    Ok(())
}

fn cmd_read(
    config_path: Option<&std::path::Path>,
    dir: &std::path::Path,
    stream: &str,
    backward: bool,
    count: usize,
) -> eyre::Result<()> {
    let store = open_store(config_path, dir)?;
    let stream_id = StreamId::new(stream);

    let direction = if backward { Direction::Backward } else { Direction::Forward };
    let from = if backward { Revision::End } else { Revision::Start };
    let (events, _, _) = store.read_stream(&stream_id, direction, from, count)?;

    for event in events {
        println!(
            "#{} [{}] {} -> {}",
            event.event_number,
            event.position,
            event.event_type,
            String::from_utf8_lossy(&event.data)
        );
    }

    store.close()?;
    Ok(())
}

fn cmd_stats(config_path: Option<&std::path::Path>, dir: &std::path::Path) -> eyre::Result<()> {
    let store = open_store(config_path, dir)?;
    let db = store.db();

    println!("writer:  {}", db.writer_position());
    println!("chaser:  {}", db.chaser_position());

    for chunk in db.chunk_roster() {
        println!(
            "chunk [{:06}-{:06}] v{:06} completed={}",
            chunk.start, chunk.end, chunk.version, chunk.is_completed
        );
    }

    store.close()?;
    Ok(())
}
