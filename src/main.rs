use clap::{ArgAction, Parser, Subcommand};
use refis::decoder::Probe;
use refis::error::exit_code;
use refis::ops::{self, ExtractOptions, Extracted};
use refis::{Error, Index, MasterHeader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "refis", version, about = "Resilient block-aligned file storage")]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file into a chunk stream
    Encode {
        input:  PathBuf,
        output: PathBuf,
        /// Replace an existing output file
        #[arg(short = 'y', long)]
        overwrite: bool,
    },
    /// Decode a clean, ordered chunk stream
    Decode {
        input: PathBuf,
        /// Output file or directory (default: stored name next to the input)
        output: Option<PathBuf>,
        #[arg(short = 'y', long)]
        overwrite: bool,
        /// Do not apply the stored timestamps
        #[arg(long)]
        no_times: bool,
    },
    /// Show the header of the first block of a file
    Info {
        input: PathBuf,
    },
    /// Scan a dump for chunk headers and save the index
    Scan {
        input: PathBuf,
        /// Index file to write
        index: PathBuf,
        #[arg(short = 'y', long)]
        overwrite: bool,
    },
    /// List the files recorded in an index
    List {
        index: PathBuf,
        /// Also print the missing block numbers of incomplete files
        #[arg(short, long)]
        missing: bool,
    },
    /// Restore one file from a dump using its index
    Restore {
        dump:  PathBuf,
        index: PathBuf,
        id:    String,
        /// Output file or directory (default: stored name in the working directory)
        output: Option<PathBuf>,
        #[arg(short = 'y', long)]
        overwrite: bool,
        #[arg(long)]
        no_times: bool,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(exit_code::PARAM_FAIL as u8)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(command: Commands) -> Result<i32, Error> {
    match command {

        // ── Encode ───────────────────────────────────────────────────────────
        Commands::Encode { input, output, overwrite } => {
            let master = ops::encode_file(&input, &output, overwrite)?;
            println!("Encoded {} ({} B, {} data block(s))",
                input.display(), master.file_size, master.data_blocks());
            println!("  id  {}", master.id);
            println!("  ->  {}", output.display());
            Ok(exit_code::SUCCESS)
        }

        // ── Decode ───────────────────────────────────────────────────────────
        Commands::Decode { input, output, overwrite, no_times } => {
            let opts = ExtractOptions { dest: output, overwrite, restore_times: !no_times };
            let done = ops::decode_file(&input, &opts)?;
            println!("Decoded {} -> {} ({} B)", input.display(), done.path.display(), done.bytes);
            Ok(attribute_outcome(done))
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            match ops::info_file(&input)? {
                Probe::TooShort   => println!("{}: shorter than one block", input.display()),
                Probe::NotAHeader => println!("{}: no chunk header", input.display()),
                Probe::Slave(s)   => println!(
                    "{}: starts with data block {} of {}", input.display(), s.index, s.id),
                Probe::Master(m)  => print_master(&input, &m),
            }
            Ok(exit_code::SUCCESS)
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input, index, overwrite } => {
            let report = ops::scan_to_index(&input, &index, overwrite)?;
            println!("{}", report.summary());
            if report.trailing_bytes > 0 {
                println!("  ignored {} trailing byte(s)", report.trailing_bytes);
            }
            println!("Index written to {}", index.display());
            Ok(exit_code::SUCCESS)
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { index, missing } => {
            println!("{:<36}  {:>12}  {:>13}  {:<8}  Name", "Id", "Size", "Blocks", "Status");
            for s in ops::list_index_file(&index)? {
                let size = s.file_size.map(|n| n.to_string()).unwrap_or_else(|| "?".into());
                let blocks = match s.expected {
                    Some(n) => format!("{}/{}", s.found, n),
                    None    => format!("{}/?", s.found),
                };
                let status = if s.complete { "ok" } else { "partial" };
                let name = s.file_name.as_deref().unwrap_or("<no master>");
                println!("{:<36}  {:>12}  {:>13}  {:<8}  {}", s.id, size, blocks, status, name);

                if missing && !s.missing.is_empty() {
                    let gaps: Vec<String> = s.missing.iter().map(u64::to_string).collect();
                    let more = if s.more_missing { " ..." } else { "" };
                    println!("    missing blocks: {}{}", gaps.join(" "), more);
                }
            }
            Ok(exit_code::SUCCESS)
        }

        // ── Restore ──────────────────────────────────────────────────────────
        Commands::Restore { dump, index, id, output, overwrite, no_times } => {
            let id = Uuid::parse_str(&id).map_err(|_| Error::InvalidId)?;
            let idx = Index::read_file(&index)?;
            let opts = ExtractOptions { dest: output, overwrite, restore_times: !no_times };
            let done = ops::restore_file(&dump, &idx, &id, &opts)?;
            println!("Restored {} -> {} ({} B)", id, done.path.display(), done.bytes);
            Ok(attribute_outcome(done))
        }
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn attribute_outcome(done: Extracted) -> i32 {
    match done.attribute_error {
        Some(e) => {
            eprintln!("warning: {e}");
            e.exit_code()
        }
        None => exit_code::SUCCESS,
    }
}

fn print_master(path: &Path, m: &MasterHeader) {
    println!("── {} ─────────────────────────────", path.display());
    println!("  Id          {}", m.id);
    println!("  Name        {}", m.file_name);
    println!("  Size        {} B", m.file_size);
    println!("  Blocks      {} (1 master + {} data)", m.data_blocks() + 1, m.data_blocks());
    println!("  Created     {}", m.create_time.to_rfc3339());
    println!("  Changed     {}", m.change_time.to_rfc3339());
}
