use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};
use memmap2::Mmap;

use rox::ast_printer::AstPrinter;
use rox::parser::Parser;
use rox::runner::{self, Outcome};
use rox::scanner::Scanner;

#[derive(ClapParser, Debug)]
#[command(version, about = "Lox language interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes input from a file, printing each token
    Tokenize {
        filename: Option<PathBuf>,

        /// Print tokens as a JSON array instead of one per line
        #[arg(long)]
        json: bool,
    },

    /// Parses input from a file as a single expression and prints its AST
    Parse { filename: Option<PathBuf> },

    /// Evaluates input from a file as a single expression and prints the result
    Evaluate { filename: Option<PathBuf> },

    /// Runs input from a file as a Lox program
    Run { filename: Option<PathBuf> },
}

/// Maps the file and decodes it as UTF‑8.
fn read_file(filename: &Path) -> Result<String> {
    info!("Reading file: {:?}", filename);
    let file = File::open(filename).with_context(|| format!("Failed to open file {:?}", filename))?;

    let len = file
        .metadata()
        .with_context(|| format!("Failed to stat file {:?}", filename))?
        .len();

    // Zero-length mappings are rejected by the OS.
    if len == 0 {
        info!("File {:?} is empty", filename);
        return Ok(String::new());
    }

    // SAFETY: the mapping is only read, and only before `mmap` drops.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to map file {:?}", filename))?;

    // Validate in place; the single copy is the owned program text.
    let text = std::str::from_utf8(&mmap)
        .with_context(|| format!("File {:?} is not valid UTF-8", filename))?
        .to_owned();

    info!("Read {} bytes from {:?}", text.len(), filename);

    Ok(text)
}

fn init_logger() -> Result<()> {
    // Create or open the log file
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    Builder::new()
        .format(|buf, record| {
            let module = record.module_path().unwrap_or("<unnamed>");
            let module = module.strip_prefix("rox::").unwrap_or(module);
            writeln!(
                buf,
                "[{}:{}] - {}",
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug)
        .parse_default_env() // RUST_LOG overrides the default level
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

fn report(outcome: Outcome) -> i32 {
    let code = outcome.exit_code();

    match outcome {
        Outcome::Success => {}
        Outcome::StaticErrors(diagnostics) => {
            for error in diagnostics.iter() {
                eprintln!("{}", error);
            }
        }
        Outcome::RuntimeError(e) => eprintln!("{}", e),
    }

    code
}

fn tokenize(source: &str, json: bool) -> Result<i32> {
    let mut tokens = Vec::new();
    let mut tokenized = true;

    for token in Scanner::new(source) {
        match token {
            Ok(token) => {
                debug!("Scanned token: {}", token);
                tokens.push(token);
            }

            Err(e) => {
                tokenized = false;
                debug!("Tokenization debug: {}", e);
                eprintln!("{}", e);
            }
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if json {
        serde_json::to_writer_pretty(&mut out, &tokens).context("Failed to serialize tokens")?;
        writeln!(out)?;
    } else {
        for token in &tokens {
            writeln!(out, "{}", token)?;
        }
    }

    if !tokenized {
        debug!("Tokenization failed, exiting with code 65");
        return Ok(65);
    }

    info!("Tokenization completed successfully");
    Ok(0)
}

fn parse(source: &str) -> i32 {
    let (tokens, diagnostics) = runner::scan(source);
    if diagnostics.has_errors() {
        return report(Outcome::StaticErrors(diagnostics));
    }

    match Parser::new(&tokens).parse_expression() {
        Ok(expr) => {
            let ast_str = AstPrinter::print(&expr);
            debug!("AST: {}", ast_str);
            println!("{}", ast_str);
            0
        }

        Err(e) => {
            debug!("Parse debug: {}", e);
            eprintln!("{}", e);
            65
        }
    }
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    // Initialize logger only if --log flag is provided
    if args.log {
        init_logger()?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    info!("CLI arguments: {:?}", args);

    let (filename, command) = match &args.commands {
        Commands::Tokenize { filename, .. } => (filename, "tokenize"),
        Commands::Parse { filename } => (filename, "parse"),
        Commands::Evaluate { filename } => (filename, "evaluate"),
        Commands::Run { filename } => (filename, "run"),
    };

    let Some(filename) = filename else {
        info!("No filepath provided for {}", command);
        println!("No input filepath was provided. Exiting...");
        return Ok(());
    };

    info!("Running {} subcommand", command);
    let source = read_file(filename)?;

    let code = match args.commands {
        Commands::Tokenize { json, .. } => tokenize(&source, json)?,
        Commands::Parse { .. } => parse(&source),
        Commands::Evaluate { .. } => report(runner::evaluate(&source, &mut io::stdout().lock())),
        Commands::Run { .. } => report(runner::run(&source, &mut io::stdout().lock())),
    };

    info!("{} subcommand finished with exit code {}", command, code);

    if code != 0 {
        io::stdout().flush()?;
        std::process::exit(code);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rox-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn read_file_returns_the_mapped_text() {
        let path = scratch_file("hello.lox", "print \"héllo\";\n".as_bytes());
        let text = read_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(text, "print \"héllo\";\n");
    }

    #[test]
    fn read_file_accepts_empty_files() {
        let path = scratch_file("empty.lox", b"");
        let text = read_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(text.is_empty());
    }

    #[test]
    fn read_file_rejects_invalid_utf8() {
        let path = scratch_file("bad.lox", &[b'p', 0xff, 0xfe]);
        let err = read_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(err.to_string().contains("not valid UTF-8"), "{}", err);
    }
}
